// src/ingest/providers/mod.rs
pub mod acled;
pub mod coinmarketcap;
pub mod eodhd;
pub mod fred;
pub mod newsapi;
