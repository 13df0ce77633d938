// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod metrics;
pub mod orchestrator;
pub mod output;
pub mod pipeline;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{Aggregator, CategoryFilters, ContextBundle};
pub use crate::config::{Credentials, GeneratorConfig};
pub use crate::error::PipelineError;
pub use crate::generate::question::QuestionRecord;
pub use crate::orchestrator::{ConcurrencyMode, Orchestrator, RunReport};
pub use crate::pipeline::run_pipeline;
