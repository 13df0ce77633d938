// src/ingest/providers/coinmarketcap.rs
//! CoinMarketCap latest quotes in USD.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::ingest::ensure_success;
use crate::ingest::types::{Capabilities, SourceId, SourceProvider, SourceQuery, SourceRecord};

pub const DEFAULT_BASE_URL: &str = "https://pro-api.coinmarketcap.com";

#[derive(Debug, Deserialize)]
struct CmcResponse {
    #[serde(default)]
    data: Option<BTreeMap<String, CmcAsset>>,
    #[serde(default)]
    status: Option<CmcStatus>,
}

#[derive(Debug, Deserialize)]
struct CmcStatus {
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmcAsset {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub quote: BTreeMap<String, CmcQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmcQuote {
    pub price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub percent_change_24h: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

pub struct CoinMarketCapProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl CoinMarketCapProvider {
    pub fn new(api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn symbols(query: &SourceQuery) -> Vec<String> {
        let mut v: Vec<String> = query
            .symbols
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        v.sort();
        v.dedup();
        v
    }
}

#[async_trait]
impl SourceProvider for CoinMarketCapProvider {
    type Raw = BTreeMap<String, CmcAsset>;

    fn source_id(&self) -> SourceId {
        SourceId::CoinMarketCap
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_filtering: true,
            supports_date_range: false,
        }
    }

    fn cache_params(&self, query: &SourceQuery, _now: DateTime<Utc>) -> String {
        format!("symbols={}|convert=USD", Self::symbols(query).join(","))
    }

    async fn fetch(&self, query: &SourceQuery, _now: DateTime<Utc>) -> Result<Self::Raw> {
        let symbols = Self::symbols(query);
        if symbols.is_empty() {
            return Ok(BTreeMap::new());
        }
        let url = format!("{}/v1/cryptocurrency/quotes/latest", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("symbol", symbols.join(",").as_str()), ("convert", "USD")])
            .send()
            .await
            .context("coinmarketcap http get()")?;
        let body: CmcResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .context("coinmarketcap decode quotes")?;
        body.data.ok_or_else(|| {
            let msg = body
                .status
                .and_then(|s| s.error_message)
                .unwrap_or_else(|| "response carried no data".to_string());
            anyhow!("coinmarketcap: {msg}")
        })
    }

    fn normalize(
        &self,
        _query: &SourceQuery,
        raw: Self::Raw,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let mut out = Vec::with_capacity(raw.len());
        for (key, asset) in raw {
            let Some(usd) = asset.quote.get("USD") else {
                tracing::debug!(symbol = %key, "no USD quote");
                continue;
            };
            let Some(price) = usd.price.filter(|p| p.is_finite() && *p > 0.0) else {
                tracing::debug!(symbol = %key, "non-positive price skipped");
                continue;
            };
            let observed_at = usd
                .last_updated
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now);
            let symbol = if asset.symbol.is_empty() { key } else { asset.symbol.clone() };
            out.push(SourceRecord {
                source_id: SourceId::CoinMarketCap,
                metric_name: "price".to_string(),
                label: asset.name.clone(),
                subject: symbol,
                value: Some(price),
                unit: "USD".to_string(),
                observed_at,
                raw_reference: json!({
                    "market_cap": usd.market_cap,
                    "volume_24h": usd.volume_24h,
                    "percent_change_24h": usd.percent_change_24h,
                }),
            });
        }
        Ok(out)
    }
}
