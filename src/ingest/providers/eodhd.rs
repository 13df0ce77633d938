// src/ingest/providers/eodhd.rs
//! EOD Historical Data real-time (delayed) quotes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::ingest::types::{Capabilities, SourceId, SourceProvider, SourceQuery, SourceRecord};
use crate::ingest::{ensure_success, parse_number};

pub const DEFAULT_BASE_URL: &str = "https://eodhd.com/api";

pub struct EodhdProvider {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
}

/// `AAPL` → `AAPL.US`; symbols with an exchange suffix are kept as given.
pub fn exchange_symbol(s: &str) -> String {
    let s = s.trim().to_ascii_uppercase();
    if s.contains('.') {
        s
    } else {
        format!("{s}.US")
    }
}

fn display_symbol(code: &str) -> &str {
    code.strip_suffix(".US").unwrap_or(code)
}

impl EodhdProvider {
    pub fn new(api_token: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            api_token: api_token.into(),
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
            .filter(|s| !s.trim().is_empty())
            .map(|s| exchange_symbol(s))
            .collect();
        v.sort();
        v.dedup();
        v
    }
}

#[async_trait]
impl SourceProvider for EodhdProvider {
    type Raw = Vec<Value>;

    fn source_id(&self) -> SourceId {
        SourceId::Eodhd
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_filtering: true,
            supports_date_range: false,
        }
    }

    fn cache_params(&self, query: &SourceQuery, _now: DateTime<Utc>) -> String {
        format!("symbols={}", Self::symbols(query).join(","))
    }

    async fn fetch(&self, query: &SourceQuery, _now: DateTime<Utc>) -> Result<Self::Raw> {
        let symbols = Self::symbols(query);
        let Some((first, rest)) = symbols.split_first() else {
            return Ok(Vec::new());
        };
        let url = format!("{}/real-time/{}", self.base_url, first);
        let mut params = vec![("api_token", self.api_token.clone()), ("fmt", "json".to_string())];
        if !rest.is_empty() {
            params.push(("s", rest.join(",")));
        }
        let resp = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("eodhd http get()")?;
        let body: Value = ensure_success(resp)
            .await?
            .json()
            .await
            .context("eodhd decode quotes")?;

        // Single symbol comes back as an object, several as an array.
        if let Some(err) = body.get("error") {
            bail!("eodhd api error: {err}");
        }
        match body {
            Value::Array(items) => Ok(items),
            quote @ Value::Object(_) => Ok(vec![quote]),
            other => bail!("eodhd unexpected payload: {other}"),
        }
    }

    fn normalize(
        &self,
        _query: &SourceQuery,
        raw: Self::Raw,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let mut out = Vec::with_capacity(raw.len());
        for item in raw {
            let Some(code) = item.get("code").and_then(Value::as_str) else {
                continue;
            };
            let Some(price) = item.get("close").and_then(parse_number).filter(|p| *p > 0.0) else {
                tracing::debug!(symbol = %code, "no usable close");
                continue;
            };
            let observed_at = item
                .get("timestamp")
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or(now);
            let symbol = display_symbol(code).to_string();
            out.push(SourceRecord {
                source_id: SourceId::Eodhd,
                metric_name: "price".to_string(),
                label: symbol.clone(),
                subject: symbol,
                value: Some(price),
                unit: "USD".to_string(),
                observed_at,
                raw_reference: json!({
                    "code": code,
                    "volume": item.get("volume").and_then(parse_number),
                    "change_p": item.get("change_p").and_then(parse_number),
                    "previous_close": item.get("previousClose").and_then(parse_number),
                }),
            });
        }
        Ok(out)
    }
}
