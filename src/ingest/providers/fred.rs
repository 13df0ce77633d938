// src/ingest/providers/fred.rs
//! FRED economic indicators: latest observation per series over a trailing window.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::ingest::types::{
    Capabilities, DateWindow, SourceId, SourceProvider, SourceQuery, SourceRecord,
};
use crate::ingest::{ensure_success, parse_number};

pub const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy)]
pub struct IndicatorInfo {
    pub series_id: &'static str,
    pub metric: &'static str,
    pub title: &'static str,
    pub unit: &'static str,
}

pub const DEFAULT_INDICATORS: &[IndicatorInfo] = &[
    IndicatorInfo { series_id: "GDP", metric: "gdp", title: "Gross Domestic Product", unit: "Billions of Dollars" },
    IndicatorInfo { series_id: "UNRATE", metric: "unemployment_rate", title: "Unemployment Rate", unit: "Percent" },
    IndicatorInfo { series_id: "CPIAUCSL", metric: "cpi", title: "Consumer Price Index for All Urban Consumers", unit: "Index 1982-1984=100" },
    IndicatorInfo { series_id: "FEDFUNDS", metric: "interest_rate", title: "Federal Funds Effective Rate", unit: "Percent" },
    IndicatorInfo { series_id: "T10Y2Y", metric: "treasury_spread", title: "10-Year Treasury Minus 2-Year Treasury", unit: "Percent" },
    IndicatorInfo { series_id: "INDPRO", metric: "industrial_production", title: "Industrial Production Index", unit: "Index 2017=100" },
    IndicatorInfo { series_id: "M2SL", metric: "m2_money_stock", title: "M2 Money Stock", unit: "Billions of Dollars" },
    IndicatorInfo { series_id: "HOUST", metric: "housing_starts", title: "Housing Starts", unit: "Thousands of Units" },
    IndicatorInfo { series_id: "RSXFS", metric: "retail_sales", title: "Advance Retail Sales: Retail Trade", unit: "Millions of Dollars" },
    IndicatorInfo { series_id: "PAYEMS", metric: "nonfarm_payrolls", title: "All Employees, Total Nonfarm", unit: "Thousands of Persons" },
];

pub fn indicator_info(series_id: &str) -> Option<&'static IndicatorInfo> {
    DEFAULT_INDICATORS
        .iter()
        .find(|s| s.series_id.eq_ignore_ascii_case(series_id))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationsResponse {
    #[serde(default)]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observation {
    pub date: String,
    pub value: serde_json::Value,
}

pub struct FredProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FredProvider {
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

    fn series_ids(query: &SourceQuery) -> Vec<String> {
        if query.indicators.is_empty() {
            DEFAULT_INDICATORS
                .iter()
                .map(|s| s.series_id.to_string())
                .collect()
        } else {
            query
                .indicators
                .iter()
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }

    fn window(query: &SourceQuery, now: DateTime<Utc>) -> DateWindow {
        DateWindow::trailing(
            now.date_naive(),
            query.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS),
        )
    }

    async fn fetch_series(&self, series_id: &str, window: DateWindow) -> Result<Vec<Observation>> {
        let url = format!("{}/fred/series/observations", self.base_url);
        let start = window.start.format("%Y-%m-%d").to_string();
        let end = window.end.format("%Y-%m-%d").to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", start.as_str()),
                ("observation_end", end.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("fred get {series_id}"))?;
        let body: ObservationsResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .with_context(|| format!("fred decode {series_id}"))?;
        Ok(body.observations)
    }
}

#[async_trait]
impl SourceProvider for FredProvider {
    type Raw = Vec<(String, Vec<Observation>)>;

    fn source_id(&self) -> SourceId {
        SourceId::Fred
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_filtering: true,
            supports_date_range: true,
        }
    }

    fn cache_params(&self, query: &SourceQuery, now: DateTime<Utc>) -> String {
        let mut ids = Self::series_ids(query);
        ids.sort();
        ids.dedup();
        let w = Self::window(query, now);
        format!("indicators={}|start={}|end={}", ids.join(","), w.start, w.end)
    }

    async fn fetch(&self, query: &SourceQuery, now: DateTime<Utc>) -> Result<Self::Raw> {
        let window = Self::window(query, now);
        let mut out = Vec::new();
        let mut last_err = None;
        for series_id in Self::series_ids(query) {
            match self.fetch_series(&series_id, window).await {
                Ok(obs) => out.push((series_id, obs)),
                Err(e) => {
                    tracing::warn!(error = ?e, series = %series_id, "fred series skipped");
                    last_err = Some(e);
                }
            }
        }
        match (out.is_empty(), last_err) {
            (true, Some(e)) => Err(e.context("every FRED series failed")),
            _ => Ok(out),
        }
    }

    fn normalize(
        &self,
        _query: &SourceQuery,
        raw: Self::Raw,
        _now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let mut out = Vec::with_capacity(raw.len());
        for (series_id, observations) in raw {
            let mut points: Vec<(NaiveDate, f64)> = observations
                .iter()
                .filter_map(|o| {
                    let date = NaiveDate::parse_from_str(&o.date, "%Y-%m-%d").ok()?;
                    Some((date, parse_number(&o.value)?))
                })
                .collect();
            points.sort_by_key(|(d, _)| *d);

            let Some(&(latest_date, latest)) = points.last() else {
                tracing::debug!(series = %series_id, "no usable observations");
                continue;
            };
            let previous = points.len().checked_sub(2).map(|i| points[i].1);
            // Twelve periods back; exact for monthly series.
            let yoy = points
                .len()
                .checked_sub(13)
                .map(|i| points[i].1)
                .filter(|base| *base != 0.0)
                .map(|base| (latest / base - 1.0) * 100.0);

            let info = indicator_info(&series_id);
            let observed_at = latest_date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| anyhow!("bad observation date for {series_id}"))?
                .and_utc();

            out.push(SourceRecord {
                source_id: SourceId::Fred,
                metric_name: info
                    .map(|s| s.metric.to_string())
                    .unwrap_or_else(|| series_id.to_ascii_lowercase()),
                subject: series_id.clone(),
                label: info
                    .map(|s| s.title.to_string())
                    .unwrap_or_else(|| series_id.clone()),
                value: Some(latest),
                unit: info.map(|s| s.unit).unwrap_or("").to_string(),
                observed_at,
                raw_reference: json!({
                    "series_id": series_id,
                    "previous_value": previous,
                    "yoy_change_pct": yoy,
                    "observations": points.len(),
                }),
            });
        }
        Ok(out)
    }
}
