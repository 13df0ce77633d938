// src/ingest/providers/acled.rs
//! ACLED conflict events, aggregated per (country, event type) over a date range.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::ingest::types::{
    Capabilities, DateWindow, EventType, SourceId, SourceProvider, SourceQuery, SourceRecord,
};
use crate::ingest::{ensure_success, parse_number};

pub const DEFAULT_BASE_URL: &str = "https://api.acleddata.com";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;
pub const DEFAULT_PAGE_LIMIT: u32 = 500;
pub const DEFAULT_MAX_PAGES: u32 = 10;

#[derive(Debug, Deserialize)]
struct AcledPage {
    #[serde(default)]
    data: Vec<AcledEvent>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcledEvent {
    #[serde(default)]
    pub event_date: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub iso3: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub fatalities: serde_json::Value,
}

pub struct AcledProvider {
    client: reqwest::Client,
    api_key: String,
    email: String,
    base_url: String,
    page_limit: u32,
    max_pages: u32,
}

impl AcledProvider {
    pub fn new(api_key: impl Into<String>, email: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            email: email.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Rows per page and the page-count ceiling.
    pub fn with_paging(mut self, page_limit: u32, max_pages: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    fn window(query: &SourceQuery, now: DateTime<Utc>) -> Option<DateWindow> {
        DateWindow::ending_yesterday(
            now.date_naive(),
            query.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS),
        )
    }

    fn countries(query: &SourceQuery) -> Vec<String> {
        query
            .countries
            .iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect()
    }

    async fn fetch_page(&self, query: &SourceQuery, window: DateWindow, page: u32) -> Result<Vec<AcledEvent>> {
        let url = format!("{}/acled/read", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("email", self.email.clone()),
            ("terms", "accept".to_string()),
            ("event_date", format!("{}|{}", window.start, window.end)),
            ("event_date_where", "BETWEEN".to_string()),
            ("page", page.to_string()),
            ("limit", self.page_limit.to_string()),
        ];
        let countries = Self::countries(query);
        if !countries.is_empty() {
            params.push(("iso", countries.join("|")));
            params.push(("iso_where", "=".to_string()));
        }
        if !query.event_types.is_empty() {
            let types: Vec<&str> = query.event_types.iter().map(|e| e.acled_name()).collect();
            params.push(("event_type", types.join("|")));
            params.push(("event_type_where", "=".to_string()));
        }

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("acled http get()")?;
        let body: AcledPage = ensure_success(resp)
            .await?
            .json()
            .await
            .context("acled decode page")?;
        if let Some(err) = body.error {
            bail!("acled api error: {err}");
        }
        Ok(body.data)
    }
}

#[async_trait]
impl SourceProvider for AcledProvider {
    type Raw = Vec<AcledEvent>;

    fn source_id(&self) -> SourceId {
        SourceId::Acled
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_filtering: true,
            supports_date_range: true,
        }
    }

    fn cache_params(&self, query: &SourceQuery, now: DateTime<Utc>) -> String {
        let window = Self::window(query, now)
            .map(|w| format!("{}..{}", w.start, w.end))
            .unwrap_or_else(|| "none".to_string());
        let types: Vec<&str> = query.event_types.iter().map(|e| e.acled_name()).collect();
        let mut countries = Self::countries(query);
        countries.sort();
        countries.dedup();
        format!(
            "countries={}|types={}|window={}",
            countries.join(","),
            types.join(","),
            window
        )
    }

    async fn fetch(&self, query: &SourceQuery, now: DateTime<Utc>) -> Result<Self::Raw> {
        let Some(window) = Self::window(query, now) else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for page in 1..=self.max_pages {
            let rows = self.fetch_page(query, window, page).await?;
            let n = rows.len();
            events.extend(rows);
            if n < self.page_limit as usize {
                break;
            }
            if page == self.max_pages {
                tracing::warn!(pages = page, events = events.len(), "acled page ceiling reached");
            }
        }
        Ok(events)
    }

    fn normalize(
        &self,
        query: &SourceQuery,
        raw: Self::Raw,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let Some(window) = Self::window(query, now) else {
            return Ok(Vec::new());
        };
        let wanted_countries = Self::countries(query);

        // (country, type) -> (events, fatalities)
        let mut by_type: BTreeMap<(String, EventType), (u64, u64)> = BTreeMap::new();
        for ev in raw {
            let Some(kind) = EventType::from_acled(&ev.event_type) else {
                continue;
            };
            if !query.event_types.is_empty() && !query.event_types.contains(&kind) {
                continue;
            }
            let country = ev
                .iso3
                .as_deref()
                .or(ev.country.as_deref())
                .unwrap_or_default()
                .trim()
                .to_ascii_uppercase();
            if country.is_empty() {
                continue;
            }
            if !wanted_countries.is_empty() && !wanted_countries.contains(&country) {
                continue;
            }
            let fatalities = parse_number(&ev.fatalities).unwrap_or(0.0).max(0.0) as u64;
            let slot = by_type.entry((country, kind)).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += fatalities;
        }

        let observed_at = window
            .end
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        let mut fatalities_by_country: BTreeMap<String, u64> = BTreeMap::new();
        let mut out = Vec::with_capacity(by_type.len());
        for ((country, kind), (events, fatalities)) in by_type {
            *fatalities_by_country.entry(country.clone()).or_default() += fatalities;
            out.push(SourceRecord {
                source_id: SourceId::Acled,
                metric_name: kind.metric_name().to_string(),
                subject: country.clone(),
                label: format!("{} in {}", kind.acled_name(), country),
                value: Some(events as f64),
                unit: "events".to_string(),
                observed_at,
                raw_reference: json!({
                    "event_type": kind.acled_name(),
                    "fatalities": fatalities,
                    "window_start": window.start.to_string(),
                    "window_end": window.end.to_string(),
                }),
            });
        }
        for (country, fatalities) in fatalities_by_country {
            out.push(SourceRecord {
                source_id: SourceId::Acled,
                metric_name: "fatalities".to_string(),
                subject: country.clone(),
                label: format!("Reported fatalities in {country}"),
                value: Some(fatalities as f64),
                unit: "people".to_string(),
                observed_at,
                raw_reference: json!({
                    "window_start": window.start.to_string(),
                    "window_end": window.end.to_string(),
                }),
            });
        }
        Ok(out)
    }
}
