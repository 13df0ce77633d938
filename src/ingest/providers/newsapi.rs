// src/ingest/providers/newsapi.rs
//! NewsAPI top headlines. Context only: records carry no numeric value.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::ingest::types::{Capabilities, SourceId, SourceProvider, SourceQuery, SourceRecord};
use crate::ingest::{ensure_success, normalize_text};

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org";
pub const DEFAULT_CATEGORY: &str = "business";
pub const DEFAULT_RECENCY_DAYS: u32 = 1;
const PAGE_SIZE: &str = "50";

#[derive(Debug, Deserialize)]
struct HeadlinesResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub source: ArticleSource,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "publishedAt")]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleSource {
    #[serde(default)]
    pub name: Option<String>,
}

pub struct NewsApiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

/// Parse an RFC 3339 timestamp via `time`, then hand it to chrono.
fn parse_published(s: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(s.trim(), &Rfc3339).ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

impl NewsApiProvider {
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

    fn category(query: &SourceQuery) -> String {
        query
            .news_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_ascii_lowercase()
    }

    fn keywords(query: &SourceQuery) -> Vec<String> {
        query
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

#[async_trait]
impl SourceProvider for NewsApiProvider {
    type Raw = Vec<Article>;

    fn source_id(&self) -> SourceId {
        SourceId::NewsApi
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_filtering: true,
            supports_date_range: false,
        }
    }

    fn cache_params(&self, query: &SourceQuery, _now: DateTime<Utc>) -> String {
        format!(
            "category={}|q={}|days={}",
            Self::category(query),
            Self::keywords(query).join(" OR ").to_ascii_lowercase(),
            query.lookback_days.unwrap_or(DEFAULT_RECENCY_DAYS)
        )
    }

    async fn fetch(&self, query: &SourceQuery, _now: DateTime<Utc>) -> Result<Self::Raw> {
        let url = format!("{}/v2/top-headlines", self.base_url);
        let mut params = vec![
            ("category", Self::category(query)),
            ("language", "en".to_string()),
            ("country", "us".to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
        ];
        let keywords = Self::keywords(query);
        if !keywords.is_empty() {
            params.push(("q", keywords.join(" OR ")));
        }
        let resp = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&params)
            .send()
            .await
            .context("newsapi http get()")?;
        let body: HeadlinesResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .context("newsapi decode headlines")?;
        if body.status != "ok" {
            bail!(
                "newsapi status {}: {}",
                body.status,
                body.message.unwrap_or_default()
            );
        }
        Ok(body.articles)
    }

    fn normalize(
        &self,
        query: &SourceQuery,
        raw: Self::Raw,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let days = query.lookback_days.unwrap_or(DEFAULT_RECENCY_DAYS).max(1);
        let cutoff = now - Duration::days(i64::from(days));

        let mut out = Vec::new();
        for a in raw {
            let title = normalize_text(a.title.as_deref().unwrap_or_default());
            if title.is_empty() || title == "[Removed]" {
                continue;
            }
            let Some(published) = a.published_at.as_deref().and_then(parse_published) else {
                continue;
            };
            if published < cutoff {
                continue;
            }
            let outlet = a.source.name.unwrap_or_default();
            out.push(SourceRecord {
                source_id: SourceId::NewsApi,
                metric_name: "headline".to_string(),
                subject: outlet,
                label: title,
                value: None,
                unit: String::new(),
                observed_at: published,
                raw_reference: json!({ "url": a.url }),
            });
        }
        out.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        Ok(out)
    }
}
