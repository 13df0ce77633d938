// src/ingest/types.rs
use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// External data providers. Also the cache namespace of each provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Fred,
    Acled,
    CoinMarketCap,
    Eodhd,
    NewsApi,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::Fred,
        SourceId::Acled,
        SourceId::CoinMarketCap,
        SourceId::Eodhd,
        SourceId::NewsApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Fred => "fred",
            SourceId::Acled => "acled",
            SourceId::CoinMarketCap => "coinmarketcap",
            SourceId::Eodhd => "eodhd",
            SourceId::NewsApi => "newsapi",
        }
    }

    /// Question category this source grounds. News only feeds prompt context.
    pub fn category(&self) -> Option<Category> {
        match self {
            SourceId::Fred => Some(Category::Economic),
            SourceId::Acled => Some(Category::Social),
            SourceId::CoinMarketCap => Some(Category::Crypto),
            SourceId::Eodhd => Some(Category::Financial),
            SourceId::NewsApi => None,
        }
    }

    /// Names a question may give as `measurement_source`. The first one is canonical.
    pub fn measurement_names(&self) -> &'static [&'static str] {
        match self {
            SourceId::Fred => &[
                "FRED database",
                "FRED",
                "Federal Reserve",
                "BLS initial CPI release",
                "BEA initial GDP release",
            ],
            SourceId::Acled => &["ACLED database", "ACLED"],
            SourceId::CoinMarketCap => &["CoinMarketCap", "CMC"],
            SourceId::Eodhd => &["EOD Historical Data", "EODHD"],
            SourceId::NewsApi => &["NewsAPI"],
        }
    }

    pub fn canonical_measurement_name(&self) -> &'static str {
        self.measurement_names()[0]
    }

    /// Case-insensitive lookup of a `measurement_source` string.
    pub fn resolve_measurement_source(name: &str) -> Option<SourceId> {
        let needle = name.trim();
        SourceId::ALL.into_iter().find(|id| {
            id.measurement_names()
                .iter()
                .any(|n| n.eq_ignore_ascii_case(needle))
        })
    }

    /// Source grounding a category.
    pub fn for_category(category: Category) -> SourceId {
        match category {
            Category::Economic => SourceId::Fred,
            Category::Social => SourceId::Acled,
            Category::Crypto => SourceId::CoinMarketCap,
            Category::Financial => SourceId::Eodhd,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Question categories. Wire names match the JSON output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "economic_indicator", alias = "economic")]
    Economic,
    #[serde(rename = "social_events", alias = "social")]
    Social,
    #[serde(rename = "cryptocurrency", alias = "crypto")]
    Crypto,
    #[serde(rename = "financial_market", alias = "financial", alias = "stocks")]
    Financial,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Economic,
        Category::Social,
        Category::Crypto,
        Category::Financial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Economic => "economic_indicator",
            Category::Social => "social_events",
            Category::Crypto => "cryptocurrency",
            Category::Financial => "financial_market",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "economic_indicator" | "economic" => Some(Category::Economic),
            "social_events" | "social" => Some(Category::Social),
            "cryptocurrency" | "crypto" => Some(Category::Crypto),
            "financial_market" | "financial" | "stocks" => Some(Category::Financial),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ACLED event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "Battles")]
    Battles,
    #[serde(rename = "Explosions/Remote violence")]
    ExplosionsRemoteViolence,
    #[serde(rename = "Violence against civilians")]
    ViolenceAgainstCivilians,
    #[serde(rename = "Protests")]
    Protests,
    #[serde(rename = "Riots")]
    Riots,
    #[serde(rename = "Strategic developments")]
    StrategicDevelopments,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Battles,
        EventType::ExplosionsRemoteViolence,
        EventType::ViolenceAgainstCivilians,
        EventType::Protests,
        EventType::Riots,
        EventType::StrategicDevelopments,
    ];

    pub fn acled_name(&self) -> &'static str {
        match self {
            EventType::Battles => "Battles",
            EventType::ExplosionsRemoteViolence => "Explosions/Remote violence",
            EventType::ViolenceAgainstCivilians => "Violence against civilians",
            EventType::Protests => "Protests",
            EventType::Riots => "Riots",
            EventType::StrategicDevelopments => "Strategic developments",
        }
    }

    pub fn metric_name(&self) -> &'static str {
        match self {
            EventType::Battles => "battle_count",
            EventType::ExplosionsRemoteViolence => "explosion_count",
            EventType::ViolenceAgainstCivilians => "civilian_violence_count",
            EventType::Protests => "protest_count",
            EventType::Riots => "riot_count",
            EventType::StrategicDevelopments => "strategic_development_count",
        }
    }

    pub fn from_acled(s: &str) -> Option<EventType> {
        let s = s.trim();
        EventType::ALL
            .into_iter()
            .find(|e| e.acled_name().eq_ignore_ascii_case(s))
    }
}

/// Normalized observation produced by a source adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub metric_name: String,
    /// Symbol, ISO3 country, series id or outlet the value belongs to.
    pub subject: String,
    /// Human-readable name (asset name, series title, headline text).
    pub label: String,
    /// `None` for records without a numeric reading (headlines).
    pub value: Option<f64>,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
    pub raw_reference: serde_json::Value,
}

/// What an adapter can do with a `SourceQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub supports_filtering: bool,
    pub supports_date_range: bool,
}

/// Filters handed to an adapter. Each adapter reads only the fields it supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceQuery {
    #[serde(default)]
    pub symbols: BTreeSet<String>,
    #[serde(default)]
    pub countries: BTreeSet<String>,
    #[serde(default)]
    pub event_types: BTreeSet<EventType>,
    #[serde(default)]
    pub indicators: BTreeSet<String>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub news_category: Option<String>,
    /// Economic observation window, conflict date range or news recency, in days.
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

/// Inclusive calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// `days` back from today, today included. Clamped to the earliest representable date.
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        Self {
            start: days_before(today, days),
            end: today,
        }
    }

    /// Window that ends yesterday and spans `days` days back from there.
    /// `None` when `days == 0`: nothing to look at.
    pub fn ending_yesterday(today: NaiveDate, days: u32) -> Option<Self> {
        if days == 0 {
            return None;
        }
        let end = days_before(today, 1);
        Some(Self {
            start: days_before(end, days),
            end,
        })
    }
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Low-level provider: talks to one external API. Kept separate from the caching
/// wrapper so the same wrapper serves production providers and test stubs.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    type Raw: Send;

    fn source_id(&self) -> SourceId;

    fn capabilities(&self) -> Capabilities;

    /// The request-shaping params, normalized (sorted, case-folded) for the cache key.
    fn cache_params(&self, query: &SourceQuery, now: DateTime<Utc>) -> String;

    async fn fetch(&self, query: &SourceQuery, now: DateTime<Utc>) -> Result<Self::Raw>;

    fn normalize(
        &self,
        query: &SourceQuery,
        raw: Self::Raw,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>>;
}

/// What the aggregator sees: a cache-checked fetch that fails with `SourceUnavailable`.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> SourceId;

    fn capabilities(&self) -> Capabilities;

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, PipelineError>;
}
