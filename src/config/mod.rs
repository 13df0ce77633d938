// src/config/mod.rs
//! Runtime configuration: TOML file plus environment credentials.

pub mod credentials;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::CategoryFilters;
use crate::error::PipelineError;
use crate::generate::backend::ModelChoice;
use crate::generate::dedup::{
    NearTarget, DEFAULT_SIMILARITY, DEFAULT_TARGET_TOLERANCE, DEFAULT_WINDOW_DAYS,
};
use crate::generate::question::GroundingPolicy;
use crate::ingest::types::{Category, EventType, SourceId, SourceQuery};
use crate::ingest::DEFAULT_TTL_SECS;
use crate::orchestrator::ConcurrencyMode;

pub use credentials::Credentials;

pub const DEFAULT_CONFIG_PATH: &str = "config/generator.toml";
pub const ENV_CONFIG_PATH: &str = "QGEN_CONFIG_PATH";

/// Upper bound for every day-count setting (lookbacks, recency, horizon).
pub const MAX_DAYS: u32 = 36_500;
/// Upper bound for a cache TTL override: ten years.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsSettings {
    pub enabled: bool,
    pub keywords: BTreeSet<String>,
    pub category: String,
    pub recency_days: u32,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: BTreeSet::new(),
            category: "business".to_string(),
            recency_days: 1,
        }
    }
}

/// Immutable run configuration. Missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub questions: usize,
    pub batch_size: usize,
    pub model: ModelChoice,
    pub include_crypto: bool,
    pub crypto_symbols: BTreeSet<String>,
    pub include_stocks: bool,
    pub stock_symbols: BTreeSet<String>,
    /// ISO 3166-1 alpha-3 codes.
    pub countries: BTreeSet<String>,
    /// ACLED event type names, e.g. "Protests".
    pub event_types: BTreeSet<String>,
    /// Conflict-event window in days. 0 means no conflict data.
    pub lookback_days: u32,
    pub parallel: bool,
    pub worker_limit: usize,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub economic_lookback_days: u32,
    /// FRED series ids; empty means the built-in indicator set.
    pub indicators: BTreeSet<String>,
    pub news: NewsSettings,
    pub max_horizon_days: u32,
    pub model_timeout_secs: u64,
    pub http_timeout_secs: u64,
    /// Per-source TTL overrides in seconds, keyed by source id.
    pub cache_ttl_secs: BTreeMap<String, u64>,
    pub acled_max_pages: u32,
    pub grounding: GroundingPolicy,
    pub dedup_similarity: f64,
    /// Same category and metric with targets closer than this fraction and
    /// timeframes less than `dedup_window_days` apart count as one question. 0 disables.
    pub dedup_target_tolerance: f64,
    pub dedup_window_days: u32,
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            questions: 30,
            batch_size: 30,
            model: ModelChoice::RemoteV1,
            include_crypto: true,
            crypto_symbols: set(&["BTC", "ETH", "BNB", "TAO"]),
            include_stocks: true,
            stock_symbols: set(&["AAPL", "MSFT", "GOOGL"]),
            countries: set(&["USA", "GBR", "FRA"]),
            event_types: set(&["Protests", "Violence against civilians"]),
            lookback_days: 90,
            parallel: false,
            worker_limit: 4,
            cache_dir: PathBuf::from("cache"),
            output_dir: PathBuf::from("output"),
            economic_lookback_days: 365,
            indicators: BTreeSet::new(),
            news: NewsSettings::default(),
            max_horizon_days: 365,
            model_timeout_secs: 120,
            http_timeout_secs: 30,
            cache_ttl_secs: BTreeMap::new(),
            acled_max_pages: 10,
            grounding: GroundingPolicy::default(),
            dedup_similarity: DEFAULT_SIMILARITY,
            dedup_target_tolerance: DEFAULT_TARGET_TOLERANCE,
            dedup_window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

fn is_iso3(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

impl GeneratorConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read generator config at {}: {}", path.display(), e))?;
        Self::from_toml_str(&data)
            .map_err(|e| anyhow::anyhow!("Failed to parse generator config at {}: {}", path.display(), e))
    }

    /// `$QGEN_CONFIG_PATH`, else `config/generator.toml`; a missing file means defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(&path)
    }

    pub fn event_type_set(&self) -> Result<BTreeSet<EventType>, PipelineError> {
        self.event_types
            .iter()
            .map(|name| {
                EventType::from_acled(name)
                    .ok_or_else(|| PipelineError::config(format!("unknown event type `{name}`")))
            })
            .collect()
    }

    /// Fatal checks, run before any fetch.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.questions == 0 {
            return Err(PipelineError::config("questions must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size must be greater than 0"));
        }
        if self.include_crypto && self.crypto_symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(PipelineError::config("include_crypto is on but crypto_symbols is empty"));
        }
        if self.include_stocks && self.stock_symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(PipelineError::config("include_stocks is on but stock_symbols is empty"));
        }
        if let Some(bad) = self.countries.iter().find(|c| !is_iso3(c.trim())) {
            return Err(PipelineError::config(format!("`{bad}` is not an ISO3 country code")));
        }
        self.event_type_set()?;
        if self.parallel && self.worker_limit == 0 {
            return Err(PipelineError::config("worker_limit must be greater than 0"));
        }
        for (name, days) in [
            ("lookback_days", self.lookback_days),
            ("economic_lookback_days", self.economic_lookback_days),
            ("news.recency_days", self.news.recency_days),
            ("max_horizon_days", self.max_horizon_days),
        ] {
            if days > MAX_DAYS {
                return Err(PipelineError::config(format!("{name} must be at most {MAX_DAYS}")));
            }
        }
        let oversized = self.cache_ttl_secs.iter().find(|(_, ttl)| **ttl > MAX_TTL_SECS);
        if let Some((source, ttl)) = oversized {
            return Err(PipelineError::config(format!(
                "cache_ttl_secs.{source} = {ttl} exceeds {MAX_TTL_SECS}"
            )));
        }
        // Below 1.0 the band excludes the anchor itself.
        let ratio = self.grounding.max_ratio;
        if !ratio.is_finite() || ratio < 1.0 {
            return Err(PipelineError::config("grounding.max_ratio must be a finite value >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.dedup_similarity) {
            return Err(PipelineError::config("dedup_similarity must be within 0..=1"));
        }
        if !(0.0..1.0).contains(&self.dedup_target_tolerance) {
            return Err(PipelineError::config("dedup_target_tolerance must be within 0..1"));
        }
        Ok(())
    }

    pub fn near_target(&self) -> NearTarget {
        NearTarget {
            tolerance: self.dedup_target_tolerance,
            window_days: self.dedup_window_days,
        }
    }

    pub fn concurrency_mode(&self) -> ConcurrencyMode {
        if self.parallel {
            ConcurrencyMode::Parallel {
                worker_limit: self.worker_limit,
            }
        } else {
            ConcurrencyMode::Sequential
        }
    }

    pub fn ttl_for(&self, id: SourceId) -> u64 {
        self.cache_ttl_secs
            .get(id.as_str())
            .copied()
            .unwrap_or(DEFAULT_TTL_SECS)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    /// Per-category queries derived from the toggles and filters.
    pub fn category_filters(&self) -> Result<CategoryFilters, PipelineError> {
        let mut filters = CategoryFilters::default()
            .with_category(
                Category::Economic,
                SourceQuery {
                    indicators: self.indicators.clone(),
                    lookback_days: Some(self.economic_lookback_days),
                    ..Default::default()
                },
            )
            .with_category(
                Category::Social,
                SourceQuery {
                    countries: self.countries.iter().map(|c| c.trim().to_ascii_uppercase()).collect(),
                    event_types: self.event_type_set()?,
                    lookback_days: Some(self.lookback_days),
                    ..Default::default()
                },
            );
        if self.include_crypto {
            filters = filters.with_category(
                Category::Crypto,
                SourceQuery {
                    symbols: self.crypto_symbols.clone(),
                    ..Default::default()
                },
            );
        }
        if self.include_stocks {
            filters = filters.with_category(
                Category::Financial,
                SourceQuery {
                    symbols: self.stock_symbols.clone(),
                    ..Default::default()
                },
            );
        }
        if self.news.enabled {
            filters = filters.with_news(SourceQuery {
                keywords: self.news.keywords.clone(),
                news_category: Some(self.news.category.clone()),
                lookback_days: Some(self.news.recency_days),
                ..Default::default()
            });
        }
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = GeneratorConfig::default();
        c.validate().unwrap();
        let f = c.category_filters().unwrap();
        assert_eq!(f.categories.len(), 4);
        assert!(f.news.is_some());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = GeneratorConfig::from_toml_str(
            r#"
questions = 10
batch_size = 5
model = "local"
include_stocks = false

[grounding]
max_ratio = 3.0

[cache_ttl_secs]
coinmarketcap = 600
"#,
        )
        .unwrap();
        assert_eq!(c.questions, 10);
        assert_eq!(c.model, ModelChoice::Local);
        assert_eq!(c.grounding.max_ratio, 3.0);
        assert!(!c.grounding.require_anchor);
        assert_eq!(c.ttl_for(SourceId::CoinMarketCap), 600);
        assert_eq!(c.ttl_for(SourceId::Fred), DEFAULT_TTL_SECS);
        assert_eq!(c.lookback_days, 90);
        assert!(!c.category_filters().unwrap().categories.contains_key(&Category::Financial));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let cases: Vec<Box<dyn Fn(&mut GeneratorConfig)>> = vec![
            Box::new(|c| c.questions = 0),
            Box::new(|c| c.batch_size = 0),
            Box::new(|c| c.crypto_symbols.clear()),
            Box::new(|c| {
                c.countries.insert("US".into());
            }),
            Box::new(|c| {
                c.event_types.insert("Parades".into());
            }),
            Box::new(|c| {
                c.parallel = true;
                c.worker_limit = 0;
            }),
            Box::new(|c| c.grounding.max_ratio = 0.0),
            Box::new(|c| c.grounding.max_ratio = 0.5),
            Box::new(|c| c.grounding.max_ratio = f64::INFINITY),
            Box::new(|c| c.lookback_days = MAX_DAYS + 1),
            Box::new(|c| c.economic_lookback_days = 200_000_000),
            Box::new(|c| c.news.recency_days = u32::MAX),
            Box::new(|c| c.max_horizon_days = u32::MAX),
            Box::new(|c| {
                c.cache_ttl_secs.insert("fred".into(), 10_000_000_000_000_000);
            }),
            Box::new(|c| c.dedup_target_tolerance = 1.5),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut c = GeneratorConfig::default();
            mutate(&mut c);
            let err = c.validate().unwrap_err();
            assert!(err.is_fatal(), "case {i}");
        }
    }

    #[test]
    fn boundary_values_are_accepted() {
        let mut c = GeneratorConfig::default();
        c.grounding.max_ratio = 1.0;
        c.lookback_days = MAX_DAYS;
        c.economic_lookback_days = MAX_DAYS;
        c.cache_ttl_secs.insert("acled".into(), MAX_TTL_SECS);
        c.dedup_target_tolerance = 0.0;
        c.validate().unwrap();
    }

    #[test]
    fn crypto_toggle_off_allows_empty_symbols() {
        let mut c = GeneratorConfig::default();
        c.include_crypto = false;
        c.crypto_symbols.clear();
        c.validate().unwrap();
    }
}
