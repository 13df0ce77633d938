// src/pipeline.rs
//! Wiring: configuration and credentials in, a ready orchestrator out.

use std::sync::Arc;

use crate::aggregate::Aggregator;
use crate::cache::{FileCacheStore, SharedCache};
use crate::clock::SharedClock;
use crate::config::{Credentials, GeneratorConfig};
use crate::error::PipelineError;
use crate::generate::backend::{build_backend, SharedBackend};
use crate::generate::{GeneratorSettings, QuestionGenerator};
use crate::ingest::http_client;
use crate::ingest::providers::acled::{AcledProvider, DEFAULT_PAGE_LIMIT};
use crate::ingest::providers::coinmarketcap::CoinMarketCapProvider;
use crate::ingest::providers::eodhd::EodhdProvider;
use crate::ingest::providers::fred::FredProvider;
use crate::ingest::providers::newsapi::NewsApiProvider;
use crate::ingest::types::{SourceAdapter, SourceProvider};
use crate::ingest::CachedSource;
use crate::orchestrator::{Orchestrator, RunReport};

fn cached<P>(provider: P, config: &GeneratorConfig, cache: &SharedCache, clock: &SharedClock) -> Arc<dyn SourceAdapter>
where
    P: SourceProvider + 'static,
{
    let ttl = config.ttl_for(provider.source_id());
    Arc::new(CachedSource::new(provider, cache.clone(), clock.clone()).with_ttl(ttl))
}

/// One adapter per source that has credentials. Sources without a key are
/// left out and later reported by the aggregator as "not configured".
pub fn build_adapters(
    config: &GeneratorConfig,
    creds: &Credentials,
    cache: SharedCache,
    clock: SharedClock,
) -> Result<Vec<Arc<dyn SourceAdapter>>, PipelineError> {
    let client = http_client(config.http_timeout()).map_err(|e| PipelineError::config(format!("{e:#}")))?;
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    match creds.fred_api_key.as_deref() {
        Some(key) => out.push(cached(FredProvider::new(key, client.clone()), config, &cache, &clock)),
        None => tracing::warn!("FRED_API_KEY missing; economic indicators disabled"),
    }
    match creds.acled() {
        Some((key, email)) => {
            let provider = AcledProvider::new(key, email, client.clone())
                .with_paging(DEFAULT_PAGE_LIMIT, config.acled_max_pages);
            out.push(cached(provider, config, &cache, &clock));
        }
        None => tracing::warn!("ACLED_API_KEY / ACLED_EMAIL missing; social events disabled"),
    }
    if config.include_crypto {
        match creds.coinmarketcap_api_key.as_deref() {
            Some(key) => out.push(cached(CoinMarketCapProvider::new(key, client.clone()), config, &cache, &clock)),
            None => tracing::warn!("COINMARKETCAP_API_KEY missing; crypto disabled"),
        }
    }
    if config.include_stocks {
        match creds.eodhd_api_key.as_deref() {
            Some(key) => out.push(cached(EodhdProvider::new(key, client.clone()), config, &cache, &clock)),
            None => tracing::warn!("EODHD_API_KEY missing; stocks disabled"),
        }
    }
    if config.news.enabled {
        match creds.news_api_key.as_deref() {
            Some(key) => out.push(cached(NewsApiProvider::new(key, client.clone()), config, &cache, &clock)),
            None => tracing::info!("NEWS_API_KEY missing; prompts go without headlines"),
        }
    }

    let ids: Vec<&str> = out.iter().map(|a| a.source_id().as_str()).collect();
    tracing::info!(sources = ?ids, "adapters ready");
    Ok(out)
}

pub fn generator_settings(config: &GeneratorConfig) -> GeneratorSettings {
    GeneratorSettings {
        model_timeout: config.model_timeout(),
        max_horizon_days: config.max_horizon_days,
        grounding: config.grounding,
        similarity_threshold: config.dedup_similarity,
        near_target: config.near_target(),
    }
}

/// Assemble the orchestrator from explicit parts. Tests pass stub adapters
/// and a stub backend here.
pub fn build_orchestrator(
    config: &GeneratorConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    backend: SharedBackend,
    clock: SharedClock,
) -> Result<Orchestrator, PipelineError> {
    config.validate()?;
    let filters = config.category_filters()?;
    let aggregator = Arc::new(Aggregator::new(adapters, clock.clone()));
    let generator = Arc::new(QuestionGenerator::new(backend, clock, generator_settings(config)));
    Ok(Orchestrator::new(aggregator, generator, filters))
}

/// Full run against the real providers and the configured model.
pub async fn run_pipeline(
    config: &GeneratorConfig,
    creds: &Credentials,
    clock: SharedClock,
) -> Result<RunReport, PipelineError> {
    config.validate()?;
    let backend = build_backend(config.model, creds, config.model_timeout())?;
    let cache: SharedCache = Arc::new(FileCacheStore::new(config.cache_dir.clone(), clock.clone()));
    let adapters = build_adapters(config, creds, cache, clock.clone())?;
    let orchestrator = build_orchestrator(config, adapters, backend, clock)?;
    Ok(orchestrator
        .run(config.questions, config.batch_size, config.concurrency_mode())
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::clock::SystemClock;
    use crate::ingest::types::SourceId;

    fn creds_all() -> Credentials {
        Credentials {
            fred_api_key: Some("f".into()),
            acled_api_key: Some("a".into()),
            acled_email: Some("a@example.org".into()),
            coinmarketcap_api_key: Some("c".into()),
            eodhd_api_key: Some("e".into()),
            news_api_key: Some("n".into()),
            ..Default::default()
        }
    }

    fn ids(config: &GeneratorConfig, creds: &Credentials) -> Vec<SourceId> {
        let clock: SharedClock = Arc::new(SystemClock);
        let cache: SharedCache = Arc::new(MemoryCacheStore::new(clock.clone()));
        let mut v: Vec<SourceId> = build_adapters(config, creds, cache, clock)
            .unwrap()
            .iter()
            .map(|a| a.source_id())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn every_credentialed_source_gets_an_adapter() {
        let v = ids(&GeneratorConfig::default(), &creds_all());
        assert_eq!(v, SourceId::ALL.to_vec());
    }

    #[test]
    fn missing_keys_and_toggles_drop_adapters() {
        let mut creds = creds_all();
        creds.acled_email = None;
        let mut config = GeneratorConfig::default();
        config.include_stocks = false;
        let v = ids(&config, &creds);
        assert_eq!(v, vec![SourceId::Fred, SourceId::CoinMarketCap, SourceId::NewsApi]);
    }
}
