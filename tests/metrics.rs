// tests/metrics.rs
#![cfg(feature = "strict-metrics")] // installs the global recorder; run with `--features strict-metrics`

mod common;

use std::sync::Arc;
use std::time::Duration;

use prediction_question_generator::cache::{MemoryCacheStore, SharedCache};
use prediction_question_generator::config::GeneratorConfig;
use prediction_question_generator::ingest::types::{SourceAdapter, SourceId, SourceQuery};
use prediction_question_generator::ingest::providers::fred::FredProvider;
use prediction_question_generator::ingest::{http_client, CachedSource};
use prediction_question_generator::metrics::Metrics;
use prediction_question_generator::orchestrator::ConcurrencyMode;
use prediction_question_generator::pipeline::build_orchestrator;

use common::{btc_record, crypto_batch, manual_clock, FixedAdapter, StubBackend};

#[tokio::test]
async fn run_emits_pipeline_series() {
    let config = GeneratorConfig::default();
    let metrics = Metrics::init(&config).expect("recorder installs once per test binary");

    let (_c, clock) = manual_clock();
    let adapters: Vec<Arc<dyn SourceAdapter>> =
        vec![FixedAdapter::ok(SourceId::CoinMarketCap, vec![btc_record()])];
    let mut bad = serde_json::from_str::<Vec<serde_json::Value>>(&crypto_batch(0, 2)).unwrap();
    bad[1]["timeframe"] = serde_json::json!("yesterday");
    let (_stub, backend) = StubBackend::replies(vec![
        serde_json::to_string(&bad).unwrap(),
        crypto_batch(5, 1),
    ])
    .shared();

    let report = build_orchestrator(&config, adapters, backend, clock.clone())
        .unwrap()
        .run(2, 2, ConcurrencyMode::Sequential)
        .await;
    assert_eq!(report.delivered, 2);

    // Source counters come from the caching wrapper.
    let cache: SharedCache = Arc::new(MemoryCacheStore::new(clock.clone()));
    let unreachable = FredProvider::new("k", http_client(Duration::from_millis(200)).unwrap())
        .with_base_url("http://127.0.0.1:9");
    let err = CachedSource::new(unreachable, cache, clock)
        .fetch(&SourceQuery::default())
        .await;
    assert!(err.is_err());

    let text = metrics.render();
    for needle in [
        "generation_batches_total",
        "generation_retries_total",
        "questions_rejected_total",
        "questions_delivered_total",
        "model_call_ms",
        "source_fetch_total",
        "source_errors_total",
        "run_questions_requested",
    ] {
        assert!(text.contains(needle), "missing {needle} in:\n{text}");
    }
}
