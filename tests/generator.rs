// tests/generator.rs
// One batch through the generator with a scripted backend.
mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use prediction_question_generator::aggregate::ContextBundle;
use prediction_question_generator::error::PipelineError;
use prediction_question_generator::generate::question::Rejection;
use prediction_question_generator::generate::{
    category_weights, GenerationRequest, GeneratorSettings, QuestionGenerator,
};
use prediction_question_generator::ingest::types::{Category, SourceId};

use common::{btc_record, crypto_candidate, manual_clock, record, StubBackend};

fn crypto_bundle() -> Arc<ContextBundle> {
    let mut b = ContextBundle::default();
    b.records.insert(
        Category::Crypto,
        vec![btc_record(), record(SourceId::CoinMarketCap, "price", "ETH", 3512.75)],
    );
    b.records.insert(Category::Social, Vec::new());
    b.empty_categories.insert(Category::Social);
    Arc::new(b)
}

fn request(bundle: Arc<ContextBundle>, size: usize) -> GenerationRequest {
    GenerationRequest {
        batch_index: 0,
        batch_size: size,
        category: None,
        category_weights: category_weights(&bundle),
        model_id: "stub-model".to_string(),
        context: bundle,
    }
}

fn generator(stub: StubBackend) -> (Arc<StubBackend>, QuestionGenerator) {
    let (_c, clock) = manual_clock();
    let (handle, backend) = stub.shared();
    (handle, QuestionGenerator::new(backend, clock, GeneratorSettings::default()))
}

#[tokio::test]
async fn missing_target_leaves_one_slot_short_after_a_single_retry() {
    let mut bad = crypto_candidate(75_000, 10);
    bad.as_object_mut().unwrap().remove("target_value");
    let first = json!([crypto_candidate(70_000, 5), bad]).to_string();
    let (stub, gen) = generator(StubBackend::replies(vec![first, "[]".to_string()]));

    let out = gen.generate(&request(crypto_bundle(), 2)).await.unwrap();

    assert_eq!(out.category, Category::Crypto);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.shortfall, 1);
    assert!(out.retried);
    assert_eq!(out.rejections, vec![Rejection::MissingField("target_value")]);
    assert_eq!(stub.calls(), 2, "exactly one corrective call");

    let seen = stub.seen.lock();
    let retry = &seen[1];
    assert_eq!(retry.len(), 4);
    assert_eq!(retry[2].role, "assistant");
    assert!(retry[3].content.contains("exactly 1 replacement question "));
    assert!(retry[3].content.contains("missing field `target_value`"));
}

#[tokio::test]
async fn corrective_retry_can_fill_the_gap() {
    let first = json!([crypto_candidate(70_000, 5), {"question": "Will it rain?"}]).to_string();
    let second = json!([crypto_candidate(72_000, 6)]).to_string();
    let (_stub, gen) = generator(StubBackend::replies(vec![first, second]));

    let out = gen.generate(&request(crypto_bundle(), 2)).await.unwrap();
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.shortfall, 0);
    assert_eq!(out.records[1].target_value, 72_000.0);
    assert_eq!(out.records[1].measurement_source, "CoinMarketCap");
    assert_eq!(out.records[1].metric, "price_target");
}

#[tokio::test]
async fn a_full_first_answer_needs_no_retry() {
    let text = format!(
        "Here are your questions:\n```json\n{}\n```",
        json!([crypto_candidate(70_000, 5), crypto_candidate(80_000, 6)])
    );
    let (stub, gen) = generator(StubBackend::replies(vec![text]));
    let out = gen.generate(&request(crypto_bundle(), 2)).await.unwrap();
    assert!(!out.retried);
    assert_eq!(out.records.len(), 2);
    assert_eq!(stub.calls(), 1);

    let prompt = &stub.seen.lock()[0][1].content;
    assert!(prompt.contains("cryptocurrency"));
    assert!(prompt.contains("(BTC)"));
}

#[tokio::test]
async fn repeated_question_in_a_batch_is_rejected() {
    let c = crypto_candidate(70_000, 5);
    let (_stub, gen) = generator(StubBackend::replies(vec![
        json!([c.clone(), c]).to_string(),
        "no json here".to_string(),
    ]));
    let out = gen.generate(&request(crypto_bundle(), 2)).await.unwrap();
    assert_eq!(out.records.len(), 1);
    assert!(out.rejections.contains(&Rejection::Duplicate));
}

#[tokio::test]
async fn past_dates_and_unavailable_categories_are_rejected() {
    let mut past = crypto_candidate(70_000, 5);
    past["timeframe"] = json!("2026/05/01");
    let social = json!({
        "question": "Will protests in USA exceed 10 by 2026/07/01?",
        "timeframe": "2026/07/01",
        "category": "social_events",
        "metric": "protest_count",
        "target_value": 10,
        "measurement_source": "ACLED database"
    });
    let (_stub, gen) = generator(StubBackend::replies(vec![
        json!([past, social, crypto_candidate(70_000, 5)]).to_string(),
    ]));
    let out = gen.generate(&request(crypto_bundle(), 3)).await.unwrap();
    assert_eq!(out.records.len(), 1);
    assert!(out.records[0].timeframe > common::today());
    let kinds: Vec<&str> = out.rejections.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec!["timeframe_past", "unavailable_category"]);
}

#[tokio::test]
async fn far_off_target_is_out_of_grounding_range() {
    let wild = crypto_candidate(9_000_000, 5);
    let (_stub, gen) = generator(StubBackend::replies(vec![json!([wild]).to_string(), "[]".into()]));
    let err = gen.generate(&request(crypto_bundle(), 1)).await.unwrap_err();
    assert!(matches!(err, PipelineError::GenerationFailed { batch_index: 0, .. }));
}

#[tokio::test]
async fn backend_failure_is_generation_failed() {
    let (stub, gen) = generator(StubBackend::new(vec![Err("quota exceeded".to_string())]));
    let err = gen.generate(&request(crypto_bundle(), 3)).await.unwrap_err();
    match err {
        PipelineError::GenerationFailed { batch_index, cause } => {
            assert_eq!(batch_index, 0);
            assert!(cause.contains("quota exceeded"));
        }
        other => panic!("unexpected: {other}"),
    }
    assert_eq!(stub.calls(), 1, "no retry when the first call fails");
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out() {
    let (_c, clock) = manual_clock();
    let (_stub, backend) = StubBackend::replies(vec![json!([crypto_candidate(70_000, 5)]).to_string()])
        .with_delay(Duration::from_secs(30))
        .shared();
    let settings = GeneratorSettings {
        model_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let gen = QuestionGenerator::new(backend, clock, settings);
    let err = gen.generate(&request(crypto_bundle(), 1)).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test]
async fn empty_context_fails_without_calling_the_model() {
    let bundle = Arc::new(ContextBundle::default());
    let (stub, gen) = generator(StubBackend::replies(Vec::new()));
    let req = GenerationRequest {
        category_weights: BTreeMap::new(),
        ..request(bundle, 2)
    };
    assert!(gen.generate(&req).await.is_err());
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn near_target_on_the_same_date_is_a_duplicate_in_the_batch() {
    let (_stub, gen) = generator(StubBackend::replies(vec![
        json!([crypto_candidate(70_000, 5), crypto_candidate(71_000, 5)]).to_string(),
        json!([crypto_candidate(90_000, 5)]).to_string(),
    ]));
    let out = gen.generate(&request(crypto_bundle(), 2)).await.unwrap();
    let targets: Vec<f64> = out.records.iter().map(|r| r.target_value).collect();
    assert_eq!(targets, vec![70_000.0, 90_000.0]);
    assert!(out.rejections.contains(&Rejection::Duplicate));
    assert!(out.retried);
}
