// tests/common/mod.rs
// Shared stubs for integration tests: scripted model backend, fixed and failing adapters.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;

use prediction_question_generator::clock::{ManualClock, SharedClock};
use prediction_question_generator::error::PipelineError;
use prediction_question_generator::generate::backend::{ChatMessage, ModelBackend, SharedBackend};
use prediction_question_generator::ingest::types::{
    Capabilities, SourceAdapter, SourceId, SourceQuery, SourceRecord,
};

/// 2026-06-01 08:00 UTC. Every fixture is dated relative to this.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

pub fn manual_clock() -> (Arc<ManualClock>, SharedClock) {
    let c = Arc::new(ManualClock::new(t0()));
    let shared: SharedClock = c.clone();
    (c, shared)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{name}"))
        .unwrap_or_else(|e| panic!("missing tests/fixtures/{name}: {e}"))
}

pub fn record(source_id: SourceId, metric: &str, subject: &str, value: f64) -> SourceRecord {
    SourceRecord {
        source_id,
        metric_name: metric.to_string(),
        subject: subject.to_string(),
        label: subject.to_string(),
        value: Some(value),
        unit: "USD".to_string(),
        observed_at: t0() - chrono::Duration::hours(8),
        raw_reference: serde_json::Value::Null,
    }
}

pub fn btc_record() -> SourceRecord {
    record(SourceId::CoinMarketCap, "price", "BTC", 68_250.5)
}

/// One candidate shaped like a model answer for the crypto category.
/// Slots resolve 30 days apart, so distinct slots never read as the same question.
pub fn crypto_candidate(threshold: u32, slot: u32) -> serde_json::Value {
    let date = slot_date(slot).format("%Y/%m/%d").to_string();
    json!({
        "question": format!("Will BTC trade above ${threshold} on {date}?"),
        "timeframe": date,
        "category": "cryptocurrency",
        "metric": "price_target",
        "target_value": format!("${threshold}"),
        "measurement_source": "CoinMarketCap"
    })
}

/// Resolution date of a candidate slot: 2026-06-02 plus 30 days per slot.
pub fn slot_date(slot: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 2).unwrap() + chrono::Duration::days(30 * i64::from(slot))
}

/// A response with `n` distinct valid crypto candidates, numbered from `start`.
pub fn crypto_batch(start: u32, n: u32) -> String {
    let items: Vec<serde_json::Value> = (0..n)
        .map(|i| crypto_candidate(60_000 + (start + i) * 1_000, start + i))
        .collect();
    serde_json::to_string(&items).unwrap()
}

/// Adapter that returns a fixed result and counts calls.
pub struct FixedAdapter {
    pub id: SourceId,
    pub result: Result<Vec<SourceRecord>, PipelineError>,
    pub calls: AtomicUsize,
}

impl FixedAdapter {
    pub fn ok(id: SourceId, records: Vec<SourceRecord>) -> Arc<Self> {
        Arc::new(Self {
            id,
            result: Ok(records),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: SourceId, cause: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            result: Err(PipelineError::source_unavailable(id, cause)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FixedAdapter {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn fetch(&self, _query: &SourceQuery) -> Result<Vec<SourceRecord>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Model backend that replays scripted responses in order.
/// An `Err` entry simulates a provider failure; an exhausted script fails too.
pub struct StubBackend {
    script: Mutex<VecDeque<Result<String, String>>>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    pub calls: AtomicUsize,
    concurrent: bool,
    max_batch: Option<usize>,
    delay: Option<Duration>,
}

impl StubBackend {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            concurrent: true,
            max_batch: None,
            delay: None,
        }
    }

    pub fn replies(texts: Vec<String>) -> Self {
        Self::new(texts.into_iter().map(Ok).collect())
    }

    pub fn sequential_only(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn with_max_batch(mut self, n: usize) -> Self {
        self.max_batch = Some(n);
        self
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> (Arc<Self>, SharedBackend) {
        let a = Arc::new(self);
        let b: SharedBackend = a.clone();
        (a, b)
    }
}

#[async_trait]
impl ModelBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn model_id(&self) -> &str {
        "stub-model"
    }

    fn supports_concurrency(&self) -> bool {
        self.concurrent
    }

    fn max_batch_size(&self) -> Option<usize> {
        self.max_batch
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(messages.to_vec());
        let next = self.script.lock().pop_front();
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(cause)) => bail!(cause),
            None => bail!("stub script exhausted"),
        }
    }
}

pub fn today() -> NaiveDate {
    t0().date_naive()
}
