// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::cache::{get_json, put_json, SharedCache};
use crate::clock::SharedClock;
use crate::error::PipelineError;
use crate::ingest::types::{
    Capabilities, SourceAdapter, SourceId, SourceProvider, SourceQuery, SourceRecord,
};

/// Default freshness for every source unless configured otherwise.
pub const DEFAULT_TTL_SECS: u64 = 24 * 3600;

const USER_AGENT: &str = "prediction-question-generator/0.1";

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "source_fetch_total",
            "Provider calls made after a cache miss."
        );
        describe_counter!(
            "source_errors_total",
            "Provider fetch/normalize failures surfaced as SourceUnavailable."
        );
        describe_counter!("source_records_total", "Records produced by providers.");
        describe_counter!("cache_hits_total", "Fresh cache entries served.");
        describe_counter!(
            "cache_misses_total",
            "Lookups that found nothing fresh (absent, expired or corrupt)."
        );
        describe_counter!(
            "cache_corrupt_total",
            "Cache entries that failed to deserialize."
        );
        describe_histogram!("source_fetch_ms", "Provider fetch + normalize time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 300 chars (headlines only)
    if out.chars().count() > 300 {
        out = out.chars().take(300).collect();
    }

    out
}

/// Shared HTTP client for providers: fixed user agent, bounded connect and total time.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5).min(timeout))
        .timeout(timeout)
        .build()
        .context("building provider http client")
}

/// Turn a non-2xx response into an error carrying the status and a short body excerpt.
pub async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(anyhow!("http {status}: {excerpt}"))
}

/// Lenient float parsing for provider payloads ("NA", "", "." and null read as missing).
pub fn parse_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.is_empty() || t == "." || t.eq_ignore_ascii_case("na") {
                None
            } else {
                t.replace(',', "").parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
        _ => None,
    }
}

/// Cache-checked adapter around a provider:
/// key → cache hit, or fetch → normalize → store with the source TTL.
pub struct CachedSource<P: SourceProvider> {
    inner: P,
    cache: SharedCache,
    clock: SharedClock,
    ttl_seconds: u64,
}

impl<P: SourceProvider> CachedSource<P> {
    pub fn new(inner: P, cache: SharedCache, clock: SharedClock) -> Self {
        ensure_metrics_described();
        Self {
            inner,
            cache,
            clock,
            ttl_seconds: DEFAULT_TTL_SECS,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn cache_key(&self, query: &SourceQuery, now: DateTime<Utc>) -> String {
        format!(
            "{}|{}",
            self.inner.source_id(),
            self.inner.cache_params(query, now)
        )
    }

    /// Store reads and writes touch the filesystem; they run on the blocking pool.
    async fn cached_records(&self, ns: &'static str, key: &str) -> Option<Vec<SourceRecord>> {
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        let read = tokio::task::spawn_blocking(move || {
            get_json::<Vec<SourceRecord>>(cache.as_ref(), ns, &key)
        });
        match read.await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, namespace = ns, "cache read task failed");
                None
            }
        }
    }

    async fn store_records(
        &self,
        ns: &'static str,
        key: &str,
        records: &[SourceRecord],
    ) -> std::io::Result<()> {
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        let records = records.to_vec();
        let ttl = self.ttl_seconds;
        tokio::task::spawn_blocking(move || put_json(cache.as_ref(), ns, &key, &records, ttl))
            .await
            .map_err(std::io::Error::other)?
    }

    async fn fetch_fresh(
        &self,
        query: &SourceQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let raw = self.inner.fetch(query, now).await?;
        self.inner.normalize(query, raw, now)
    }
}

#[async_trait::async_trait]
impl<P: SourceProvider> SourceAdapter for CachedSource<P> {
    fn source_id(&self) -> SourceId {
        self.inner.source_id()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, PipelineError> {
        let id = self.inner.source_id();
        let ns = id.as_str();
        let now = self.clock.now();
        let key = self.cache_key(query, now);

        if let Some(hit) = self.cached_records(ns, &key).await {
            tracing::debug!(source = %id, records = hit.len(), "cache hit");
            return Ok(hit);
        }

        counter!("source_fetch_total", "source" => ns).increment(1);
        let t0 = Instant::now();
        let records = match self.fetch_fresh(query, now).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = ?e, source = %id, "provider error");
                counter!("source_errors_total", "source" => ns).increment(1);
                return Err(PipelineError::source_unavailable(id, format!("{e:#}")));
            }
        };
        histogram!("source_fetch_ms", "source" => ns).record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("source_records_total", "source" => ns).increment(records.len() as u64);

        if let Err(e) = self.store_records(ns, &key, &records).await {
            // Records are still good; only the next run pays for the refetch.
            tracing::warn!(error = %e, source = %id, "cache write failed");
        }

        tracing::info!(source = %id, records = records.len(), "fetched");
        Ok(records)
    }
}
