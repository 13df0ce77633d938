// tests/cache_store.rs
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use prediction_question_generator::cache::{
    get_json, put_json, CacheStore, FileCacheStore, MemoryCacheStore, SharedCache,
};
use prediction_question_generator::ingest::types::{
    Capabilities, SourceAdapter, SourceId, SourceProvider, SourceQuery, SourceRecord,
};
use prediction_question_generator::ingest::CachedSource;

use common::{manual_clock, record};

/// Provider that counts fetches; fails while `fail` is set.
struct CountingProvider {
    fetches: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl SourceProvider for CountingProvider {
    type Raw = Vec<SourceRecord>;

    fn source_id(&self) -> SourceId {
        SourceId::CoinMarketCap
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_filtering: true,
            supports_date_range: false,
        }
    }

    fn cache_params(&self, query: &SourceQuery, _now: DateTime<Utc>) -> String {
        let v: Vec<&str> = query.symbols.iter().map(String::as_str).collect();
        format!("symbols={}", v.join(","))
    }

    async fn fetch(&self, query: &SourceQuery, _now: DateTime<Utc>) -> Result<Self::Raw> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("upstream 503");
        }
        Ok(query
            .symbols
            .iter()
            .map(|s| record(SourceId::CoinMarketCap, "price", s, 100.0))
            .collect())
    }

    fn normalize(&self, _q: &SourceQuery, raw: Self::Raw, _now: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        Ok(raw)
    }
}

fn query(symbols: &[&str]) -> SourceQuery {
    SourceQuery {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[test]
fn entry_is_fresh_until_ttl_elapses() {
    let (clock, shared) = manual_clock();
    let store = MemoryCacheStore::new(shared);
    store.put("fred", "k", serde_json::json!([1]), 3600).unwrap();

    clock.advance(Duration::seconds(3599));
    assert_eq!(store.get("fred", "k"), Some(serde_json::json!([1])));

    clock.advance(Duration::seconds(1));
    assert!(store.get("fred", "k").is_none(), "entry at exactly ttl is expired");
}

#[test]
fn file_store_survives_a_new_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let (_clock, shared) = manual_clock();
    {
        let store = FileCacheStore::new(tmp.path(), shared.clone());
        put_json(&store, "eodhd", "symbols=AAPL.US", &vec![1.5_f64, 2.5], 600).unwrap();
    }
    let reopened = FileCacheStore::new(tmp.path(), shared);
    let v: Option<Vec<f64>> = get_json(&reopened, "eodhd", "symbols=AAPL.US");
    assert_eq!(v, Some(vec![1.5, 2.5]));
    assert!(reopened.get("eodhd", "symbols=MSFT.US").is_none());
}

#[test]
fn payload_of_the_wrong_shape_is_a_miss() {
    let (_clock, shared) = manual_clock();
    let store = MemoryCacheStore::new(shared);
    store.put("acled", "k", serde_json::json!({"not": "a list"}), 600).unwrap();
    let v: Option<Vec<SourceRecord>> = get_json(&store, "acled", "k");
    assert!(v.is_none());
}

#[tokio::test]
async fn cached_source_skips_the_provider_while_fresh() {
    let (clock, shared) = manual_clock();
    let cache: SharedCache = Arc::new(MemoryCacheStore::new(shared.clone()));
    let fetches = Arc::new(AtomicUsize::new(0));
    let src = CachedSource::new(
        CountingProvider {
            fetches: fetches.clone(),
            fail: false,
        },
        cache,
        shared,
    )
    .with_ttl(60);

    let q = query(&["BTC", "ETH"]);
    let first = src.fetch(&q).await.unwrap();
    let second = src.fetch(&q).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // Different filters are a different key.
    src.fetch(&query(&["BTC"])).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);

    clock.advance(Duration::seconds(61));
    src.fetch(&q).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 3, "expired entry is refetched");
}

#[tokio::test]
async fn provider_failure_is_source_unavailable_and_not_cached() {
    let (_clock, shared) = manual_clock();
    let store = Arc::new(MemoryCacheStore::new(shared.clone()));
    let cache: SharedCache = store.clone();
    let fetches = Arc::new(AtomicUsize::new(0));
    let src = CachedSource::new(
        CountingProvider {
            fetches: fetches.clone(),
            fail: true,
        },
        cache,
        shared,
    );

    let err = src.fetch(&query(&["BTC"])).await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("coinmarketcap"), "{err}");
    assert!(store.is_empty());

    src.fetch(&query(&["BTC"])).await.unwrap_err();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[test]
fn ttl_beyond_chrono_range_reads_as_fresh() {
    let (clock, shared) = manual_clock();
    let store = MemoryCacheStore::new(shared);
    store.put("fred", "k", serde_json::json!([1]), 10_000_000_000_000_000).unwrap();
    clock.advance(Duration::days(365 * 50));
    assert_eq!(store.get("fred", "k"), Some(serde_json::json!([1])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_and_gets_never_tear_an_entry() {
    const FILL: usize = 64 * 1024;
    let tmp = tempfile::tempdir().unwrap();
    let (_clock, shared) = manual_clock();
    let store: SharedCache = Arc::new(FileCacheStore::new(tmp.path(), shared));
    store
        .put("acled", "shared", serde_json::json!({"writer": 0, "fill": "a".repeat(FILL)}), 3600)
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for writer in 0..4u8 {
        let store = Arc::clone(&store);
        tasks.spawn_blocking(move || {
            let fill = char::from(b'a' + writer).to_string().repeat(FILL);
            for _ in 0..25 {
                store
                    .put("acled", "shared", serde_json::json!({"writer": writer, "fill": fill}), 3600)
                    .unwrap();
            }
        });
    }
    for _ in 0..4 {
        let store = Arc::clone(&store);
        tasks.spawn_blocking(move || {
            for _ in 0..200 {
                // A torn file would fail to parse and read as a miss.
                let v = store.get("acled", "shared").expect("whole entry on every read");
                let writer = u8::try_from(v["writer"].as_u64().unwrap()).unwrap();
                let fill = v["fill"].as_str().unwrap();
                assert_eq!(fill.len(), FILL);
                assert!(fill.bytes().all(|b| b == b'a' + writer));
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let leftovers = std::fs::read_dir(tmp.path().join("acled")).unwrap().count();
    assert_eq!(leftovers, 1, "temp files are renamed or removed");
}

/// Store whose reads block the calling thread.
struct SlowStore {
    delay: std::time::Duration,
}

impl CacheStore for SlowStore {
    fn get(&self, _namespace: &str, _key: &str) -> Option<serde_json::Value> {
        std::thread::sleep(self.delay);
        None
    }

    fn put(&self, _ns: &str, _key: &str, _payload: serde_json::Value, _ttl: u64) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn blocking_store_reads_do_not_stall_the_runtime() {
    let (_clock, shared) = manual_clock();
    let delay = std::time::Duration::from_millis(250);
    let cache: SharedCache = Arc::new(SlowStore { delay });
    let fetches = Arc::new(AtomicUsize::new(0));
    let source = |cache: SharedCache| {
        CachedSource::new(
            CountingProvider {
                fetches: fetches.clone(),
                fail: false,
            },
            cache,
            shared.clone(),
        )
    };
    let (a, b) = (source(cache.clone()), source(cache));

    // Single-threaded runtime: the two reads overlap only off the async thread.
    let started = std::time::Instant::now();
    let (qa, qb) = (query(&["BTC"]), query(&["ETH"]));
    let (ra, rb) = tokio::join!(a.fetch(&qa), b.fetch(&qb));
    let elapsed = started.elapsed();

    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert!(elapsed < delay * 2 - std::time::Duration::from_millis(50), "reads ran serially: {elapsed:?}");
}
