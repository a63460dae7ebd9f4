//! Keyed store fronting the feature engine and the market-data adapter.
//!
//! Entries live under `(ticker, period, feature_set_version)` keys with a
//! short TTL and a bounded capacity. Concurrent misses for one key coalesce
//! on a single underlying computation; cache trouble is never fatal, the
//! worst case is computing directly.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use decision_core::CoreError;
use feature_engine::FeatureFrame;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ticker: String,
    pub period_days: u32,
    pub feature_set_version: u32,
}

impl CacheKey {
    pub fn new(ticker: impl Into<String>, period_days: u32, feature_set_version: u32) -> Self {
        Self {
            ticker: ticker.into(),
            period_days,
            feature_set_version,
        }
    }
}

struct Entry {
    frame: Arc<FeatureFrame>,
    inserted_at: Instant,
    /// Monotonic insertion counter; the eviction order.
    seq: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct FeatureCache {
    entries: DashMap<CacheKey, Entry>,
    inflight: DashMap<CacheKey, Arc<Mutex<()>>>,
    ttl: Duration,
    capacity: usize,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl FeatureCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch the frame for `key`, running `compute` on a miss. Concurrent
    /// callers for the same key share one computation (single-flight); a
    /// failed computation propagates to every waiter that ran it and is not
    /// negatively cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<Arc<FeatureFrame>, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FeatureFrame, CoreError>>,
    {
        if let Some(hit) = self.fresh(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let guard = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _lock = guard.lock().await;

        // A racing caller may have filled the slot while we waited.
        if let Some(hit) = self.fresh(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = match compute().await {
            Ok(frame) => {
                let frame = Arc::new(frame);
                self.insert(key.clone(), frame.clone());
                Ok(frame)
            }
            Err(e) => Err(e),
        };
        self.inflight.remove(&key);
        result
    }

    /// Direct read without computing; used by warmup bookkeeping and tests.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<FeatureFrame>> {
        self.fresh(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fresh(&self, key: &CacheKey) -> Option<Arc<FeatureFrame>> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.frame.clone())
        } else {
            None
        }
    }

    fn insert(&self, key: CacheKey, frame: Arc<FeatureFrame>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            Entry {
                frame,
                inserted_at: Instant::now(),
                seq,
            },
        );
        self.evict_over_capacity();
    }

    /// Drop expired entries first, then the oldest insertions, until the
    /// store fits its capacity again.
    fn evict_over_capacity(&self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| {
                    let expired = e.value().inserted_at.elapsed() >= self.ttl;
                    (!expired, e.value().seq)
                })
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn frame(ticker: &str) -> FeatureFrame {
        let dates = vec![NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()];
        let mut columns = BTreeMap::new();
        columns.insert("rsi_14".to_string(), vec![50.0]);
        FeatureFrame::new(ticker, 1, dates, columns)
    }

    #[tokio::test]
    async fn second_read_within_ttl_is_a_hit() {
        let cache = FeatureCache::new(Duration::from_secs(60), 16);
        let key = CacheKey::new("AAPL", 365, 1);

        let first = cache
            .get_or_compute(key.clone(), || async { Ok(frame("AAPL")) })
            .await
            .unwrap();
        let second = cache
            .get_or_compute(key.clone(), || async { panic!("should not recompute") })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_recomputes() {
        let cache = FeatureCache::new(Duration::from_millis(10), 16);
        let key = CacheKey::new("AAPL", 365, 1);

        cache
            .get_or_compute(key.clone(), || async { Ok(frame("AAPL")) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache
            .get_or_compute(key.clone(), || async { Ok(frame("AAPL")) })
            .await
            .unwrap();

        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_on_one_computation() {
        let cache = Arc::new(FeatureCache::new(Duration::from_secs(60), 16));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("MSFT", 365, 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(frame("MSFT"))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn version_bump_misses_old_entries() {
        let cache = FeatureCache::new(Duration::from_secs(60), 16);
        cache
            .get_or_compute(CacheKey::new("AAPL", 365, 1), || async {
                Ok(frame("AAPL"))
            })
            .await
            .unwrap();

        // Same ticker and period under a bumped feature-set version is a
        // distinct key: must miss.
        assert!(cache.peek(&CacheKey::new("AAPL", 365, 2)).is_none());
        cache
            .get_or_compute(CacheKey::new("AAPL", 365, 2), || async {
                Ok(frame("AAPL"))
            })
            .await
            .unwrap();
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_insertion() {
        let cache = FeatureCache::new(Duration::from_secs(60), 2);
        for ticker in ["A", "B", "C"] {
            cache
                .get_or_compute(CacheKey::new(ticker, 365, 1), || async {
                    Ok(frame(ticker))
                })
                .await
                .unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&CacheKey::new("A", 365, 1)).is_none());
        assert!(cache.peek(&CacheKey::new("C", 365, 1)).is_some());
    }

    #[tokio::test]
    async fn computation_error_propagates_and_is_not_cached() {
        let cache = FeatureCache::new(Duration::from_secs(60), 16);
        let key = CacheKey::new("FAIL", 365, 1);

        let err = cache
            .get_or_compute(key.clone(), || async {
                Err(CoreError::DataUnavailable {
                    ticker: "FAIL".into(),
                    reason: "outage".into(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");

        // Next caller retries the computation.
        let ok = cache
            .get_or_compute(key, || async { Ok(frame("FAIL")) })
            .await;
        assert!(ok.is_ok());
    }
}
