//! Market regime detection.
//!
//! Classifies the overall environment from two macro inputs (the
//! volatility index level and the benchmark trend) into a composite score
//! and a risk class that gates every downstream buy decision.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use decision_core::config::RegimeConfig;
use decision_core::{
    BenchmarkTrend, CoreError, MarketDataSource, OhlcvFrame, RegimeClass, RegimeInputs,
    RegimeSnapshot, VolatilityLevel,
};
use feature_engine::indicators::sma;

/// History window requested for the benchmark; must cover the 200-day MA.
const BENCHMARK_DAYS: u32 = 365;
const VOLATILITY_DAYS: u32 = 30;

/// Bucket the volatility index. A value exactly on an edge falls into the
/// higher bucket.
pub fn volatility_level(vix: f64, config: &RegimeConfig) -> VolatilityLevel {
    if vix < config.vix_low {
        VolatilityLevel::Low
    } else if vix < config.vix_medium {
        VolatilityLevel::Medium
    } else if vix < config.vix_high {
        VolatilityLevel::High
    } else {
        VolatilityLevel::Extreme
    }
}

/// Trend from the benchmark's 50/200-day moving averages.
pub fn benchmark_trend(closes: &[f64]) -> BenchmarkTrend {
    let ma50 = sma(closes, 50);
    let ma200 = sma(closes, 200);
    match (closes.last(), ma50.last(), ma200.last()) {
        (Some(&close), Some(&m50), Some(&m200)) if m50.is_finite() && m200.is_finite() => {
            if close > m50 && m50 > m200 {
                BenchmarkTrend::Bull
            } else if close < m50 && m50 < m200 {
                BenchmarkTrend::Bear
            } else {
                BenchmarkTrend::Neutral
            }
        }
        _ => BenchmarkTrend::Neutral,
    }
}

/// Monotone decreasing score over the volatility buckets.
fn volatility_score(level: VolatilityLevel) -> f64 {
    match level {
        VolatilityLevel::Low => 90.0,
        VolatilityLevel::Medium => 65.0,
        VolatilityLevel::High => 35.0,
        VolatilityLevel::Extreme => 10.0,
    }
}

/// Monotone increasing score over the trend states.
fn trend_score(trend: BenchmarkTrend) -> f64 {
    match trend {
        BenchmarkTrend::Bull => 90.0,
        BenchmarkTrend::Neutral => 50.0,
        BenchmarkTrend::Bear => 10.0,
    }
}

/// Pure classification from raw inputs; the detector service wraps this
/// with fetching and caching.
pub fn classify(
    vix: f64,
    benchmark: &OhlcvFrame,
    config: &RegimeConfig,
    as_of: DateTime<Utc>,
) -> RegimeSnapshot {
    let closes = benchmark.closes();
    let level = volatility_level(vix, config);
    let trend = benchmark_trend(&closes);

    let weight_sum = config.volatility_weight + config.trend_weight;
    let score = if weight_sum > 0.0 {
        (config.volatility_weight * volatility_score(level)
            + config.trend_weight * trend_score(trend))
            / weight_sum
    } else {
        50.0
    };
    let score = score.clamp(0.0, 100.0);

    let class = if score >= config.risk_on_cut {
        RegimeClass::RiskOn
    } else if score >= config.neutral_cut {
        RegimeClass::Neutral
    } else {
        RegimeClass::RiskOff
    };

    let ma50 = sma(&closes, 50).last().copied().unwrap_or(f64::NAN);
    let ma200 = sma(&closes, 200).last().copied().unwrap_or(f64::NAN);

    RegimeSnapshot {
        volatility_level: level,
        benchmark_trend: trend,
        score,
        class,
        allow_buys: class == RegimeClass::RiskOn,
        stale: false,
        degraded: false,
        as_of,
        inputs: Some(RegimeInputs {
            volatility_index: vix,
            benchmark_close: closes.last().copied().unwrap_or(f64::NAN),
            benchmark_ma50: ma50,
            benchmark_ma200: ma200,
        }),
    }
}

struct Cached {
    snapshot: RegimeSnapshot,
    fetched_at: Instant,
}

/// Fetching, caching regime service. Snapshots live for a short TTL; on
/// upstream failure the last snapshot is served marked `stale` for a
/// bounded grace interval, after which the detector reports
/// `RegimeUnavailable` and scoring falls back to the degraded-neutral
/// snapshot.
pub struct RegimeDetector {
    source: Arc<dyn MarketDataSource>,
    config: RegimeConfig,
    cached: RwLock<Option<Cached>>,
}

impl RegimeDetector {
    pub fn new(source: Arc<dyn MarketDataSource>, config: RegimeConfig) -> Self {
        Self {
            source,
            config,
            cached: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Result<RegimeSnapshot, CoreError> {
        let ttl = Duration::from_secs(self.config.snapshot_ttl_seconds);

        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.fetched_at.elapsed() < ttl {
                return Ok(cached.snapshot.clone());
            }
        }

        match self.refresh().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let grace = ttl + Duration::from_secs(self.config.stale_grace_seconds);
                if let Some(cached) = self.cached.read().await.as_ref() {
                    if cached.fetched_at.elapsed() < grace {
                        tracing::warn!(error = %e, "serving stale regime snapshot");
                        let mut snapshot = cached.snapshot.clone();
                        snapshot.stale = true;
                        return Ok(snapshot);
                    }
                }
                Err(CoreError::RegimeUnavailable(e.to_string()))
            }
        }
    }

    /// Scoring-path helper: never fails, degrading to the neutral snapshot
    /// when macro inputs are missing beyond grace.
    pub async fn current_or_degraded(&self) -> RegimeSnapshot {
        match self.current().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "regime unavailable, scoring with neutral fallback");
                RegimeSnapshot::degraded_neutral(Utc::now())
            }
        }
    }

    async fn refresh(&self) -> Result<RegimeSnapshot, CoreError> {
        let series = self
            .source
            .fetch_macro(&self.config.volatility_series_id, VOLATILITY_DAYS)
            .await?;
        let vix = series
            .last()
            .map(|p| p.value)
            .ok_or_else(|| CoreError::RegimeUnavailable("empty volatility series".to_string()))?;

        let benchmark = self
            .source
            .fetch_history(&self.config.benchmark_ticker, BENCHMARK_DAYS)
            .await?;

        let snapshot = classify(vix, &benchmark, &self.config, Utc::now());
        tracing::info!(
            score = snapshot.score,
            class = ?snapshot.class,
            vix,
            trend = ?snapshot.benchmark_trend,
            "regime refreshed"
        );

        *self.cached.write().await = Some(Cached {
            snapshot: snapshot.clone(),
            fetched_at: Instant::now(),
        });
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use decision_core::{Bar, MacroPoint, Quote};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn config() -> RegimeConfig {
        RegimeConfig::default()
    }

    fn benchmark_frame(trend_per_day: f64) -> OhlcvFrame {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = (0..260)
            .map(|i| {
                let close = 400.0 + trend_per_day * i as f64;
                Bar {
                    date: start + chrono::Duration::days(i as i64),
                    open: close,
                    high: close + 2.0,
                    low: close - 2.0,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect();
        OhlcvFrame::new("SPY", bars)
    }

    #[test]
    fn boundary_vix_falls_into_higher_bucket() {
        let c = config();
        assert_eq!(volatility_level(14.99, &c), VolatilityLevel::Low);
        assert_eq!(volatility_level(15.0, &c), VolatilityLevel::Medium);
        assert_eq!(volatility_level(20.0, &c), VolatilityLevel::High);
        assert_eq!(volatility_level(30.0, &c), VolatilityLevel::Extreme);
    }

    #[test]
    fn calm_bull_market_is_risk_on() {
        let snapshot = classify(12.0, &benchmark_frame(0.5), &config(), Utc::now());
        assert_eq!(snapshot.volatility_level, VolatilityLevel::Low);
        assert_eq!(snapshot.benchmark_trend, BenchmarkTrend::Bull);
        assert_eq!(snapshot.class, RegimeClass::RiskOn);
        assert!(snapshot.allow_buys);
        assert!((snapshot.score - 90.0).abs() < 1e-9);
    }

    #[test]
    fn panic_bear_market_is_risk_off() {
        let snapshot = classify(35.0, &benchmark_frame(-0.5), &config(), Utc::now());
        assert_eq!(snapshot.volatility_level, VolatilityLevel::Extreme);
        assert_eq!(snapshot.benchmark_trend, BenchmarkTrend::Bear);
        assert_eq!(snapshot.class, RegimeClass::RiskOff);
        assert!(!snapshot.allow_buys);
    }

    #[test]
    fn composite_is_monotone_in_volatility() {
        let frame = benchmark_frame(0.0);
        let calm = classify(10.0, &frame, &config(), Utc::now());
        let tense = classify(22.0, &frame, &config(), Utc::now());
        let panic = classify(40.0, &frame, &config(), Utc::now());
        assert!(calm.score > tense.score);
        assert!(tense.score > panic.score);
    }

    struct ScriptedSource {
        fail: AtomicBool,
        fetches: AtomicUsize,
        vix: f64,
    }

    impl ScriptedSource {
        fn new(vix: f64) -> Self {
            Self {
                fail: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
                vix,
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn fetch_history(&self, ticker: &str, _days: u32) -> Result<OhlcvFrame, CoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::DataUnavailable {
                    ticker: ticker.to_string(),
                    reason: "outage".to_string(),
                });
            }
            Ok(benchmark_frame(0.5))
        }

        async fn fetch_macro(
            &self,
            series_id: &str,
            _days: u32,
        ) -> Result<Vec<MacroPoint>, CoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::DataUnavailable {
                    ticker: series_id.to_string(),
                    reason: "outage".to_string(),
                });
            }
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![MacroPoint {
                date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
                value: self.vix,
            }])
        }

        async fn fetch_current(&self, ticker: &str) -> Result<Quote, CoreError> {
            Ok(Quote {
                ticker: ticker.to_string(),
                price: 400.0,
                as_of: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let source = Arc::new(ScriptedSource::new(12.0));
        let detector = RegimeDetector::new(source.clone(), config());

        detector.current().await.unwrap();
        detector.current().await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_failure_serves_stale_within_grace() {
        let mut c = config();
        c.snapshot_ttl_seconds = 0; // expire immediately
        let source = Arc::new(ScriptedSource::new(12.0));
        let detector = RegimeDetector::new(source.clone(), c);

        let fresh = detector.current().await.unwrap();
        assert!(!fresh.stale);

        source.fail.store(true, Ordering::SeqCst);
        let stale = detector.current().await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.class, fresh.class);
    }

    #[tokio::test]
    async fn failure_beyond_grace_is_unavailable_and_degrades() {
        let mut c = config();
        c.snapshot_ttl_seconds = 0;
        c.stale_grace_seconds = 0;
        let source = Arc::new(ScriptedSource::new(12.0));
        let detector = RegimeDetector::new(source.clone(), c);

        detector.current().await.unwrap();
        source.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = detector.current().await.unwrap_err();
        assert_eq!(err.kind(), "regime_unavailable");

        let fallback = detector.current_or_degraded().await;
        assert!(fallback.degraded);
        assert!((fallback.score - 50.0).abs() < 1e-9);
        assert!(!fallback.allow_buys);
    }
}
