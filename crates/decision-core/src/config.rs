use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AssetClass, RegimeClass, UniverseEntry};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Base weights of the four weighted composite components; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub technical: f64,
    pub ml: f64,
    pub momentum: f64,
    pub regime: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            technical: 0.40,
            ml: 0.30,
            momentum: 0.20,
            regime: 0.10,
        }
    }
}

/// Cut-points between the five signal classes, inclusive lower bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalThresholds {
    pub strong_buy: f64,
    pub buy: f64,
    pub hold: f64,
    pub consider_selling: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            strong_buy: 80.0,
            buy: 65.0,
            hold: 45.0,
            consider_selling: 35.0,
        }
    }
}

/// Per-signal allocation ceilings under a RISK_ON regime. NEUTRAL halves
/// them; crypto positions take half the equity ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalCaps {
    pub strong_buy: f64,
    pub buy: f64,
    pub hold: f64,
}

impl Default for SignalCaps {
    fn default() -> Self {
        Self {
            strong_buy: 0.10,
            buy: 0.075,
            hold: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Volatility-index bucket edges; a value exactly on an edge falls into
    /// the higher bucket.
    pub vix_low: f64,
    pub vix_medium: f64,
    pub vix_high: f64,
    /// Composite cut-points: RISK_ON at or above, RISK_OFF below the lower.
    pub risk_on_cut: f64,
    pub neutral_cut: f64,
    pub volatility_weight: f64,
    pub trend_weight: f64,
    pub volatility_series_id: String,
    pub benchmark_ticker: String,
    pub snapshot_ttl_seconds: u64,
    /// How long a stale snapshot may be served after upstream failure.
    pub stale_grace_seconds: u64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            vix_low: 15.0,
            vix_medium: 20.0,
            vix_high: 30.0,
            risk_on_cut: 70.0,
            neutral_cut: 40.0,
            volatility_weight: 0.5,
            trend_weight: 0.5,
            volatility_series_id: "VIX".to_string(),
            benchmark_ticker: "SPY".to_string(),
            snapshot_ttl_seconds: 300,
            stale_grace_seconds: 1800,
        }
    }
}

/// Guardrail ceilings for one regime class, all portfolio fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeCaps {
    pub equity_per_asset: f64,
    pub crypto_per_asset: f64,
    pub equity_class: f64,
    pub crypto_class: f64,
    pub cash_floor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationCaps {
    pub risk_on: RegimeCaps,
    pub neutral: RegimeCaps,
    pub risk_off: RegimeCaps,
}

impl Default for AllocationCaps {
    fn default() -> Self {
        Self {
            risk_on: RegimeCaps {
                equity_per_asset: 0.10,
                crypto_per_asset: 0.05,
                equity_class: 0.70,
                crypto_class: 0.20,
                cash_floor: 0.10,
            },
            // NEUTRAL halves both per-asset and per-class caps.
            neutral: RegimeCaps {
                equity_per_asset: 0.05,
                crypto_per_asset: 0.025,
                equity_class: 0.35,
                crypto_class: 0.10,
                cash_floor: 0.20,
            },
            risk_off: RegimeCaps {
                equity_per_asset: 0.05,
                crypto_per_asset: 0.02,
                equity_class: 0.50,
                crypto_class: 0.10,
                cash_floor: 0.30,
            },
        }
    }
}

impl AllocationCaps {
    pub fn for_class(&self, class: RegimeClass) -> &RegimeCaps {
        match class {
            RegimeClass::RiskOn => &self.risk_on,
            RegimeClass::Neutral => &self.neutral,
            RegimeClass::RiskOff => &self.risk_off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingConfig {
    /// Hour of day (UTC) for the daily retrain.
    pub hour_utc: u32,
    /// Weekday (Mon=0) for the optional weekly full retrain; None disables.
    pub weekly_full_weekday: Option<u32>,
    /// History window for the daily retrain.
    pub data_period_years: u32,
    /// Wider history window used by the weekly full retrain.
    pub full_data_period_years: u32,
    /// Forward window for label construction, in bars.
    pub label_horizon_days: usize,
    /// Forward return at or above this labels the row positive.
    pub label_threshold: f64,
    pub min_f1: f64,
    pub min_accuracy: f64,
    /// Candidate F1 may trail the current model's by at most this fraction.
    pub degradation_tolerance: f64,
    pub validation_splits: usize,
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            hour_utc: 2,
            weekly_full_weekday: Some(6),
            data_period_years: 4,
            full_data_period_years: 8,
            label_horizon_days: 30,
            label_threshold: 0.05,
            min_f1: 0.65,
            min_accuracy: 0.70,
            degradation_tolerance: 0.10,
            validation_splits: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    pub feature_ttl_seconds: u64,
    pub ranking_ttl_seconds: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            feature_ttl_seconds: 300,
            ranking_ttl_seconds: 900,
            capacity: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextConfig {
    pub enabled: bool,
    pub max_adjustment: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_adjustment: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub ranking_refresh_seconds: u64,
    pub warmup_seconds: u64,
    pub warmup_top_n: usize,
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ranking_refresh_seconds: 900,
            warmup_seconds: 600,
            warmup_top_n: 20,
            shutdown_grace_seconds: 30,
        }
    }
}

/// Immutable service configuration, loaded once at startup and shared as an
/// `Arc`. Components never read the environment themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub universe: Vec<UniverseEntry>,
    pub scoring: ScoringWeights,
    pub signals: SignalThresholds,
    pub signal_caps: SignalCaps,
    pub regime: RegimeConfig,
    pub allocation: AllocationCaps,
    pub retraining: RetrainingConfig,
    pub executor: ExecutorConfig,
    pub cache: CacheConfig,
    pub context: ContextConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            scoring: ScoringWeights::default(),
            signals: SignalThresholds::default(),
            signal_caps: SignalCaps::default(),
            regime: RegimeConfig::default(),
            allocation: AllocationCaps::default(),
            retraining: RetrainingConfig::default(),
            executor: ExecutorConfig::default(),
            cache: CacheConfig::default(),
            context: ContextConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build from defaults plus environment overrides; the universe may be
    /// replaced wholesale with a JSON file via `UNIVERSE_PATH`.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("UNIVERSE_PATH") {
            let raw = std::fs::read_to_string(&path)?;
            config.universe = serde_json::from_str(&raw)?;
        }

        config.executor.workers = env_parse("EXECUTOR_WORKERS", config.executor.workers);
        config.executor.timeout_seconds =
            env_parse("EXECUTOR_TIMEOUT_SECONDS", config.executor.timeout_seconds);
        config.cache.feature_ttl_seconds =
            env_parse("CACHE_FEATURE_TTL_SECONDS", config.cache.feature_ttl_seconds);
        config.cache.ranking_ttl_seconds =
            env_parse("CACHE_RANKING_TTL_SECONDS", config.cache.ranking_ttl_seconds);
        config.regime.benchmark_ticker = std::env::var("REGIME_BENCHMARK")
            .unwrap_or(config.regime.benchmark_ticker);
        config.regime.volatility_series_id = std::env::var("REGIME_VOLATILITY_SERIES")
            .unwrap_or(config.regime.volatility_series_id);
        config.retraining.hour_utc = env_parse("RETRAIN_HOUR_UTC", config.retraining.hour_utc);
        config.context.enabled = env_parse("CONTEXT_ENABLED", config.context.enabled);
        config.context.max_adjustment =
            env_parse("CONTEXT_MAX_ADJUSTMENT", config.context.max_adjustment);
        config.scheduler.ranking_refresh_seconds = env_parse(
            "RANKING_REFRESH_SECONDS",
            config.scheduler.ranking_refresh_seconds,
        );
        config.scheduler.warmup_seconds =
            env_parse("WARMUP_SECONDS", config.scheduler.warmup_seconds);
        config.scheduler.warmup_top_n = env_parse("WARMUP_TOP_N", config.scheduler.warmup_top_n);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let weight_sum =
            self.scoring.technical + self.scoring.ml + self.scoring.momentum + self.scoring.regime;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(CoreError::InvalidConfig(format!(
                "scoring weights must sum to 1.0, got {weight_sum}"
            )));
        }

        let t = &self.signals;
        if !(t.strong_buy > t.buy && t.buy > t.hold && t.hold > t.consider_selling) {
            return Err(CoreError::InvalidConfig(
                "signal thresholds must be strictly descending".to_string(),
            ));
        }

        let r = &self.regime;
        if !(r.vix_low < r.vix_medium && r.vix_medium < r.vix_high) {
            return Err(CoreError::InvalidConfig(
                "volatility buckets must be strictly ascending".to_string(),
            ));
        }
        if r.risk_on_cut <= r.neutral_cut {
            return Err(CoreError::InvalidConfig(
                "regime cut-points must be ordered".to_string(),
            ));
        }

        if self.universe.is_empty() {
            return Err(CoreError::InvalidConfig("universe is empty".to_string()));
        }
        if self.executor.workers == 0 {
            return Err(CoreError::InvalidConfig(
                "executor.workers must be at least 1".to_string(),
            ));
        }

        if self.retraining.full_data_period_years < self.retraining.data_period_years {
            return Err(CoreError::InvalidConfig(
                "retraining full window must be at least the daily window".to_string(),
            ));
        }

        for caps in [
            &self.allocation.risk_on,
            &self.allocation.neutral,
            &self.allocation.risk_off,
        ] {
            for value in [
                caps.equity_per_asset,
                caps.crypto_per_asset,
                caps.equity_class,
                caps.crypto_class,
                caps.cash_floor,
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(CoreError::InvalidConfig(
                        "allocation caps must be fractions in [0, 1]".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn universe_for_market(&self, market: &str) -> Vec<&UniverseEntry> {
        self.universe
            .iter()
            .filter(|e| e.market.eq_ignore_ascii_case(market))
            .collect()
    }

    pub fn universe_entry(&self, ticker: &str) -> Option<&UniverseEntry> {
        self.universe
            .iter()
            .find(|e| e.ticker.eq_ignore_ascii_case(ticker))
    }
}

fn entry(ticker: &str, name: &str, market: &str, asset_class: AssetClass) -> UniverseEntry {
    UniverseEntry {
        ticker: ticker.to_string(),
        name: name.to_string(),
        market: market.to_string(),
        asset_class,
    }
}

/// Built-in default universe; production deployments replace this via
/// `UNIVERSE_PATH`.
fn default_universe() -> Vec<UniverseEntry> {
    use AssetClass::{Crypto, Equity};
    vec![
        entry("AAPL", "Apple Inc.", "us", Equity),
        entry("MSFT", "Microsoft Corporation", "us", Equity),
        entry("GOOGL", "Alphabet Inc.", "us", Equity),
        entry("AMZN", "Amazon.com Inc.", "us", Equity),
        entry("NVDA", "NVIDIA Corporation", "us", Equity),
        entry("META", "Meta Platforms Inc.", "us", Equity),
        entry("JPM", "JPMorgan Chase & Co.", "us", Equity),
        entry("V", "Visa Inc.", "us", Equity),
        entry("UNH", "UnitedHealth Group", "us", Equity),
        entry("HD", "Home Depot Inc.", "us", Equity),
        entry("NESN.SW", "Nestle SA", "ch", Equity),
        entry("NOVN.SW", "Novartis AG", "ch", Equity),
        entry("ROG.SW", "Roche Holding AG", "ch", Equity),
        entry("UBSG.SW", "UBS Group AG", "ch", Equity),
        entry("ZURN.SW", "Zurich Insurance Group", "ch", Equity),
        entry("BTC-USD", "Bitcoin", "crypto", Crypto),
        entry("ETH-USD", "Ethereum", "crypto", Crypto),
        entry("SOL-USD", "Solana", "crypto", Crypto),
    ]
}
