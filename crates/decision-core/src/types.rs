use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Minimum bar count for the scoring path.
pub const MIN_SCORING_BARS: usize = 60;

/// Minimum bar count for building a training dataset.
pub const MIN_TRAINING_BARS: usize = 252;

/// Daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered daily bar history for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvFrame {
    pub ticker: String,
    pub bars: Vec<Bar>,
}

impl OhlcvFrame {
    pub fn new(ticker: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            ticker: ticker.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Structural invariants: strictly ascending dates, non-negative volume,
    /// and a minimum depth for the requesting path.
    pub fn validate(&self, min_bars: usize) -> Result<(), CoreError> {
        if self.bars.len() < min_bars {
            return Err(CoreError::InsufficientHistory {
                ticker: self.ticker.clone(),
                required: min_bars,
                got: self.bars.len(),
            });
        }
        for pair in self.bars.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(CoreError::QualityFailed {
                    ticker: self.ticker.clone(),
                    predicate: "dates_not_monotonic".to_string(),
                });
            }
        }
        if self.bars.iter().any(|b| b.volume < 0.0) {
            return Err(CoreError::QualityFailed {
                ticker: self.ticker.clone(),
                predicate: "negative_volume".to_string(),
            });
        }
        Ok(())
    }
}

/// Point in a macro series (volatility index and friends).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Current quote for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Crypto,
}

/// One member of the configured asset universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub ticker: String,
    pub name: String,
    pub market: String,
    pub asset_class: AssetClass,
}

/// Discrete recommendation class over the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
    ConsiderSelling,
    Sell,
}

impl Signal {
    pub fn is_buy(&self) -> bool {
        matches!(self, Signal::StrongBuy | Signal::Buy)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "Strong Buy",
            Signal::Buy => "Buy",
            Signal::Hold => "Hold",
            Signal::ConsiderSelling => "Consider Selling",
            Signal::Sell => "Sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BenchmarkTrend {
    Bull,
    Neutral,
    Bear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeClass {
    RiskOn,
    Neutral,
    RiskOff,
}

/// Macro inputs that produced a regime snapshot, kept for reproducibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeInputs {
    pub volatility_index: f64,
    pub benchmark_close: f64,
    pub benchmark_ma50: f64,
    pub benchmark_ma200: f64,
}

/// Classification of the overall market environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub volatility_level: VolatilityLevel,
    pub benchmark_trend: BenchmarkTrend,
    /// Composite regime score in [0, 100].
    pub score: f64,
    pub class: RegimeClass,
    pub allow_buys: bool,
    /// Served past its TTL because the upstream was unreachable.
    pub stale: bool,
    /// Regime inputs were missing entirely; score is the neutral fallback.
    pub degraded: bool,
    pub as_of: DateTime<Utc>,
    pub inputs: Option<RegimeInputs>,
}

impl RegimeSnapshot {
    /// Neutral fallback used when macro inputs are missing beyond grace.
    pub fn degraded_neutral(as_of: DateTime<Utc>) -> Self {
        Self {
            volatility_level: VolatilityLevel::Medium,
            benchmark_trend: BenchmarkTrend::Neutral,
            score: 50.0,
            class: RegimeClass::Neutral,
            allow_buys: false,
            stale: false,
            degraded: true,
            as_of,
            inputs: None,
        }
    }
}

/// A named contribution to the composite score, signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub contribution: f64,
}

/// The five component scores feeding the composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub technical: f64,
    pub ml: f64,
    pub momentum: f64,
    pub regime: f64,
    /// Signed context adjustment, clamped to the configured bound.
    pub context_adjustment: f64,
}

/// Full scoring output for one ticker at one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub ticker: String,
    /// Composite score in [0, 100]; preserved even when the regime gate
    /// downgrades the signal.
    pub composite: f64,
    pub signal: Signal,
    /// Maximum portfolio fraction permitted for this position.
    pub max_allocation: f64,
    pub components: ComponentScores,
    pub top_factors: Vec<Factor>,
    pub risk_factors: Vec<Factor>,
    pub regime_blocked: bool,
    pub as_of: DateTime<Utc>,
}

/// Optional bounded record from the context subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextRecord {
    pub summary: String,
    pub catalysts: Vec<String>,
    pub risks: Vec<String>,
    /// Sentiment in [-1, 1].
    pub sentiment: f64,
}

/// One (ticker, fraction) position in a proposed allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedPosition {
    pub ticker: String,
    pub fraction: f64,
}

/// Caller-supplied allocation to be validated and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationProposal {
    pub positions: Vec<ProposedPosition>,
    pub total_value: f64,
}

impl AllocationProposal {
    pub fn invested_fraction(&self) -> f64 {
        self.positions.iter().map(|p| p.fraction).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PerAssetCap,
    AssetClassCap,
    CashFloor,
    NegativeFraction,
    SumExceedsOne,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::PerAssetCap => "per_asset_cap",
            ViolationKind::AssetClassCap => "asset_class_cap",
            ViolationKind::CashFloor => "cash_floor",
            ViolationKind::NegativeFraction => "negative_fraction",
            ViolationKind::SumExceedsOne => "sum_exceeds_one",
        }
    }
}

/// One failed guardrail check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub ticker: Option<String>,
    pub limit: f64,
    pub proposed: f64,
    pub message: String,
}

/// Structured result of allocation validation; not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub suggested: Option<AllocationProposal>,
}

/// Held-out classification metrics for a trained candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub f1: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub roc_auc: f64,
}

/// Outcome class of one retraining run, persisted to the metrics log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainingDecision {
    Promoted,
    RejectedLow,
    RejectedDegraded,
    Error,
}

impl RetrainingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrainingDecision::Promoted => "promoted",
            RetrainingDecision::RejectedLow => "rejected_low",
            RetrainingDecision::RejectedDegraded => "rejected_degraded",
            RetrainingDecision::Error => "error",
        }
    }
}
