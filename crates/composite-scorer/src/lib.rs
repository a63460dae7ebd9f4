//! Composite scoring engine.
//!
//! Fuses the technical, ML, momentum, regime, and bounded context signals
//! into a single score in [0, 100], a discrete signal class, an allocation
//! ceiling, and the contributing factors. The regime gate is applied
//! last so a blocked buy keeps its raw composite for transparency.

pub mod context;
pub mod momentum;
pub mod technical;

use chrono::Utc;

use decision_core::config::{
    AllocationCaps, ContextConfig, ScoringWeights, SignalCaps, SignalThresholds,
};
use decision_core::{
    AssetClass, ComponentScores, ContextRecord, CoreError, Factor, RegimeClass, RegimeSnapshot,
    ScoreBreakdown, Signal,
};
use feature_engine::FeatureFrame;

/// Everything needed to score one ticker at one evaluation.
pub struct ScoreInput<'a> {
    pub ticker: &'a str,
    pub asset_class: AssetClass,
    pub features: &'a FeatureFrame,
    /// Model probability of the positive class, in [0, 1].
    pub probability: f64,
    pub regime: &'a RegimeSnapshot,
    pub context: Option<&'a ContextRecord>,
}

#[derive(Debug, Clone)]
pub struct CompositeScorer {
    weights: ScoringWeights,
    thresholds: SignalThresholds,
    signal_caps: SignalCaps,
    allocation: AllocationCaps,
    context: ContextConfig,
}

impl CompositeScorer {
    pub fn new(
        weights: ScoringWeights,
        thresholds: SignalThresholds,
        signal_caps: SignalCaps,
        allocation: AllocationCaps,
        context: ContextConfig,
    ) -> Self {
        Self {
            weights,
            thresholds,
            signal_caps,
            allocation,
            context,
        }
    }

    pub fn score(&self, input: &ScoreInput<'_>) -> Result<ScoreBreakdown, CoreError> {
        let row = input
            .features
            .latest()
            .ok_or_else(|| CoreError::InsufficientHistory {
                ticker: input.ticker.to_string(),
                required: 1,
                got: 0,
            })?;

        let technical = technical::technical_score(&row);
        let momentum = momentum::momentum_score(&row);
        let ml = (input.probability * 100.0).clamp(0.0, 100.0);
        // A degraded snapshot contributes the fixed neutral value.
        let regime_component = if input.regime.degraded {
            50.0
        } else {
            input.regime.score
        };
        let context_adjustment = match (self.context.enabled, input.context) {
            (true, Some(record)) => context::adjustment(record, self.context.max_adjustment),
            _ => 0.0,
        };

        let composite = (self.weights.technical * technical.score
            + self.weights.ml * ml
            + self.weights.momentum * momentum.score
            + self.weights.regime * regime_component
            + context_adjustment)
            .clamp(0.0, 100.0);

        let mut factors: Vec<Factor> = Vec::new();
        for rule in &technical.rules {
            factors.push(Factor {
                name: rule.name.clone(),
                contribution: rule.contribution * self.weights.technical,
            });
        }
        for part in &momentum.parts {
            factors.push(Factor {
                name: part.name.clone(),
                contribution: part.contribution * self.weights.momentum,
            });
        }
        factors.push(Factor {
            name: "Model probability".to_string(),
            contribution: (ml - 50.0) * self.weights.ml,
        });
        factors.push(Factor {
            name: "Market regime".to_string(),
            contribution: (regime_component - 50.0) * self.weights.regime,
        });
        if context_adjustment != 0.0 {
            factors.push(Factor {
                name: "Context adjustment".to_string(),
                contribution: context_adjustment,
            });
        }

        let (top_factors, risk_factors) = split_factors(factors);

        let mut signal = signal_for(composite, &self.thresholds);
        let mut regime_blocked = false;
        if !input.regime.allow_buys && signal.is_buy() {
            signal = Signal::Hold;
            regime_blocked = true;
        }

        let max_allocation = self.max_allocation(signal, input.asset_class, input.regime.class);

        Ok(ScoreBreakdown {
            ticker: input.ticker.to_string(),
            composite,
            signal,
            max_allocation,
            components: ComponentScores {
                technical: technical.score,
                ml,
                momentum: momentum.score,
                regime: regime_component,
                context_adjustment,
            },
            top_factors,
            risk_factors,
            regime_blocked,
            as_of: Utc::now(),
        })
    }

    /// Allocation ceiling for a signal under the current regime: NEUTRAL
    /// halves the normal ceiling, crypto takes half the equity ceiling, and
    /// the guardrail per-asset cap for the regime class is a floor on top.
    fn max_allocation(
        &self,
        signal: Signal,
        asset_class: AssetClass,
        regime_class: RegimeClass,
    ) -> f64 {
        let mut cap = match signal {
            Signal::StrongBuy => self.signal_caps.strong_buy,
            Signal::Buy => self.signal_caps.buy,
            Signal::Hold => self.signal_caps.hold,
            Signal::ConsiderSelling | Signal::Sell => 0.0,
        };
        if regime_class == RegimeClass::Neutral {
            cap /= 2.0;
        }
        if asset_class == AssetClass::Crypto {
            cap /= 2.0;
        }

        let guardrail = self.allocation.for_class(regime_class);
        let per_asset = match asset_class {
            AssetClass::Equity => guardrail.equity_per_asset,
            AssetClass::Crypto => guardrail.crypto_per_asset,
        };
        cap.min(per_asset)
    }
}

/// Classify a composite against the configured cut-points; lower bounds are
/// inclusive (65 is a BUY, 80 a STRONG_BUY).
pub fn signal_for(composite: f64, thresholds: &SignalThresholds) -> Signal {
    if composite >= thresholds.strong_buy {
        Signal::StrongBuy
    } else if composite >= thresholds.buy {
        Signal::Buy
    } else if composite >= thresholds.hold {
        Signal::Hold
    } else if composite >= thresholds.consider_selling {
        Signal::ConsiderSelling
    } else {
        Signal::Sell
    }
}

/// Top 3 positive and top 3 negative contributions, each ordered by
/// absolute impact on the final score.
fn split_factors(factors: Vec<Factor>) -> (Vec<Factor>, Vec<Factor>) {
    let mut positives: Vec<Factor> = factors
        .iter()
        .filter(|f| f.contribution > 0.0)
        .cloned()
        .collect();
    let mut negatives: Vec<Factor> = factors
        .into_iter()
        .filter(|f| f.contribution < 0.0)
        .collect();

    positives.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    negatives.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    positives.truncate(3);
    negatives.truncate(3);
    (positives, negatives)
}
