//! Portfolio guardrails.
//!
//! Validates proposed allocations against regime-adjusted limits. A
//! violation is a structured result, never an error: every check runs, all
//! failures are reported, and where possible a corrected allocation is
//! suggested.

use std::collections::HashMap;

use decision_core::config::{AllocationCaps, RegimeCaps};
use decision_core::{
    AllocationProposal, AssetClass, ProposedPosition, RegimeSnapshot, UniverseEntry,
    ValidationResult, Violation, ViolationKind,
};

pub struct GuardrailEngine {
    caps: AllocationCaps,
    asset_classes: HashMap<String, AssetClass>,
}

impl GuardrailEngine {
    pub fn new(caps: AllocationCaps, universe: &[UniverseEntry]) -> Self {
        let asset_classes = universe
            .iter()
            .map(|e| (e.ticker.to_uppercase(), e.asset_class))
            .collect();
        Self {
            caps,
            asset_classes,
        }
    }

    /// Validate a proposal against the limits for the snapshot's regime
    /// class. All checks run; the result carries every violation found.
    pub fn validate(
        &self,
        proposal: &AllocationProposal,
        regime: &RegimeSnapshot,
    ) -> ValidationResult {
        let caps = self.caps.for_class(regime.class);
        let mut violations = Vec::new();

        for position in &proposal.positions {
            if position.fraction < 0.0 {
                violations.push(Violation {
                    kind: ViolationKind::NegativeFraction,
                    ticker: Some(position.ticker.clone()),
                    limit: 0.0,
                    proposed: position.fraction,
                    message: format!("{} has a negative fraction", position.ticker),
                });
            }
        }

        let invested = proposal.invested_fraction();
        if invested > 1.0 + 1e-9 {
            violations.push(Violation {
                kind: ViolationKind::SumExceedsOne,
                ticker: None,
                limit: 1.0,
                proposed: invested,
                message: format!("allocations sum to {invested:.4}, above 1.0"),
            });
        }

        for position in &proposal.positions {
            let cap = self.per_asset_cap(&position.ticker, caps);
            if position.fraction > cap + 1e-9 {
                violations.push(Violation {
                    kind: ViolationKind::PerAssetCap,
                    ticker: Some(position.ticker.clone()),
                    limit: cap,
                    proposed: position.fraction,
                    message: format!(
                        "{} at {:.1}% exceeds the {:.1}% per-asset ceiling",
                        position.ticker,
                        position.fraction * 100.0,
                        cap * 100.0
                    ),
                });
            }
        }

        for class in [AssetClass::Equity, AssetClass::Crypto] {
            let class_sum = self.class_sum(proposal, class);
            let cap = class_cap(caps, class);
            if class_sum > cap + 1e-9 {
                violations.push(Violation {
                    kind: ViolationKind::AssetClassCap,
                    ticker: None,
                    limit: cap,
                    proposed: class_sum,
                    message: format!(
                        "{class:?} allocations sum to {:.1}%, above the {:.1}% class ceiling",
                        class_sum * 100.0,
                        cap * 100.0
                    ),
                });
            }
        }

        let cash = 1.0 - invested;
        if cash < caps.cash_floor - 1e-9 {
            violations.push(Violation {
                kind: ViolationKind::CashFloor,
                ticker: None,
                limit: caps.cash_floor,
                proposed: cash,
                message: format!(
                    "cash at {:.1}% is below the {:.1}% floor",
                    cash * 100.0,
                    caps.cash_floor * 100.0
                ),
            });
        }

        let valid = violations.is_empty();
        let suggested = (!valid).then(|| self.suggest(proposal, caps));

        ValidationResult {
            valid,
            violations,
            suggested,
        }
    }

    /// Corrected allocation: clip each violating fraction to its cap, then
    /// scale whole classes down ratio-preserving where clipping alone
    /// cannot satisfy the class caps or the cash floor.
    fn suggest(&self, proposal: &AllocationProposal, caps: &RegimeCaps) -> AllocationProposal {
        let mut positions: Vec<ProposedPosition> = proposal
            .positions
            .iter()
            .map(|p| ProposedPosition {
                ticker: p.ticker.clone(),
                fraction: p
                    .fraction
                    .max(0.0)
                    .min(self.per_asset_cap(&p.ticker, caps)),
            })
            .collect();

        for class in [AssetClass::Equity, AssetClass::Crypto] {
            let cap = class_cap(caps, class);
            let sum: f64 = positions
                .iter()
                .filter(|p| self.asset_class(&p.ticker) == class)
                .map(|p| p.fraction)
                .sum();
            if sum > cap && sum > 0.0 {
                let scale = cap / sum;
                for position in positions
                    .iter_mut()
                    .filter(|p| self.asset_class(&p.ticker) == class)
                {
                    position.fraction *= scale;
                }
            }
        }

        let invested: f64 = positions.iter().map(|p| p.fraction).sum();
        let budget = 1.0 - caps.cash_floor;
        if invested > budget && invested > 0.0 {
            let scale = budget / invested;
            for position in &mut positions {
                position.fraction *= scale;
            }
        }

        AllocationProposal {
            positions,
            total_value: proposal.total_value,
        }
    }

    fn per_asset_cap(&self, ticker: &str, caps: &RegimeCaps) -> f64 {
        match self.asset_class(ticker) {
            AssetClass::Equity => caps.equity_per_asset,
            AssetClass::Crypto => caps.crypto_per_asset,
        }
    }

    /// Tickers outside the configured universe validate under equity caps,
    /// the stricter general case.
    fn asset_class(&self, ticker: &str) -> AssetClass {
        self.asset_classes
            .get(&ticker.to_uppercase())
            .copied()
            .unwrap_or(AssetClass::Equity)
    }

    fn class_sum(&self, proposal: &AllocationProposal, class: AssetClass) -> f64 {
        proposal
            .positions
            .iter()
            .filter(|p| self.asset_class(&p.ticker) == class)
            .map(|p| p.fraction)
            .sum()
    }
}

fn class_cap(caps: &RegimeCaps, class: AssetClass) -> f64 {
    match class {
        AssetClass::Equity => caps.equity_class,
        AssetClass::Crypto => caps.crypto_class,
    }
}
