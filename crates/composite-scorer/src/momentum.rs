//! Momentum component: a weighted blend of 10/30/60-day returns mapped to
//! [0, 100] by a saturating linear function.

use decision_core::Factor;
use feature_engine::FeatureRow;

const HORIZONS: [(&str, &str, f64); 3] = [
    ("momentum_10", "10-day momentum", 0.25),
    ("momentum_30", "30-day momentum", 0.35),
    ("momentum_60", "60-day momentum", 0.40),
];

/// Map a period return onto [0, 100]; +/-10% saturates the scale.
pub fn saturating_map(period_return: f64) -> f64 {
    (50.0 + 500.0 * period_return).clamp(0.0, 100.0)
}

pub struct MomentumScore {
    pub score: f64,
    /// Per-horizon deviation from neutral, weighted inside the component.
    pub parts: Vec<Factor>,
}

pub fn momentum_score(row: &FeatureRow<'_>) -> MomentumScore {
    let mut score = 0.0;
    let mut parts = Vec::with_capacity(HORIZONS.len());

    for (column, label, weight) in HORIZONS {
        let mapped = saturating_map(row.get(column).unwrap_or(0.0));
        score += weight * mapped;
        parts.push(Factor {
            name: label.to_string(),
            contribution: weight * (mapped - 50.0),
        });
    }

    MomentumScore { score, parts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use feature_engine::FeatureFrame;
    use std::collections::BTreeMap;

    fn row(m10: f64, m30: f64, m60: f64) -> FeatureFrame {
        let dates = vec![NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()];
        let mut columns = BTreeMap::new();
        columns.insert("momentum_10".to_string(), vec![m10]);
        columns.insert("momentum_30".to_string(), vec![m30]);
        columns.insert("momentum_60".to_string(), vec![m60]);
        FeatureFrame::new("TEST", 1, dates, columns)
    }

    #[test]
    fn saturating_map_pins_the_extremes() {
        assert_relative_eq!(saturating_map(0.0), 50.0);
        assert_relative_eq!(saturating_map(0.04), 70.0);
        assert_relative_eq!(saturating_map(0.5), 100.0);
        assert_relative_eq!(saturating_map(-0.5), 0.0);
    }

    #[test]
    fn blend_uses_the_horizon_weights() {
        let frame = row(0.10, 0.0, -0.10);
        let out = momentum_score(&frame.latest().unwrap());
        // 0.25*100 + 0.35*50 + 0.40*0
        assert_relative_eq!(out.score, 42.5);
        assert_eq!(out.parts.len(), 3);
    }

    #[test]
    fn flat_returns_are_neutral() {
        let frame = row(0.0, 0.0, 0.0);
        let out = momentum_score(&frame.latest().unwrap());
        assert_relative_eq!(out.score, 50.0);
    }
}
