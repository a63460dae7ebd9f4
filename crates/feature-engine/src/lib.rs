pub mod frame;
pub mod indicators;

use std::collections::BTreeMap;

use decision_core::{CoreError, OhlcvFrame};

pub use frame::{FeatureFrame, FeatureRow};

/// Version of the closed indicator set below. Adding or changing a feature
/// bumps this and thereby invalidates every cache key that embeds it.
pub const FEATURE_SET_VERSION: u32 = 1;

/// Bars required before a single fully-defined row exists. Driven by the
/// longest rolling window in the set (SMA-200).
pub const MIN_HISTORY: usize = 200;

/// Feature names, in the order the model consumes them. A subset of the
/// frame columns; unbounded-scale columns (OBV, raw SAR) are excluded.
pub const MODEL_FEATURES: &[&str] = &[
    "rsi_14",
    "macd",
    "macd_signal",
    "bb_percent_b",
    "atr_14",
    "adx_14",
    "momentum_10",
    "momentum_30",
    "momentum_60",
    "williams_r_14",
    "volatility_20",
];

/// Compute the full indicator set over an OHLCV frame.
///
/// Pure: identical input yields identical output. Every value at date `t`
/// is derived from bars dated `<= t` only; rows where any feature is still
/// inside its warmup window are dropped.
pub fn compute(ohlcv: &OhlcvFrame) -> Result<FeatureFrame, CoreError> {
    if ohlcv.len() < MIN_HISTORY {
        return Err(CoreError::InsufficientHistory {
            ticker: ohlcv.ticker.clone(),
            required: MIN_HISTORY,
            got: ohlcv.len(),
        });
    }

    let bars = &ohlcv.bars;
    let closes = ohlcv.closes();

    let macd = indicators::macd(&closes, 12, 26, 9);
    let adx = indicators::adx(bars, 14);

    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    columns.insert("sma_50".into(), indicators::sma(&closes, 50));
    columns.insert("sma_200".into(), indicators::sma(&closes, 200));
    columns.insert("rsi_14".into(), indicators::rsi(&closes, 14));
    columns.insert("macd".into(), macd.macd);
    columns.insert("macd_signal".into(), macd.signal);
    columns.insert(
        "bb_percent_b".into(),
        indicators::bollinger_percent_b(&closes, 20, 2.0),
    );
    columns.insert("atr_14".into(), indicators::atr(bars, 14));
    columns.insert("adx_14".into(), adx.adx);
    columns.insert("plus_di_14".into(), adx.plus_di);
    columns.insert("minus_di_14".into(), adx.minus_di);
    columns.insert("momentum_10".into(), indicators::momentum(&closes, 10));
    columns.insert("momentum_30".into(), indicators::momentum(&closes, 30));
    columns.insert("momentum_60".into(), indicators::momentum(&closes, 60));
    columns.insert("obv".into(), indicators::obv(bars));
    columns.insert("vwap_20".into(), indicators::rolling_vwap(bars, 20));
    columns.insert("williams_r_14".into(), indicators::williams_r(bars, 14));
    columns.insert(
        "volatility_20".into(),
        indicators::log_return_volatility(&closes, 20),
    );
    columns.insert(
        "psar".into(),
        indicators::parabolic_sar(bars, 0.02, 0.2),
    );
    columns.insert("close".into(), closes);

    // First row where every column is defined; everything before is warmup.
    let first_valid = (0..bars.len())
        .find(|&i| columns.values().all(|col| col[i].is_finite()))
        .ok_or_else(|| CoreError::InsufficientHistory {
            ticker: ohlcv.ticker.clone(),
            required: MIN_HISTORY,
            got: ohlcv.len(),
        })?;

    let dates: Vec<_> = bars[first_valid..].iter().map(|b| b.date).collect();
    let columns: BTreeMap<String, Vec<f64>> = columns
        .into_iter()
        .map(|(name, col)| (name, col[first_valid..].to_vec()))
        .collect();

    Ok(FeatureFrame::new(
        ohlcv.ticker.clone(),
        FEATURE_SET_VERSION,
        dates,
        columns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use decision_core::Bar;

    /// Deterministic synthetic series: trend plus two sine harmonics, with
    /// volume tied to the phase so OBV and VWAP get real variation.
    fn synthetic_frame(len: usize) -> OhlcvFrame {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = (0..len)
            .map(|i| {
                let t = i as f64;
                let close = 100.0 + t * 0.1 + 4.0 * (t / 9.0).sin() + 2.0 * (t / 23.0).sin();
                let spread = 1.0 + 0.5 * (t / 5.0).cos().abs();
                Bar {
                    date: start + chrono::Duration::days(i as i64),
                    open: close - 0.3,
                    high: close + spread,
                    low: close - spread,
                    close,
                    volume: 10_000.0 + 2_000.0 * (t / 7.0).sin(),
                }
            })
            .collect();
        OhlcvFrame::new("SYN", bars)
    }

    #[test]
    fn exactly_minimum_history_yields_one_row() {
        let frame = compute(&synthetic_frame(MIN_HISTORY)).unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn one_bar_short_raises_insufficient_history() {
        let err = compute(&synthetic_frame(MIN_HISTORY - 1)).unwrap_err();
        assert_eq!(err.kind(), "insufficient_history");
    }

    #[test]
    fn compute_is_pure() {
        let input = synthetic_frame(260);
        let a = compute(&input).unwrap();
        let b = compute(&input).unwrap();
        assert_eq!(a.dates, b.dates);
        for name in a.feature_names() {
            assert_eq!(a.column(name), b.column(name));
        }
    }

    #[test]
    fn no_look_ahead_prefix_agrees_with_full_series() {
        let full = synthetic_frame(300);
        let prefix = OhlcvFrame::new("SYN", full.bars[..260].to_vec());

        let full_features = compute(&full).unwrap();
        let prefix_features = compute(&prefix).unwrap();

        // Every date both frames contain must carry identical values: a
        // feature at date t may depend only on bars <= t.
        for (i, date) in prefix_features.dates.iter().enumerate() {
            let j = full_features
                .dates
                .iter()
                .position(|d| d == date)
                .expect("shared date");
            for name in prefix_features.feature_names() {
                let lhs = prefix_features.value_at(i, name).unwrap();
                let rhs = full_features.value_at(j, name).unwrap();
                let scale = lhs.abs().max(rhs.abs()).max(1.0);
                assert!(
                    ((lhs - rhs) / scale).abs() < 1e-9,
                    "{name} diverges at {date}: {lhs} vs {rhs}"
                );
            }
        }
    }

    #[test]
    fn emitted_rows_have_no_nans() {
        let frame = compute(&synthetic_frame(280)).unwrap();
        for name in frame.feature_names() {
            assert!(frame.column(name).unwrap().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn model_features_all_exist_in_frame() {
        let frame = compute(&synthetic_frame(220)).unwrap();
        let vector = frame.vector_at(0, MODEL_FEATURES).unwrap();
        assert_eq!(vector.len(), MODEL_FEATURES.len());
    }
}
