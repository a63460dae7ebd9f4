//! Training dataset construction.
//!
//! For every ticker in the training universe: fetch history, compute the
//! feature frame, and label each row with whether the forward-window return
//! cleared the threshold. The label at a row is computed from bars strictly
//! after the last bar that produced the row's features; rows too close to
//! the end of the history are dropped rather than labeled optimistically.

use decision_core::config::RetrainingConfig;
use decision_core::{CoreError, MarketDataSource, OhlcvFrame, UniverseEntry};
use feature_engine::MODEL_FEATURES;

pub struct Dataset {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
    pub tickers_used: usize,
    pub tickers_skipped: usize,
}

/// Build the training frame with deterministic row ordering: tickers
/// ascending, then dates ascending within each ticker. `period_years`
/// selects the history window (the daily window, or the wider one for a
/// full retrain).
pub async fn build_dataset(
    source: &dyn MarketDataSource,
    universe: &[UniverseEntry],
    config: &RetrainingConfig,
    period_years: u32,
) -> Result<Dataset, CoreError> {
    let mut tickers: Vec<&str> = universe.iter().map(|e| e.ticker.as_str()).collect();
    tickers.sort_unstable();

    let days = period_years * 365;
    let mut dataset = Dataset {
        feature_names: MODEL_FEATURES.iter().map(|s| s.to_string()).collect(),
        rows: Vec::new(),
        labels: Vec::new(),
        tickers_used: 0,
        tickers_skipped: 0,
    };

    for ticker in tickers {
        match source.fetch_history(ticker, days).await {
            Ok(frame) => match append_ticker(&mut dataset, &frame, config) {
                Ok(rows) if rows > 0 => dataset.tickers_used += 1,
                Ok(_) => dataset.tickers_skipped += 1,
                Err(e) => {
                    tracing::warn!(ticker, error = %e, "skipping ticker in training set");
                    dataset.tickers_skipped += 1;
                }
            },
            Err(e) if e.is_per_ticker() => {
                tracing::warn!(ticker, error = %e, "skipping ticker in training set");
                dataset.tickers_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if dataset.rows.is_empty() {
        return Err(CoreError::DataUnavailable {
            ticker: "<training universe>".to_string(),
            reason: "no ticker produced labeled training rows".to_string(),
        });
    }
    Ok(dataset)
}

fn append_ticker(
    dataset: &mut Dataset,
    ohlcv: &OhlcvFrame,
    config: &RetrainingConfig,
) -> Result<usize, CoreError> {
    ohlcv.validate(decision_core::MIN_TRAINING_BARS)?;
    let features = feature_engine::compute(ohlcv)?;

    // Feature rows are a suffix of the bar series; recover the bar index of
    // each row from the offset.
    let offset = ohlcv.len() - features.len();
    let horizon = config.label_horizon_days;
    let mut appended = 0;

    for row in 0..features.len() {
        let bar_idx = offset + row;
        let future_idx = bar_idx + horizon;
        if future_idx >= ohlcv.len() {
            break; // label would peek past the available history
        }

        let entry_close = ohlcv.bars[bar_idx].close;
        if entry_close <= 0.0 {
            continue;
        }
        let forward_return = (ohlcv.bars[future_idx].close - entry_close) / entry_close;

        let vector = features
            .vector_at(row, MODEL_FEATURES)
            .ok_or_else(|| CoreError::InvalidConfig("model feature missing from frame".into()))?;
        dataset.rows.push(vector);
        dataset.labels.push(forward_return >= config.label_threshold);
        appended += 1;
    }

    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use decision_core::{AssetClass, Bar, MacroPoint, Quote};

    struct FixtureSource;

    fn fixture_frame(ticker: &str, len: usize) -> OhlcvFrame {
        let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        // Mild sinusoid over a trend: both label classes occur.
        let bars = (0..len)
            .map(|i| {
                let t = i as f64;
                let close = 100.0 + t * 0.05 + 8.0 * (t / 40.0).sin();
                Bar {
                    date: start + chrono::Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 5_000.0,
                }
            })
            .collect();
        OhlcvFrame::new(ticker, bars)
    }

    #[async_trait]
    impl MarketDataSource for FixtureSource {
        async fn fetch_history(&self, ticker: &str, _days: u32) -> Result<OhlcvFrame, CoreError> {
            if ticker == "DEAD" {
                return Err(CoreError::DataUnavailable {
                    ticker: ticker.to_string(),
                    reason: "delisted".to_string(),
                });
            }
            Ok(fixture_frame(ticker, 400))
        }

        async fn fetch_macro(&self, _id: &str, _days: u32) -> Result<Vec<MacroPoint>, CoreError> {
            Ok(vec![])
        }

        async fn fetch_current(&self, ticker: &str) -> Result<Quote, CoreError> {
            Ok(Quote {
                ticker: ticker.to_string(),
                price: 100.0,
                as_of: chrono::Utc::now(),
            })
        }
    }

    fn universe(tickers: &[&str]) -> Vec<UniverseEntry> {
        tickers
            .iter()
            .map(|t| UniverseEntry {
                ticker: t.to_string(),
                name: t.to_string(),
                market: "us".to_string(),
                asset_class: AssetClass::Equity,
            })
            .collect()
    }

    #[tokio::test]
    async fn labels_never_use_bars_inside_the_feature_window() {
        let config = RetrainingConfig::default();
        let dataset = build_dataset(&FixtureSource, &universe(&["AAA"]), &config, config.data_period_years)
            .await
            .unwrap();

        // 400 bars, 200-bar warmup, 30-day horizon: the last 30 feature rows
        // cannot be labeled and must be dropped.
        let frame = fixture_frame("AAA", 400);
        let feature_rows = feature_engine::compute(&frame).unwrap().len();
        assert_eq!(dataset.rows.len(), feature_rows - config.label_horizon_days);
    }

    #[tokio::test]
    async fn row_order_is_deterministic_across_builds() {
        let config = RetrainingConfig::default();
        let a = build_dataset(&FixtureSource, &universe(&["BBB", "AAA"]), &config, config.data_period_years)
            .await
            .unwrap();
        let b = build_dataset(&FixtureSource, &universe(&["AAA", "BBB"]), &config, config.data_period_years)
            .await
            .unwrap();
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.labels, b.labels);
    }

    #[tokio::test]
    async fn unavailable_ticker_is_skipped_not_fatal() {
        let config = RetrainingConfig::default();
        let dataset = build_dataset(&FixtureSource, &universe(&["AAA", "DEAD"]), &config, config.data_period_years)
            .await
            .unwrap();
        assert_eq!(dataset.tickers_used, 1);
        assert_eq!(dataset.tickers_skipped, 1);
        assert!(!dataset.rows.is_empty());
    }

    #[tokio::test]
    async fn both_label_classes_occur_on_the_fixture() {
        let config = RetrainingConfig::default();
        let dataset = build_dataset(&FixtureSource, &universe(&["AAA"]), &config, config.data_period_years)
            .await
            .unwrap();
        assert!(dataset.labels.iter().any(|&l| l));
        assert!(dataset.labels.iter().any(|&l| !l));
    }
}
