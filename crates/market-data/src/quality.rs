use chrono::{Datelike, NaiveDate, Weekday};

use decision_core::{CoreError, OhlcvFrame};

/// Longest acceptable gap between the last bar and today, in trading days.
const MAX_STALE_TRADING_DAYS: i64 = 3;

/// Length of the tail scanned for the flat-close upstream mapping bug.
const FLAT_CLOSE_RUN: usize = 3;

/// Data-quality gate applied to every frame before it leaves the adapter.
/// A failing frame is rejected with the failed predicate named; it is never
/// silently corrected.
pub fn check_frame(frame: &OhlcvFrame, today: NaiveDate) -> Result<(), CoreError> {
    let fail = |predicate: &str| CoreError::QualityFailed {
        ticker: frame.ticker.clone(),
        predicate: predicate.to_string(),
    };

    if frame.bars.is_empty() {
        return Err(CoreError::DataUnavailable {
            ticker: frame.ticker.clone(),
            reason: "empty history".to_string(),
        });
    }

    for pair in frame.bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(fail("dates_not_monotonic"));
        }
    }

    if frame.bars.iter().any(|b| b.volume < 0.0) {
        return Err(fail("negative_volume"));
    }

    // Known upstream mapping bug: the tail repeats the same close while
    // volume keeps printing.
    if frame.bars.len() >= FLAT_CLOSE_RUN {
        let tail = &frame.bars[frame.bars.len() - FLAT_CLOSE_RUN..];
        let flat = tail.windows(2).all(|w| w[0].close == w[1].close);
        let traded = tail.iter().all(|b| b.volume > 0.0);
        if flat && traded {
            return Err(fail("flat_close_run"));
        }
    }

    let last = frame.bars.last().map(|b| b.date).unwrap_or(today);
    if trading_days_between(last, today) > MAX_STALE_TRADING_DAYS {
        return Err(fail("stale_series"));
    }

    Ok(())
}

/// Weekday count in the half-open interval (from, to]. Zero when `from` is
/// today or in the future.
pub fn trading_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    if from >= to {
        return 0;
    }
    let mut count = 0;
    let mut day = from;
    while day < to {
        day = day.succ_opt().unwrap_or(day);
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            count += 1;
        }
    }
    count
}
