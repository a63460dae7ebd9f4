//! Rule-based technical component.
//!
//! Each rule contributes a signed increment to a base of 50; the sum is
//! clipped to [0, 100]. When the rules cancel out exactly, RSI settles the
//! tie with a small nudge (lower RSI favored for long bias).

use decision_core::Factor;
use feature_engine::FeatureRow;

pub struct TechnicalScore {
    pub score: f64,
    /// Rule name and raw signed increment, before component weighting.
    pub rules: Vec<Factor>,
}

pub fn technical_score(row: &FeatureRow<'_>) -> TechnicalScore {
    let mut rules: Vec<Factor> = Vec::new();
    let mut push = |name: &str, increment: f64| {
        rules.push(Factor {
            name: name.to_string(),
            contribution: increment,
        });
    };

    let rsi = row.get("rsi_14").unwrap_or(50.0);
    if rsi < 30.0 {
        push("RSI oversold", 15.0);
    } else if rsi < 40.0 {
        push("RSI approaching oversold", 8.0);
    } else if rsi > 70.0 {
        push("RSI overbought", -15.0);
    } else if rsi > 60.0 {
        push("RSI approaching overbought", -8.0);
    }

    if let (Some(macd), Some(signal)) = (row.get("macd"), row.get("macd_signal")) {
        if macd > signal {
            push("MACD above signal line", 12.0);
        } else if macd < signal {
            push("MACD below signal line", -12.0);
        }
    }

    if let Some(percent_b) = row.get("bb_percent_b") {
        if percent_b < 0.2 {
            push("Price near lower Bollinger band", 10.0);
        } else if percent_b > 0.8 {
            push("Price near upper Bollinger band", -10.0);
        }
    }

    if let (Some(adx), Some(plus_di), Some(minus_di)) = (
        row.get("adx_14"),
        row.get("plus_di_14"),
        row.get("minus_di_14"),
    ) {
        if adx > 25.0 {
            if plus_di > minus_di {
                push("Strong uptrend (ADX)", 10.0);
            } else {
                push("Strong downtrend (ADX)", -10.0);
            }
        }
    }

    if let (Some(close), Some(psar)) = (row.get("close"), row.get("psar")) {
        if close > psar {
            push("Parabolic SAR below price", 8.0);
        } else if close < psar {
            push("Parabolic SAR above price", -8.0);
        }
    }

    let net: f64 = rules.iter().map(|r| r.contribution).sum();
    let score = if net == 0.0 {
        // Exact tie between bullish and bearish rules: lower RSI wins.
        50.0 + (50.0 - rsi) * 0.05
    } else {
        50.0 + net
    };

    TechnicalScore {
        score: score.clamp(0.0, 100.0),
        rules,
    }
}
