//! Indicator primitives over daily bars.
//!
//! Every function returns a series aligned 1:1 with its input: warmup slots
//! that cannot be computed yet hold `f64::NAN`. Alignment keeps the no
//! look-ahead property trivially checkable: the value at index `i` is
//! computed from bars `..=i` only.

use decision_core::Bar;
use statrs::statistics::Statistics;

/// Simple moving average.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    let mut sum: f64 = data[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first window.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    for i in period..data.len() {
        out[i] = (data[i] - out[i - 1]) * multiplier + out[i - 1];
    }
    out
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period + 1 {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

/// MACD line and its signal EMA, both aligned to the input.
pub fn macd(data: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let n = data.len();
    let mut line = vec![f64::NAN; n];
    let mut signal = vec![f64::NAN; n];
    if fast == 0 || slow == 0 || signal_period == 0 || slow <= fast || n < slow {
        return MacdSeries { macd: line, signal };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    for i in slow - 1..n {
        line[i] = ema_fast[i] - ema_slow[i];
    }

    // Signal EMA runs over the defined portion of the MACD line.
    let defined: Vec<f64> = line[slow - 1..].to_vec();
    let sig = ema(&defined, signal_period);
    for (offset, value) in sig.into_iter().enumerate() {
        signal[slow - 1 + offset] = value;
    }

    MacdSeries { macd: line, signal }
}

/// Bollinger %B: position of the close inside the bands, 0 at the lower
/// band and 1 at the upper.
pub fn bollinger_percent_b(data: &[f64], period: usize, num_std: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    for i in period - 1..data.len() {
        let window = &data[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let band = num_std * variance.sqrt();
        out[i] = if band > 0.0 {
            (data[i] - (mean - band)) / (2.0 * band)
        } else {
            0.5
        };
    }
    out
}

/// Average True Range with Wilder smoothing.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let tr: Vec<f64> = (1..n).map(|i| true_range(&bars[i], &bars[i - 1])).collect();
    let mut value = tr[..period].iter().sum::<f64>() / period as f64;
    out[period] = value;
    for i in period + 1..n {
        value = (value * (period - 1) as f64 + tr[i - 1]) / period as f64;
        out[i] = value;
    }
    out
}

fn true_range(bar: &Bar, prev: &Bar) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev.close).abs())
        .max((bar.low - prev.close).abs())
}

pub struct AdxSeries {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

/// Average Directional Index with the directional components, Wilder style.
pub fn adx(bars: &[Bar], period: usize) -> AdxSeries {
    let n = bars.len();
    let mut adx_out = vec![f64::NAN; n];
    let mut pdi_out = vec![f64::NAN; n];
    let mut mdi_out = vec![f64::NAN; n];
    if period == 0 || n < period * 2 + 1 {
        return AdxSeries {
            adx: adx_out,
            plus_di: pdi_out,
            minus_di: mdi_out,
        };
    }

    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut tr = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(true_range(&bars[i], &bars[i - 1]));
    }

    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr[..period].iter().sum();

    let mut dx_values = Vec::new();
    for i in period..plus_dm.len() {
        smooth_plus = smooth_plus - smooth_plus / period as f64 + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period as f64 + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period as f64 + tr[i];

        let (pdi, mdi) = if smooth_tr > 0.0 {
            (
                100.0 * smooth_plus / smooth_tr,
                100.0 * smooth_minus / smooth_tr,
            )
        } else {
            (0.0, 0.0)
        };
        // dm index i corresponds to bar index i + 1
        pdi_out[i + 1] = pdi;
        mdi_out[i + 1] = mdi;

        let di_sum = pdi + mdi;
        let dx = if di_sum > 0.0 {
            100.0 * (pdi - mdi).abs() / di_sum
        } else {
            0.0
        };
        dx_values.push((i + 1, dx));

        if dx_values.len() == period {
            let seed = dx_values.iter().map(|(_, v)| v).sum::<f64>() / period as f64;
            adx_out[i + 1] = seed;
        } else if dx_values.len() > period {
            let prev = adx_out[i];
            adx_out[i + 1] = (prev * (period - 1) as f64 + dx) / period as f64;
        }
    }

    AdxSeries {
        adx: adx_out,
        plus_di: pdi_out,
        minus_di: mdi_out,
    }
}

/// Period return: (close[i] - close[i-n]) / close[i-n].
pub fn momentum(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 {
        return out;
    }
    for i in period..data.len() {
        if data[i - period] != 0.0 {
            out[i] = (data[i] - data[i - period]) / data[i - period];
        }
    }
    out
}

/// On-Balance Volume.
pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if bars.is_empty() {
        return out;
    }
    out[0] = bars[0].volume;
    for i in 1..bars.len() {
        out[i] = if bars[i].close > bars[i - 1].close {
            out[i - 1] + bars[i].volume
        } else if bars[i].close < bars[i - 1].close {
            out[i - 1] - bars[i].volume
        } else {
            out[i - 1]
        };
    }
    out
}

/// Rolling volume-weighted average price over typical prices.
pub fn rolling_vwap(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }
    for i in period - 1..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let volume: f64 = window.iter().map(|b| b.volume).sum();
        if volume > 0.0 {
            let weighted: f64 = window
                .iter()
                .map(|b| (b.high + b.low + b.close) / 3.0 * b.volume)
                .sum();
            out[i] = weighted / volume;
        } else {
            out[i] = bars[i].close;
        }
    }
    out
}

/// Williams %R in [-100, 0].
pub fn williams_r(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }
    for i in period - 1..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        out[i] = if highest > lowest {
            -100.0 * (highest - bars[i].close) / (highest - lowest)
        } else {
            -50.0
        };
    }
    out
}

/// Rolling standard deviation of log returns.
pub fn log_return_volatility(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period + 1 {
        return out;
    }
    let returns: Vec<f64> = (1..data.len())
        .map(|i| {
            if data[i - 1] > 0.0 && data[i] > 0.0 {
                (data[i] / data[i - 1]).ln()
            } else {
                0.0
            }
        })
        .collect();
    for i in period..data.len() {
        let window = &returns[i - period..i];
        out[i] = window.std_dev();
    }
    out
}

/// Parabolic SAR with the classic 0.02/0.2 acceleration schedule.
pub fn parabolic_sar(bars: &[Bar], af_step: f64, af_max: f64) -> Vec<f64> {
    let n = bars.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 {
        return out;
    }

    let mut uptrend = bars[1].close >= bars[0].close;
    let mut sar = if uptrend { bars[0].low } else { bars[0].high };
    let mut extreme = if uptrend { bars[1].high } else { bars[1].low };
    let mut af = af_step;
    out[1] = sar;

    for i in 2..n {
        sar += af * (extreme - sar);
        if uptrend {
            sar = sar.min(bars[i - 1].low).min(bars[i - 2].low);
            if bars[i].low < sar {
                // Reversal: flip to the prior extreme.
                uptrend = false;
                sar = extreme;
                extreme = bars[i].low;
                af = af_step;
            } else if bars[i].high > extreme {
                extreme = bars[i].high;
                af = (af + af_step).min(af_max);
            }
        } else {
            sar = sar.max(bars[i - 1].high).max(bars[i - 2].high);
            if bars[i].high > sar {
                uptrend = true;
                sar = extreme;
                extreme = bars[i].high;
                af = af_step;
            } else if bars[i].low < extreme {
                extreme = bars[i].low;
                af = (af + af_step).min(af_max);
            }
        }
        out[i] = sar;
    }
    out
}
