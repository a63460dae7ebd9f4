use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use decision_core::{Bar, CoreError, MacroPoint, MarketDataSource, OhlcvFrame, Quote};

pub mod quality;
pub mod symbols;

const DEFAULT_RATE_LIMIT_PER_MIN: usize = 300;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Sliding-window rate limiter: at most `max_requests` per `window`.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests,
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let wait_until = ts.front().unwrap().checked_add(self.window).unwrap();
            let sleep_dur = wait_until.duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("rate limiter: waiting {:.1}s for a slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// How a failed request should be handled.
enum FetchFailure {
    /// Retry with backoff: 429, 5xx, transport errors.
    Retryable(String),
    /// Do not retry within this run: unknown or delisted symbol.
    Permanent(String),
}

/// Full-jitter exponential backoff delay for the given attempt.
fn backoff_delay(attempt: u32) -> Duration {
    let cap = BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(10))
        .min(BACKOFF_CAP_MS);
    let jittered = rand::thread_rng().gen_range(0..=cap);
    Duration::from_millis(jittered)
}

#[derive(Debug, Deserialize)]
struct BarDto {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    bars: Vec<BarDto>,
}

#[derive(Debug, Deserialize)]
struct SeriesPointDto {
    date: NaiveDate,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    points: Vec<SeriesPointDto>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: f64,
    as_of: DateTime<Utc>,
}

/// REST adapter for the upstream market-data source. Owns retry, rate
/// limiting, symbol conventions, and the data-quality gate; everything past
/// this boundary works with validated core types.
pub struct RestMarketData {
    base_url: String,
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
    max_attempts: u32,
}

impl RestMarketData {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let rate_limit: usize = std::env::var("MARKET_DATA_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MIN);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn from_env() -> Result<Self, CoreError> {
        let base_url = std::env::var("MARKET_DATA_BASE_URL").map_err(|_| {
            CoreError::InvalidConfig("MARKET_DATA_BASE_URL is not set".to_string())
        })?;
        let api_key = std::env::var("MARKET_DATA_API_KEY").map_err(|_| {
            CoreError::InvalidConfig("MARKET_DATA_API_KEY is not set".to_string())
        })?;
        Ok(Self::new(base_url, api_key))
    }

    /// Rate-limited GET with bounded retries and full-jitter exponential
    /// backoff. Permanent failures short-circuit without retrying.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        ticker: &str,
    ) -> Result<T, CoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_failure = String::new();

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                tracing::warn!(
                    ticker,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying upstream request after {last_failure}"
                );
                tokio::time::sleep(delay).await;
            }

            self.rate_limiter.acquire().await;

            let sent = self
                .client
                .get(&url)
                .query(query)
                .query(&[("apikey", self.api_key.as_str())])
                .send()
                .await;

            match self.classify(sent).await {
                Ok(body) => {
                    return serde_json::from_str(&body).map_err(|e| CoreError::DataUnavailable {
                        ticker: ticker.to_string(),
                        reason: format!("malformed upstream payload: {e}"),
                    });
                }
                Err(FetchFailure::Permanent(reason)) => {
                    return Err(CoreError::DataUnavailable {
                        ticker: ticker.to_string(),
                        reason,
                    });
                }
                Err(FetchFailure::Retryable(reason)) => {
                    last_failure = reason;
                }
            }
        }

        Err(CoreError::DataUnavailable {
            ticker: ticker.to_string(),
            reason: format!(
                "upstream failed after {} attempts: {last_failure}",
                self.max_attempts
            ),
        })
    }

    async fn classify(
        &self,
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<String, FetchFailure> {
        let response = sent.map_err(|e| FetchFailure::Retryable(format!("transport: {e}")))?;
        let status = response.status();

        if status.is_success() {
            return response
                .text()
                .await
                .map_err(|e| FetchFailure::Retryable(format!("body read: {e}")));
        }

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchFailure::Permanent(
                "permanently unavailable (unknown or delisted symbol)".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(FetchFailure::Retryable("rate limited (429)".to_string()))
            }
            s if s.is_server_error() => {
                Err(FetchFailure::Retryable(format!("server error ({s})")))
            }
            s => Err(FetchFailure::Permanent(format!("unexpected status {s}"))),
        }
    }
}

#[async_trait]
impl MarketDataSource for RestMarketData {
    async fn fetch_history(&self, ticker: &str, days: u32) -> Result<OhlcvFrame, CoreError> {
        let symbol = symbols::source_symbol(ticker);
        let response: HistoryResponse = self
            .get_json(
                &format!("/v1/daily/{symbol}"),
                &[("days", days.to_string())],
                ticker,
            )
            .await?;

        let bars: Vec<Bar> = response
            .bars
            .into_iter()
            .map(|b| Bar {
                date: b.date,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            })
            .collect();

        let frame = OhlcvFrame::new(ticker, bars);
        quality::check_frame(&frame, Utc::now().date_naive())?;
        Ok(frame)
    }

    async fn fetch_macro(&self, series_id: &str, days: u32) -> Result<Vec<MacroPoint>, CoreError> {
        let response: SeriesResponse = self
            .get_json(
                &format!("/v1/series/{series_id}"),
                &[("days", days.to_string())],
                series_id,
            )
            .await?;

        let mut points: Vec<MacroPoint> = response
            .points
            .into_iter()
            .map(|p| MacroPoint {
                date: p.date,
                value: p.value,
            })
            .collect();
        points.sort_by_key(|p| p.date);

        if points.is_empty() {
            return Err(CoreError::DataUnavailable {
                ticker: series_id.to_string(),
                reason: "empty macro series".to_string(),
            });
        }
        Ok(points)
    }

    async fn fetch_current(&self, ticker: &str) -> Result<Quote, CoreError> {
        let symbol = symbols::source_symbol(ticker);
        let response: QuoteResponse = self
            .get_json(&format!("/v1/quote/{symbol}"), &[], ticker)
            .await?;

        Ok(Quote {
            ticker: ticker.to_string(),
            price: response.price,
            as_of: response.as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_capped() {
        for attempt in 0..12 {
            let d = backoff_delay(attempt);
            assert!(d <= Duration::from_millis(BACKOFF_CAP_MS));
        }
    }

    #[tokio::test]
    async fn rate_limiter_allows_burst_within_window() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
