//! Bounded parallel fan-out over the asset universe.
//!
//! Applies a per-ticker async function across a list of tickers with a
//! worker-pool bound and a per-item timeout. One item's failure or timeout
//! never cancels its siblings: the batch always completes with a partial
//! result plus a failure summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use decision_core::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub item_timeout: Duration,
}

impl ExecutorSettings {
    pub fn new(workers: usize, item_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            item_timeout,
        }
    }
}

/// One ticker that did not produce a result, with a stable failure kind.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub ticker: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchMetrics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub elapsed: Duration,
    /// Per-item wall time, successful and failed alike.
    pub item_durations: Vec<(String, Duration)>,
}

pub struct BatchOutcome<T> {
    pub results: Vec<(String, T)>,
    pub failures: Vec<ItemFailure>,
    pub metrics: BatchMetrics,
}

/// Run `work` for every ticker on a bounded worker pool. Results arrive in
/// arbitrary order; callers sort.
pub async fn run_batch<T, F, Fut>(
    tickers: Vec<String>,
    settings: ExecutorSettings,
    work: F,
) -> BatchOutcome<T>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = Result<T, CoreError>> + Send + 'static,
{
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(settings.workers));
    let mut tasks = JoinSet::new();

    for ticker in tickers {
        let semaphore = semaphore.clone();
        let work = work.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("executor semaphore closed");
            let item_started = Instant::now();
            let result = tokio::time::timeout(settings.item_timeout, work(ticker.clone())).await;
            (ticker, result, item_started.elapsed())
        });
    }

    let mut outcome = BatchOutcome {
        results: Vec::new(),
        failures: Vec::new(),
        metrics: BatchMetrics::default(),
    };

    while let Some(joined) = tasks.join_next().await {
        outcome.metrics.total += 1;
        match joined {
            Ok((ticker, Ok(Ok(value)), duration)) => {
                outcome.metrics.succeeded += 1;
                outcome.metrics.item_durations.push((ticker.clone(), duration));
                outcome.results.push((ticker, value));
            }
            Ok((ticker, Ok(Err(e)), duration)) => {
                tracing::warn!(ticker = %ticker, error = %e, "batch item failed");
                outcome.metrics.failed += 1;
                outcome.metrics.item_durations.push((ticker.clone(), duration));
                outcome.failures.push(ItemFailure {
                    ticker,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
            Ok((ticker, Err(_elapsed), duration)) => {
                tracing::warn!(ticker = %ticker, "batch item timed out");
                outcome.metrics.failed += 1;
                outcome.metrics.timed_out += 1;
                outcome.metrics.item_durations.push((ticker.clone(), duration));
                outcome.failures.push(ItemFailure {
                    ticker,
                    kind: "timeout".to_string(),
                    message: format!(
                        "item exceeded the {:.1}s timeout",
                        settings.item_timeout.as_secs_f64()
                    ),
                });
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "batch worker panicked");
                outcome.metrics.failed += 1;
                outcome.failures.push(ItemFailure {
                    ticker: String::new(),
                    kind: "panic".to_string(),
                    message: join_error.to_string(),
                });
            }
        }
    }

    outcome.metrics.elapsed = started.elapsed();
    outcome
}

/// Sequential fallback with identical semantics, for debugging.
pub async fn run_sequential<T, F, Fut>(
    tickers: Vec<String>,
    settings: ExecutorSettings,
    work: F,
) -> BatchOutcome<T>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let started = Instant::now();
    let mut outcome = BatchOutcome {
        results: Vec::new(),
        failures: Vec::new(),
        metrics: BatchMetrics::default(),
    };

    for ticker in tickers {
        outcome.metrics.total += 1;
        let item_started = Instant::now();
        let result = tokio::time::timeout(settings.item_timeout, work(ticker.clone())).await;
        let duration = item_started.elapsed();
        outcome
            .metrics
            .item_durations
            .push((ticker.clone(), duration));
        match result {
            Ok(Ok(value)) => {
                outcome.metrics.succeeded += 1;
                outcome.results.push((ticker, value));
            }
            Ok(Err(e)) => {
                outcome.metrics.failed += 1;
                outcome.failures.push(ItemFailure {
                    ticker,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
            Err(_elapsed) => {
                outcome.metrics.failed += 1;
                outcome.metrics.timed_out += 1;
                outcome.failures.push(ItemFailure {
                    ticker,
                    kind: "timeout".to_string(),
                    message: format!(
                        "item exceeded the {:.1}s timeout",
                        settings.item_timeout.as_secs_f64()
                    ),
                });
            }
        }
    }

    outcome.metrics.elapsed = started.elapsed();
    outcome
}
