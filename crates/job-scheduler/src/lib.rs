//! Background job scheduler.
//!
//! Three recurring jobs: ranking refresh per market scope, feature-cache
//! warmup for the top-N by prior rank, and the daily retrain at a
//! configured hour. Jobs of one kind never overlap (a late run skips
//! instead of stacking) and shutdown lets in-flight jobs finish inside a
//! bounded grace period before cancelling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use ranking_service::DecisionService;

/// Per-job-kind overlap guard: `begin` succeeds only while no other run of
/// the same kind holds the guard.
#[derive(Clone)]
pub struct JobGuard {
    name: &'static str,
    lock: Arc<Mutex<()>>,
}

impl JobGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn begin(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        match self.lock.clone().try_lock_owned() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!(job = self.name, "previous run still in progress, skipping");
                None
            }
        }
    }
}

pub struct Scheduler {
    service: DecisionService,
    ranking_guard: JobGuard,
    warmup_guard: JobGuard,
    retrain_guard: JobGuard,
}

impl Scheduler {
    pub fn new(service: DecisionService) -> Self {
        Self {
            service,
            ranking_guard: JobGuard::new("ranking_refresh"),
            warmup_guard: JobGuard::new("feature_warmup"),
            retrain_guard: JobGuard::new("retraining"),
        }
    }

    /// Run all job loops until `shutdown` flips to true, then grant
    /// in-flight jobs the configured grace period and cancel the rest.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let config = self.service.config().scheduler;
        let grace = Duration::from_secs(config.shutdown_grace_seconds);

        // Startup warms the cache before the first interval elapses.
        self.warmup_once().await;

        let mut jobs = JoinSet::new();

        {
            let scheduler = ArcScheduler(Arc::new(self));
            let mut rx = shutdown.clone();
            let s = scheduler.clone();
            jobs.spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(
                    config.ranking_refresh_seconds.max(1),
                ));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => s.0.ranking_refresh_once().await,
                        _ = rx.changed() => break,
                    }
                }
            });

            let mut rx = shutdown.clone();
            let s = scheduler.clone();
            jobs.spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(config.warmup_seconds.max(1)));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The startup warmup already ran; skip the immediate tick.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => s.0.warmup_once().await,
                        _ = rx.changed() => break,
                    }
                }
            });

            let mut rx = shutdown.clone();
            let s = scheduler;
            jobs.spawn(async move {
                loop {
                    let wait = seconds_until_daily_run(s.0.service.config().retraining.hour_utc);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => s.0.retrain_once().await,
                        _ = rx.changed() => break,
                    }
                }
            });
        }

        // Wait for the stop signal, then drain with a bounded grace.
        let _ = shutdown.changed().await;
        tracing::info!(grace_seconds = grace.as_secs(), "scheduler stopping");

        let drain = async {
            while jobs.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("grace period elapsed, cancelling remaining jobs");
            jobs.shutdown().await;
        }
        tracing::info!("scheduler stopped");
    }

    /// One ranking refresh across every configured market scope.
    pub async fn ranking_refresh_once(&self) {
        let Some(_guard) = self.ranking_guard.begin() else {
            return;
        };
        for market in self.service.markets() {
            match self.service.refresh_ranking(&market).await {
                Ok(snapshot) => tracing::info!(
                    market = %market,
                    entries = snapshot.entries.len(),
                    failures = snapshot.failures.len(),
                    "ranking refresh complete"
                ),
                Err(e) if e.kind() == "model_unavailable" => {
                    tracing::warn!(market = %market, "no model loaded yet, deferring ranking refresh");
                }
                Err(e) => tracing::error!(market = %market, error = %e, "ranking refresh failed"),
            }
        }
    }

    pub async fn warmup_once(&self) {
        let Some(_guard) = self.warmup_guard.begin() else {
            return;
        };
        let top_n = self.service.config().scheduler.warmup_top_n;
        self.service.warm_features(top_n).await;
        tracing::debug!(top_n, "feature warmup complete");
    }

    pub async fn retrain_once(&self) {
        let Some(_guard) = self.retrain_guard.begin() else {
            return;
        };
        let retraining = &self.service.config().retraining;
        let full = retraining
            .weekly_full_weekday
            .map(|weekday| Utc::now().weekday().num_days_from_monday() == weekday)
            .unwrap_or(false);

        // The weekly run rebuilds the dataset over the wider history window.
        let result = if full {
            tracing::info!(
                period_years = retraining.full_data_period_years,
                "weekly full retrain"
            );
            self.service.retrain_full_and_wait(false).await
        } else {
            self.service.retrain_and_wait(false).await
        };

        match result {
            Ok(outcome) => {
                tracing::info!(decision = ?outcome.decision, reason = %outcome.reason, "scheduled retrain finished")
            }
            Err(e) => tracing::error!(error = %e, "scheduled retrain failed"),
        }
    }
}

#[derive(Clone)]
struct ArcScheduler(Arc<Scheduler>);

/// Duration until the next occurrence of `hour_utc`, never zero.
fn seconds_until_daily_run(hour_utc: u32) -> Duration {
    let now = Utc::now();
    let today = now
        .date_naive()
        .and_hms_opt(hour_utc % 24, 0, 0)
        .unwrap_or_else(|| now.naive_utc())
        .and_utc();
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
        .max(Duration::from_secs(1))
}
