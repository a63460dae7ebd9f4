//! Model retraining with validated promotion.
//!
//! A retraining run builds the dataset, trains a candidate on a background
//! thread, validates it with forward-chained splits, and promotes it only
//! when the promotion predicate passes. Every outcome, promoted or not,
//! lands in the append-only metrics log. The current model is never touched
//! by a rejected candidate.

pub mod dataset;
pub mod trainer;
pub mod validation;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use decision_core::config::RetrainingConfig;
use decision_core::{
    CoreError, MarketDataSource, RetrainingDecision, UniverseEntry, ValidationMetrics,
};
use model_store::{ModelArtifact, ModelMetadata, ModelStore, TrainingLogRecord};

/// Result of one retraining run.
#[derive(Debug, Clone)]
pub struct RetrainOutcome {
    pub decision: RetrainingDecision,
    pub reason: String,
    pub metrics: Option<ValidationMetrics>,
    pub version: Option<String>,
    pub forced: bool,
}

#[derive(Debug, Clone)]
pub struct RetrainingStatus {
    pub running: bool,
    pub current_metrics: Option<ValidationMetrics>,
    pub recent_runs: Vec<TrainingLogRecord>,
}

/// Post-promotion regression hook. When wired, it runs right after a
/// promotion; reporting `true` rolls the promotion back automatically. The
/// default deployment leaves it unwired (manual rollback only).
#[async_trait]
pub trait PostPromotionCheck: Send + Sync {
    async fn regressed(&self, artifact: &ModelArtifact) -> bool;
}

pub struct RetrainingService {
    source: Arc<dyn MarketDataSource>,
    store: Arc<ModelStore>,
    universe: Vec<UniverseEntry>,
    config: RetrainingConfig,
    running: AtomicBool,
    post_check: Option<Arc<dyn PostPromotionCheck>>,
}

impl RetrainingService {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<ModelStore>,
        universe: Vec<UniverseEntry>,
        config: RetrainingConfig,
    ) -> Self {
        Self {
            source,
            store,
            universe,
            config,
            running: AtomicBool::new(false),
            post_check: None,
        }
    }

    pub fn with_post_promotion_check(mut self, check: Arc<dyn PostPromotionCheck>) -> Self {
        self.post_check = Some(check);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RetrainingStatus {
        let mut recent = self.store.training_log().unwrap_or_default();
        let keep = recent.len().saturating_sub(20);
        recent.drain(..keep);
        RetrainingStatus {
            running: self.is_running(),
            current_metrics: self.store.current().ok().map(|a| a.metadata.metrics),
            recent_runs: recent,
        }
    }

    /// Run one daily retraining cycle over the standard history window.
    /// `force` overrides the promotion predicate; the override itself is
    /// recorded in the log.
    pub async fn retrain(&self, force: bool) -> Result<RetrainOutcome, CoreError> {
        self.retrain_over(force, self.config.data_period_years).await
    }

    /// Weekly full retrain: identical pipeline, but the dataset covers the
    /// wider `full_data_period_years` history window.
    pub async fn retrain_full(&self, force: bool) -> Result<RetrainOutcome, CoreError> {
        self.retrain_over(force, self.config.full_data_period_years)
            .await
    }

    async fn retrain_over(
        &self,
        force: bool,
        period_years: u32,
    ) -> Result<RetrainOutcome, CoreError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::RetrainingRejected {
                reason: "a retraining run is already in progress".to_string(),
            });
        }

        let result = self.run(force, period_years).await;
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(outcome) => {
                self.store.log_training(&TrainingLogRecord {
                    at: Utc::now(),
                    decision: outcome.decision,
                    reason: outcome.reason.clone(),
                    metrics: outcome.metrics,
                    version: outcome.version.clone(),
                    forced: outcome.forced,
                })?;
            }
            Err(e) => {
                let _ = self.store.log_training(&TrainingLogRecord {
                    at: Utc::now(),
                    decision: RetrainingDecision::Error,
                    reason: e.to_string(),
                    metrics: None,
                    version: None,
                    forced: force,
                });
            }
        }
        result
    }

    async fn run(&self, force: bool, period_years: u32) -> Result<RetrainOutcome, CoreError> {
        tracing::info!(
            tickers = self.universe.len(),
            period_years,
            "retraining started"
        );
        let dataset =
            dataset::build_dataset(self.source.as_ref(), &self.universe, &self.config, period_years)
                .await?;
        tracing::info!(
            rows = dataset.rows.len(),
            used = dataset.tickers_used,
            skipped = dataset.tickers_skipped,
            "training dataset built"
        );

        let splits = self.config.validation_splits;
        // Training is CPU-heavy and long-running; keep it off the runtime's
        // async workers.
        let (metrics, model, samples, feature_names) = tokio::task::spawn_blocking(move || {
            let metrics =
                validation::forward_chained_metrics(&dataset.rows, &dataset.labels, splits);
            let model = trainer::train(&dataset.rows, &dataset.labels);
            (metrics, model, dataset.rows.len(), dataset.feature_names)
        })
        .await
        .map_err(|e| CoreError::RetrainingRejected {
            reason: format!("training task failed: {e}"),
        })?;

        let current_f1 = self.store.current().ok().map(|a| a.metadata.metrics.f1);
        let (decision, reason) = decide(&metrics, current_f1, &self.config, force);

        if decision != RetrainingDecision::Promoted {
            tracing::warn!(?decision, reason = %reason, "candidate rejected");
            return Ok(RetrainOutcome {
                decision,
                reason,
                metrics: Some(metrics),
                version: None,
                forced: force,
            });
        }

        let version = next_version();
        let artifact = ModelArtifact {
            metadata: ModelMetadata {
                version: version.clone(),
                feature_names,
                training_samples: samples,
                metrics,
                trained_at: Utc::now(),
            },
            model,
        };
        self.store.promote(artifact.clone())?;

        if let Some(check) = &self.post_check {
            if check.regressed(&artifact).await {
                let rolled_back = self.store.rollback()?;
                tracing::warn!(version = %version, rolled_back, "post-promotion check regressed");
                return Ok(RetrainOutcome {
                    decision: RetrainingDecision::RejectedDegraded,
                    reason: "post-promotion validation regressed; rolled back".to_string(),
                    metrics: Some(metrics),
                    version: Some(version),
                    forced: force,
                });
            }
        }

        Ok(RetrainOutcome {
            decision: RetrainingDecision::Promoted,
            reason,
            metrics: Some(metrics),
            version: Some(version),
            forced: force,
        })
    }
}

static VERSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Timestamped version id with a process-local sequence so promotions in
/// the same second stay distinct.
fn next_version() -> String {
    let seq = VERSION_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("v{}-{seq}", Utc::now().format("%Y%m%dT%H%M%S"))
}

/// The promotion predicate. A candidate must clear the absolute floors
/// (F1 and accuracy) and must not trail the current model's F1 by more than
/// the configured tolerance. Force mode promotes regardless but the
/// override is spelled out in the reason.
pub fn decide(
    candidate: &ValidationMetrics,
    current_f1: Option<f64>,
    config: &RetrainingConfig,
    force: bool,
) -> (RetrainingDecision, String) {
    if candidate.f1 < config.min_f1 || candidate.accuracy < config.min_accuracy {
        let reason = format!(
            "candidate below floors: f1 {:.3} (min {:.2}), accuracy {:.3} (min {:.2})",
            candidate.f1, config.min_f1, candidate.accuracy, config.min_accuracy
        );
        if force {
            return (
                RetrainingDecision::Promoted,
                format!("forced override; {reason}"),
            );
        }
        return (RetrainingDecision::RejectedLow, reason);
    }

    if let Some(current) = current_f1 {
        let floor = current * (1.0 - config.degradation_tolerance);
        if candidate.f1 < floor {
            let reason = format!(
                "candidate f1 {:.3} trails current {:.3} beyond the {:.0}% tolerance",
                candidate.f1,
                current,
                config.degradation_tolerance * 100.0
            );
            if force {
                return (
                    RetrainingDecision::Promoted,
                    format!("forced override; {reason}"),
                );
            }
            return (RetrainingDecision::RejectedDegraded, reason);
        }
    }

    (
        RetrainingDecision::Promoted,
        format!(
            "candidate cleared thresholds: f1 {:.3}, accuracy {:.3}",
            candidate.f1, candidate.accuracy
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use decision_core::{AssetClass, Bar, MacroPoint, OhlcvFrame, Quote};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, AtomicUsize};

    fn metrics(f1: f64, accuracy: f64) -> ValidationMetrics {
        ValidationMetrics {
            f1,
            accuracy,
            precision: f1,
            recall: f1,
            roc_auc: 0.7,
        }
    }

    #[test]
    fn low_candidate_is_rejected() {
        // The literal degradation scenario: current F1 0.75, candidate 0.62.
        let (decision, reason) = decide(
            &metrics(0.62, 0.75),
            Some(0.75),
            &RetrainingConfig::default(),
            false,
        );
        assert_eq!(decision, RetrainingDecision::RejectedLow);
        assert!(reason.contains("below floors"));
    }

    #[test]
    fn degraded_candidate_is_rejected_even_above_floors() {
        // 0.66 clears the 0.65 floor but trails 0.75 by more than 10%.
        let (decision, _) = decide(
            &metrics(0.66, 0.80),
            Some(0.75),
            &RetrainingConfig::default(),
            false,
        );
        assert_eq!(decision, RetrainingDecision::RejectedDegraded);
    }

    #[test]
    fn healthy_candidate_promotes() {
        let (decision, _) = decide(
            &metrics(0.72, 0.80),
            Some(0.75),
            &RetrainingConfig::default(),
            false,
        );
        assert_eq!(decision, RetrainingDecision::Promoted);
    }

    #[test]
    fn first_model_needs_no_current_comparison() {
        let (decision, _) = decide(
            &metrics(0.70, 0.75),
            None,
            &RetrainingConfig::default(),
            false,
        );
        assert_eq!(decision, RetrainingDecision::Promoted);
    }

    #[test]
    fn force_overrides_but_says_so() {
        let (decision, reason) = decide(
            &metrics(0.30, 0.40),
            Some(0.75),
            &RetrainingConfig::default(),
            true,
        );
        assert_eq!(decision, RetrainingDecision::Promoted);
        assert!(reason.contains("forced override"));
    }

    // --- service-level tests over a deterministic source ---

    struct FixtureSource {
        days_seen: AtomicU32,
    }

    impl FixtureSource {
        fn new() -> Self {
            Self {
                days_seen: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for FixtureSource {
        async fn fetch_history(&self, ticker: &str, days: u32) -> Result<OhlcvFrame, CoreError> {
            self.days_seen.store(days, Ordering::SeqCst);
            let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
            let bars = (0..400)
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
            Ok(OhlcvFrame::new(ticker, bars))
        }

        async fn fetch_macro(&self, _id: &str, _days: u32) -> Result<Vec<MacroPoint>, CoreError> {
            Ok(vec![])
        }

        async fn fetch_current(&self, ticker: &str) -> Result<Quote, CoreError> {
            Ok(Quote {
                ticker: ticker.to_string(),
                price: 100.0,
                as_of: Utc::now(),
            })
        }
    }

    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn temp_store() -> Arc<ModelStore> {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let root: PathBuf = std::env::temp_dir().join(format!(
            "retraining-test-{}-{}",
            std::process::id(),
            seq
        ));
        Arc::new(ModelStore::open(root).unwrap())
    }

    fn universe() -> Vec<UniverseEntry> {
        vec![UniverseEntry {
            ticker: "AAA".to_string(),
            name: "Fixture Corp".to_string(),
            market: "us".to_string(),
            asset_class: AssetClass::Equity,
        }]
    }

    fn permissive_config() -> RetrainingConfig {
        RetrainingConfig {
            min_f1: 0.0,
            min_accuracy: 0.0,
            ..RetrainingConfig::default()
        }
    }

    #[tokio::test]
    async fn retrain_promotes_and_logs_under_permissive_floors() {
        let store = temp_store();
        let service = RetrainingService::new(
            Arc::new(FixtureSource::new()),
            store.clone(),
            universe(),
            permissive_config(),
        );

        let outcome = service.retrain(false).await.unwrap();
        assert_eq!(outcome.decision, RetrainingDecision::Promoted);
        assert!(outcome.version.is_some());

        let current = store.current().unwrap();
        assert_eq!(
            current.metadata.feature_names.len(),
            feature_engine::MODEL_FEATURES.len()
        );
        assert!(current.metadata.training_samples > 0);

        let log = store.training_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].decision, RetrainingDecision::Promoted);
    }

    #[tokio::test]
    async fn full_retrain_requests_the_wider_history_window() {
        let store = temp_store();
        let source = Arc::new(FixtureSource::new());
        let config = permissive_config();
        let daily_days = config.data_period_years * 365;
        let full_days = config.full_data_period_years * 365;
        let service = RetrainingService::new(source.clone(), store, universe(), config);

        service.retrain(false).await.unwrap();
        assert_eq!(source.days_seen.load(Ordering::SeqCst), daily_days);

        service.retrain_full(false).await.unwrap();
        assert_eq!(source.days_seen.load(Ordering::SeqCst), full_days);
    }

    #[tokio::test]
    async fn rejection_leaves_the_current_model_untouched() {
        let store = temp_store();
        let strict = RetrainingConfig {
            min_f1: 0.99,
            min_accuracy: 0.99,
            ..RetrainingConfig::default()
        };

        // Seed a current model first.
        let seed_service = RetrainingService::new(
            Arc::new(FixtureSource::new()),
            store.clone(),
            universe(),
            permissive_config(),
        );
        let seeded = seed_service.retrain(false).await.unwrap();
        let seeded_version = seeded.version.unwrap();

        let service = RetrainingService::new(
            Arc::new(FixtureSource::new()),
            store.clone(),
            universe(),
            strict,
        );
        let outcome = service.retrain(false).await.unwrap();
        assert_eq!(outcome.decision, RetrainingDecision::RejectedLow);
        assert_eq!(store.current().unwrap().metadata.version, seeded_version);

        let log = store.training_log().unwrap();
        assert_eq!(log.last().unwrap().decision, RetrainingDecision::RejectedLow);
    }

    #[tokio::test]
    async fn forced_run_is_marked_in_the_log() {
        let store = temp_store();
        let strict = RetrainingConfig {
            min_f1: 0.99,
            min_accuracy: 0.99,
            ..RetrainingConfig::default()
        };
        let service =
            RetrainingService::new(Arc::new(FixtureSource::new()), store.clone(), universe(), strict);

        let outcome = service.retrain(true).await.unwrap();
        assert_eq!(outcome.decision, RetrainingDecision::Promoted);
        assert!(outcome.forced);
        assert!(store.training_log().unwrap()[0].forced);
    }

    struct AlwaysRegressed;

    #[async_trait]
    impl PostPromotionCheck for AlwaysRegressed {
        async fn regressed(&self, _artifact: &ModelArtifact) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn post_promotion_regression_rolls_back() {
        let store = temp_store();

        let seed = RetrainingService::new(
            Arc::new(FixtureSource::new()),
            store.clone(),
            universe(),
            permissive_config(),
        );
        let first = seed.retrain(false).await.unwrap().version.unwrap();

        let service = RetrainingService::new(
            Arc::new(FixtureSource::new()),
            store.clone(),
            universe(),
            permissive_config(),
        )
        .with_post_promotion_check(Arc::new(AlwaysRegressed));

        let outcome = service.retrain(false).await.unwrap();
        assert_eq!(outcome.decision, RetrainingDecision::RejectedDegraded);
        // Rolled back to the seeded model.
        assert_eq!(store.current().unwrap().metadata.version, first);
    }
}
