//! The typed core surface the host talks to.
//!
//! `DecisionService` owns the provider, caches, detector, model store,
//! scorer, guardrails, and retraining service behind one facade, and
//! publishes ranking snapshots atomically: readers always observe either
//! the full previous snapshot or the full new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio::sync::RwLock;

use batch_executor::{ExecutorSettings, ItemFailure};
use composite_scorer::{CompositeScorer, ScoreInput};
use decision_core::traits::NoopContextProvider;
use decision_core::{
    AllocationProposal, ContextProvider, CoreError, MarketDataSource, RegimeSnapshot,
    ScoreBreakdown, ServiceConfig, UniverseEntry, ValidationMetrics, ValidationResult,
    MIN_SCORING_BARS,
};
use feature_cache::{CacheKey, FeatureCache};
use guardrail_engine::GuardrailEngine;
use model_store::{ModelArtifact, ModelStore};
use regime_detector::RegimeDetector;
use retraining_service::{RetrainingService, RetrainingStatus};

/// Calendar days of history requested on the scoring path; covers the
/// 200-bar feature warmup with margin.
const SCORING_PERIOD_DAYS: u32 = 450;

/// One published ranking for a market scope.
#[derive(Debug, Clone)]
pub struct RankingSnapshot {
    pub scope: String,
    pub regime: RegimeSnapshot,
    /// Sorted descending by composite; ties by ascending ticker.
    pub entries: Vec<ScoreBreakdown>,
    pub failures: Vec<ItemFailure>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetrainJob {
    pub job_id: String,
    pub status: &'static str,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub version: String,
    pub metrics: ValidationMetrics,
    pub features: Vec<String>,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetrainingStatusReport {
    pub status: RetrainingStatus,
    pub next_run: DateTime<Utc>,
}

struct Inner {
    config: Arc<ServiceConfig>,
    source: Arc<dyn MarketDataSource>,
    cache: FeatureCache,
    regime: RegimeDetector,
    store: Arc<ModelStore>,
    scorer: CompositeScorer,
    guardrails: GuardrailEngine,
    retraining: RetrainingService,
    context: Arc<dyn ContextProvider>,
    snapshots: RwLock<HashMap<String, Arc<RankingSnapshot>>>,
    job_seq: AtomicU64,
}

#[derive(Clone)]
pub struct DecisionService {
    inner: Arc<Inner>,
}

impl DecisionService {
    pub fn new(
        config: Arc<ServiceConfig>,
        source: Arc<dyn MarketDataSource>,
        store: Arc<ModelStore>,
    ) -> Self {
        Self::with_context_provider(config, source, store, Arc::new(NoopContextProvider))
    }

    pub fn with_context_provider(
        config: Arc<ServiceConfig>,
        source: Arc<dyn MarketDataSource>,
        store: Arc<ModelStore>,
        context: Arc<dyn ContextProvider>,
    ) -> Self {
        let cache = FeatureCache::new(
            Duration::from_secs(config.cache.feature_ttl_seconds),
            config.cache.capacity,
        );
        let regime = RegimeDetector::new(source.clone(), config.regime.clone());
        let scorer = CompositeScorer::new(
            config.scoring,
            config.signals,
            config.signal_caps,
            config.allocation,
            config.context,
        );
        let guardrails = GuardrailEngine::new(config.allocation, &config.universe);
        let retraining = RetrainingService::new(
            source.clone(),
            store.clone(),
            config.universe.clone(),
            config.retraining.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                source,
                cache,
                regime,
                store,
                scorer,
                guardrails,
                retraining,
                context,
                snapshots: RwLock::new(HashMap::new()),
                job_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Distinct market scopes in the configured universe, sorted.
    pub fn markets(&self) -> Vec<String> {
        let mut markets: Vec<String> = self
            .inner
            .config
            .universe
            .iter()
            .map(|e| e.market.clone())
            .collect();
        markets.sort();
        markets.dedup();
        markets
    }

    // --- query operations ---

    /// Current ranking for a market scope. Serves the published snapshot
    /// while it is fresh, otherwise recomputes and publishes.
    pub async fn get_ranking(&self, scope: &str) -> Result<Arc<RankingSnapshot>, CoreError> {
        let ttl = chrono::Duration::seconds(self.inner.config.cache.ranking_ttl_seconds as i64);
        if let Some(snapshot) = self.inner.snapshots.read().await.get(scope) {
            if Utc::now() - snapshot.computed_at < ttl {
                return Ok(snapshot.clone());
            }
        }
        self.refresh_ranking(scope).await
    }

    /// Recompute and atomically publish the ranking for one scope. The
    /// previously published snapshot stays visible to readers until the
    /// new one is complete.
    pub async fn refresh_ranking(&self, scope: &str) -> Result<Arc<RankingSnapshot>, CoreError> {
        let entries = self.inner.config.universe_for_market(scope);
        if entries.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "unknown market scope: {scope}"
            )));
        }

        // Batch-level preconditions: the model must exist; the regime may
        // degrade to neutral but never aborts the batch.
        let model = self.inner.store.current()?;
        let regime = self.inner.regime.current_or_degraded().await;

        let tickers: Vec<String> = entries.iter().map(|e| e.ticker.clone()).collect();
        let settings = ExecutorSettings::new(
            self.inner.config.executor.workers,
            Duration::from_secs(self.inner.config.executor.timeout_seconds),
        );

        let inner = self.inner.clone();
        let regime_for_items = regime.clone();
        let outcome = batch_executor::run_batch(tickers, settings, move |ticker| {
            let inner = inner.clone();
            let model = model.clone();
            let regime = regime_for_items.clone();
            async move { inner.score_one(&ticker, &model, &regime).await }
        })
        .await;

        let mut ranked: Vec<ScoreBreakdown> =
            outcome.results.into_iter().map(|(_, b)| b).collect();
        ranked.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });

        tracing::info!(
            scope,
            ranked = ranked.len(),
            failed = outcome.failures.len(),
            elapsed_ms = outcome.metrics.elapsed.as_millis() as u64,
            "ranking refreshed"
        );

        let snapshot = Arc::new(RankingSnapshot {
            scope: scope.to_string(),
            regime,
            entries: ranked,
            failures: outcome.failures,
            computed_at: Utc::now(),
        });

        self.inner
            .snapshots
            .write()
            .await
            .insert(scope.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub async fn get_regime(&self) -> Result<RegimeSnapshot, CoreError> {
        self.inner.regime.current().await
    }

    /// Fresh single-ticker score outside any published snapshot.
    pub async fn predict_ticker(&self, ticker: &str) -> Result<ScoreBreakdown, CoreError> {
        let entry = self.inner.lookup(ticker)?;
        let model = self.inner.store.current()?;
        let regime = self.inner.regime.current_or_degraded().await;
        self.inner.score_one(&entry.ticker, &model, &regime).await
    }

    /// Case-insensitive prefix/substring match over tickers and display
    /// names.
    pub fn search_universe(&self, query: &str) -> Vec<UniverseEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.inner
            .config
            .universe
            .iter()
            .filter(|e| {
                e.ticker.to_lowercase().starts_with(&needle)
                    || e.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub async fn validate_allocation(&self, proposal: &AllocationProposal) -> ValidationResult {
        let regime = self.inner.regime.current_or_degraded().await;
        self.inner.guardrails.validate(proposal, &regime)
    }

    // --- admin operations ---

    /// Kick off a retraining run in the background.
    pub fn retrain(&self, force: bool) -> RetrainJob {
        if self.inner.retraining.is_running() {
            return RetrainJob {
                job_id: String::new(),
                status: "already_running",
            };
        }

        let job_id = format!(
            "retrain-{}",
            self.inner.job_seq.fetch_add(1, Ordering::SeqCst)
        );
        let inner = self.inner.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            match inner.retraining.retrain(force).await {
                Ok(outcome) => {
                    tracing::info!(job_id = %id, decision = ?outcome.decision, "retraining finished")
                }
                Err(e) => tracing::error!(job_id = %id, error = %e, "retraining failed"),
            }
        });

        RetrainJob {
            job_id,
            status: "started",
        }
    }

    /// Blocking variant used by the scheduler's non-overlapping job loop.
    pub async fn retrain_and_wait(
        &self,
        force: bool,
    ) -> Result<retraining_service::RetrainOutcome, CoreError> {
        self.inner.retraining.retrain(force).await
    }

    /// Weekly full retrain: same pipeline over the wider history window.
    pub async fn retrain_full_and_wait(
        &self,
        force: bool,
    ) -> Result<retraining_service::RetrainOutcome, CoreError> {
        self.inner.retraining.retrain_full(force).await
    }

    pub fn rollback_model(&self) -> Result<bool, CoreError> {
        self.inner.store.rollback()
    }

    pub fn model_info(&self) -> Result<ModelInfo, CoreError> {
        let artifact = self.inner.store.current()?;
        Ok(ModelInfo {
            version: artifact.metadata.version.clone(),
            metrics: artifact.metadata.metrics,
            features: artifact.metadata.feature_names.clone(),
            trained_at: artifact.metadata.trained_at,
        })
    }

    pub fn retraining_status(&self) -> RetrainingStatusReport {
        RetrainingStatusReport {
            status: self.inner.retraining.status(),
            next_run: next_daily_run(Utc::now(), self.inner.config.retraining.hour_utc),
        }
    }

    // --- scheduler hooks ---

    /// Preload feature frames for the top-N tickers by prior rank; falls
    /// back to universe order before any ranking exists. Failures only log.
    pub async fn warm_features(&self, top_n: usize) {
        let mut tickers: Vec<String> = Vec::new();
        {
            let snapshots = self.inner.snapshots.read().await;
            for snapshot in snapshots.values() {
                for entry in &snapshot.entries {
                    if !tickers.contains(&entry.ticker) {
                        tickers.push(entry.ticker.clone());
                    }
                }
            }
        }
        if tickers.is_empty() {
            tickers = self
                .inner
                .config
                .universe
                .iter()
                .map(|e| e.ticker.clone())
                .collect();
        }
        tickers.truncate(top_n);

        for ticker in tickers {
            if let Err(e) = self.inner.features_for(&ticker).await {
                tracing::debug!(ticker = %ticker, error = %e, "warmup skipped ticker");
            }
        }
    }
}

impl Inner {
    fn lookup(&self, ticker: &str) -> Result<UniverseEntry, CoreError> {
        self.config
            .universe_entry(ticker)
            .cloned()
            .ok_or_else(|| CoreError::DataUnavailable {
                ticker: ticker.to_string(),
                reason: "not in the configured universe".to_string(),
            })
    }

    async fn features_for(
        &self,
        ticker: &str,
    ) -> Result<Arc<feature_engine::FeatureFrame>, CoreError> {
        let key = CacheKey::new(
            ticker.to_uppercase(),
            SCORING_PERIOD_DAYS,
            feature_engine::FEATURE_SET_VERSION,
        );
        let source = self.source.clone();
        let ticker = ticker.to_string();
        self.cache
            .get_or_compute(key, || async move {
                let ohlcv = source.fetch_history(&ticker, SCORING_PERIOD_DAYS).await?;
                ohlcv.validate(MIN_SCORING_BARS)?;
                feature_engine::compute(&ohlcv)
            })
            .await
    }

    async fn score_one(
        &self,
        ticker: &str,
        model: &ModelArtifact,
        regime: &RegimeSnapshot,
    ) -> Result<ScoreBreakdown, CoreError> {
        let entry = self.lookup(ticker)?;
        let features = self.features_for(ticker).await?;

        let names: Vec<&str> = model
            .metadata
            .feature_names
            .iter()
            .map(String::as_str)
            .collect();
        let vector = features
            .vector_at(features.len() - 1, &names)
            .ok_or_else(|| {
                CoreError::InvalidConfig("model features missing from feature frame".to_string())
            })?;
        let probability = model.model.predict_proba(&vector);

        let context = if self.config.context.enabled {
            self.context.context_for(ticker).await
        } else {
            None
        };

        self.scorer.score(&ScoreInput {
            ticker: &entry.ticker,
            asset_class: entry.asset_class,
            features: &features,
            probability,
            regime,
            context: context.as_ref(),
        })
    }
}

/// Next occurrence of the configured retraining hour, UTC.
fn next_daily_run(now: DateTime<Utc>, hour_utc: u32) -> DateTime<Utc> {
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour_utc % 24, 0, 0)
        .single()
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}
