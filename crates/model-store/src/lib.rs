//! Durable home of the predictor.
//!
//! The store always exposes a *current* artifact and, after the first
//! promotion, a *backup*; versioned artifacts accumulate under
//! `versions/`. Publication is atomic: artifacts are written to their
//! versioned path first, then the pointer files swap via rename.

pub mod artifact;
pub mod metrics_log;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use decision_core::CoreError;

pub use artifact::{LogisticModel, ModelArtifact, ModelMetadata};
pub use metrics_log::TrainingLogRecord;

#[derive(Debug, Serialize, Deserialize)]
struct Pointer {
    version: String,
}

#[derive(Default)]
struct Slots {
    current: Option<Arc<ModelArtifact>>,
    backup: Option<Arc<ModelArtifact>>,
}

pub struct ModelStore {
    root: PathBuf,
    slots: RwLock<Slots>,
}

impl ModelStore {
    /// Open (or initialize) a store rooted at `root`, loading whatever the
    /// pointer files reference.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("versions"))?;

        let store = Self {
            root,
            slots: RwLock::new(Slots::default()),
        };

        let current = store.load_pointer("current.json")?;
        let backup = store.load_pointer("backup.json")?;
        {
            let mut slots = store.slots.write().expect("model store lock poisoned");
            slots.current = current;
            slots.backup = backup;
        }
        Ok(store)
    }

    pub fn current(&self) -> Result<Arc<ModelArtifact>, CoreError> {
        self.slots
            .read()
            .expect("model store lock poisoned")
            .current
            .clone()
            .ok_or(CoreError::ModelUnavailable)
    }

    pub fn backup(&self) -> Option<Arc<ModelArtifact>> {
        self.slots
            .read()
            .expect("model store lock poisoned")
            .backup
            .clone()
    }

    /// Load an arbitrary version from the archive.
    pub fn load(&self, version: &str) -> Result<Arc<ModelArtifact>, CoreError> {
        let path = self.version_path(version);
        let raw = fs::read_to_string(path)?;
        Ok(Arc::new(serde_json::from_str(&raw)?))
    }

    /// Publish `artifact` as the new current model. The previous current
    /// moves to the backup slot; both pointer updates are
    /// write-new-then-rename.
    pub fn promote(&self, artifact: ModelArtifact) -> Result<(), CoreError> {
        let version_path = self.version_path(&artifact.metadata.version);
        write_json_atomic(&version_path, &artifact)?;

        let mut slots = self.slots.write().expect("model store lock poisoned");
        let previous = slots.current.clone();

        if let Some(previous) = &previous {
            write_json_atomic(
                &self.root.join("backup.json"),
                &Pointer {
                    version: previous.metadata.version.clone(),
                },
            )?;
        }
        write_json_atomic(
            &self.root.join("current.json"),
            &Pointer {
                version: artifact.metadata.version.clone(),
            },
        )?;

        tracing::info!(
            version = %artifact.metadata.version,
            f1 = artifact.metadata.metrics.f1,
            "model promoted"
        );
        slots.backup = previous;
        slots.current = Some(Arc::new(artifact));
        Ok(())
    }

    /// Swap current and backup. Returns false (and changes nothing) when
    /// there is no backup to roll back to.
    pub fn rollback(&self) -> Result<bool, CoreError> {
        let mut slots = self.slots.write().expect("model store lock poisoned");
        let (current, backup) = match (slots.current.clone(), slots.backup.clone()) {
            (Some(c), Some(b)) => (c, b),
            _ => return Ok(false),
        };

        write_json_atomic(
            &self.root.join("current.json"),
            &Pointer {
                version: backup.metadata.version.clone(),
            },
        )?;
        write_json_atomic(
            &self.root.join("backup.json"),
            &Pointer {
                version: current.metadata.version.clone(),
            },
        )?;

        tracing::warn!(
            from = %current.metadata.version,
            to = %backup.metadata.version,
            "model rolled back"
        );
        slots.current = Some(backup);
        slots.backup = Some(current);
        Ok(true)
    }

    /// Append one retraining outcome to the metrics log.
    pub fn log_training(&self, record: &TrainingLogRecord) -> Result<(), CoreError> {
        metrics_log::append(&self.root.join("metrics.jsonl"), record)
    }

    pub fn training_log(&self) -> Result<Vec<TrainingLogRecord>, CoreError> {
        metrics_log::read_all(&self.root.join("metrics.jsonl"))
    }

    fn version_path(&self, version: &str) -> PathBuf {
        self.root.join("versions").join(format!("{version}.json"))
    }

    fn load_pointer(&self, name: &str) -> Result<Option<Arc<ModelArtifact>>, CoreError> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let pointer: Pointer = serde_json::from_str(&raw)?;
        match self.load(&pointer.version) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                tracing::warn!(pointer = name, version = %pointer.version, error = %e,
                    "dangling model pointer ignored");
                Ok(None)
            }
        }
    }
}

/// Write JSON to a sibling temp file, then rename over the target. Rename
/// within one directory is atomic on POSIX filesystems.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use decision_core::ValidationMetrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn temp_root() -> PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "model-store-test-{}-{}",
            std::process::id(),
            seq
        ))
    }

    fn artifact(version: &str, f1: f64) -> ModelArtifact {
        ModelArtifact {
            metadata: ModelMetadata {
                version: version.to_string(),
                feature_names: vec!["rsi_14".to_string()],
                training_samples: 1_000,
                metrics: ValidationMetrics {
                    f1,
                    accuracy: 0.8,
                    precision: 0.7,
                    recall: 0.72,
                    roc_auc: 0.81,
                },
                trained_at: Utc::now(),
            },
            model: LogisticModel {
                weights: vec![0.4],
                intercept: -0.1,
                feature_means: vec![50.0],
                feature_stds: vec![10.0],
            },
        }
    }

    #[test]
    fn empty_store_has_no_current() {
        let store = ModelStore::open(temp_root()).unwrap();
        assert_eq!(store.current().unwrap_err().kind(), "model_unavailable");
        assert!(store.backup().is_none());
        assert!(!store.rollback().unwrap());
    }

    #[test]
    fn promote_then_rollback_restores_previous_current() {
        let store = ModelStore::open(temp_root()).unwrap();

        store.promote(artifact("v1", 0.70)).unwrap();
        store.promote(artifact("v2", 0.75)).unwrap();
        assert_eq!(store.current().unwrap().metadata.version, "v2");
        assert_eq!(store.backup().unwrap().metadata.version, "v1");

        assert!(store.rollback().unwrap());
        assert_eq!(store.current().unwrap().metadata.version, "v1");
        assert_eq!(store.backup().unwrap().metadata.version, "v2");
    }

    #[test]
    fn versions_accumulate_and_stay_loadable() {
        let store = ModelStore::open(temp_root()).unwrap();
        store.promote(artifact("v1", 0.70)).unwrap();
        store.promote(artifact("v2", 0.75)).unwrap();
        store.promote(artifact("v3", 0.78)).unwrap();

        assert_eq!(store.load("v1").unwrap().metadata.version, "v1");
        assert_eq!(store.load("v2").unwrap().metadata.version, "v2");
    }

    #[test]
    fn reopening_restores_pointers_from_disk() {
        let root = temp_root();
        {
            let store = ModelStore::open(&root).unwrap();
            store.promote(artifact("v1", 0.70)).unwrap();
            store.promote(artifact("v2", 0.75)).unwrap();
        }
        let reopened = ModelStore::open(&root).unwrap();
        assert_eq!(reopened.current().unwrap().metadata.version, "v2");
        assert_eq!(reopened.backup().unwrap().metadata.version, "v1");
    }
}
