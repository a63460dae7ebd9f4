use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use decision_core::ValidationMetrics;

/// Logistic-regression predictor over standardized features. Inputs arrive
/// in `feature_names` order; standardization constants were fixed at
/// training time, so evaluation is a pure function of the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
}

impl LogisticModel {
    /// Probability of the positive class for one feature vector.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.weights.len());
        let mut z = self.intercept;
        for (i, &x) in features.iter().enumerate() {
            let std = self.feature_stds.get(i).copied().unwrap_or(1.0);
            let mean = self.feature_means.get(i).copied().unwrap_or(0.0);
            let scaled = if std > 0.0 { (x - mean) / std } else { 0.0 };
            z += self.weights.get(i).copied().unwrap_or(0.0) * scaled;
        }
        sigmoid(z)
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: String,
    /// Feature order the model was trained with; prediction inputs must
    /// follow it.
    pub feature_names: Vec<String>,
    pub training_samples: usize,
    pub metrics: ValidationMetrics,
    pub trained_at: DateTime<Utc>,
}

/// A serialized predictor plus its metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub model: LogisticModel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_model() -> LogisticModel {
        LogisticModel {
            weights: vec![1.0, -1.0],
            intercept: 0.0,
            feature_means: vec![0.0, 0.0],
            feature_stds: vec![1.0, 1.0],
        }
    }

    #[test]
    fn proba_is_half_at_the_boundary() {
        let model = artifact_model();
        assert!((model.predict_proba(&[0.0, 0.0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn proba_moves_with_the_weights() {
        let model = artifact_model();
        assert!(model.predict_proba(&[2.0, 0.0]) > 0.5);
        assert!(model.predict_proba(&[0.0, 2.0]) < 0.5);
    }

    #[test]
    fn zero_std_feature_is_ignored() {
        let model = LogisticModel {
            weights: vec![5.0],
            intercept: 0.3,
            feature_means: vec![1.0],
            feature_stds: vec![0.0],
        };
        assert!((model.predict_proba(&[100.0]) - sigmoid(0.3)).abs() < 1e-12);
    }
}
