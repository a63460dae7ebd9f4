//! Logistic-regression training.
//!
//! Features are standardized with constants computed from the training
//! rows, then fitted by full-batch gradient descent with a small L2 term.
//! Zero-initialized weights and a fixed iteration count keep training
//! deterministic for identical input.

use nalgebra::{DMatrix, DVector};

use model_store::artifact::{sigmoid, LogisticModel};

const ITERATIONS: usize = 400;
const LEARNING_RATE: f64 = 0.5;
const L2: f64 = 1e-4;

pub fn train(rows: &[Vec<f64>], labels: &[bool]) -> LogisticModel {
    let n = rows.len();
    let d = rows.first().map(Vec::len).unwrap_or(0);
    if n == 0 || d == 0 {
        return LogisticModel {
            weights: vec![0.0; d],
            intercept: 0.0,
            feature_means: vec![0.0; d],
            feature_stds: vec![1.0; d],
        };
    }

    let (means, stds) = standardization(rows, d);

    let x = DMatrix::from_fn(n, d, |i, j| {
        if stds[j] > 0.0 {
            (rows[i][j] - means[j]) / stds[j]
        } else {
            0.0
        }
    });
    let y = DVector::from_fn(n, |i, _| if labels[i] { 1.0 } else { 0.0 });

    let mut weights = DVector::zeros(d);
    let mut intercept = 0.0;

    for _ in 0..ITERATIONS {
        let mut predictions = &x * &weights;
        predictions.add_scalar_mut(intercept);
        predictions.apply(|z| *z = sigmoid(*z));

        let residual = &predictions - &y;
        let gradient = (x.transpose() * &residual) / n as f64 + L2 * &weights;
        let intercept_gradient = residual.sum() / n as f64;

        weights -= LEARNING_RATE * gradient;
        intercept -= LEARNING_RATE * intercept_gradient;
    }

    LogisticModel {
        weights: weights.iter().copied().collect(),
        intercept,
        feature_means: means,
        feature_stds: stds,
    }
}

fn standardization(rows: &[Vec<f64>], d: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    let mut means = vec![0.0; d];
    for row in rows {
        for (j, &v) in row.iter().enumerate() {
            means[j] += v;
        }
    }
    for mean in &mut means {
        *mean /= n;
    }

    let mut stds = vec![0.0; d];
    for row in rows {
        for (j, &v) in row.iter().enumerate() {
            stds[j] += (v - means[j]).powi(2);
        }
    }
    for std in &mut stds {
        *std = (*std / n).sqrt();
    }
    (means, stds)
}
