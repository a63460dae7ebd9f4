//! Time-series model validation.
//!
//! Forward-chained splits: each fold trains on a prefix of the row order
//! and tests on the chunk that immediately follows it, so validation never
//! trains on data that postdates its test window.

use decision_core::ValidationMetrics;

use crate::trainer;

/// Mean metrics over forward-chained folds.
pub fn forward_chained_metrics(
    rows: &[Vec<f64>],
    labels: &[bool],
    splits: usize,
) -> ValidationMetrics {
    let splits = splits.max(1);
    let chunk = rows.len() / (splits + 1);
    if chunk == 0 {
        return score_predictions(&vec![0.5; labels.len()], labels);
    }

    let mut folds = Vec::with_capacity(splits);
    for k in 1..=splits {
        let train_end = k * chunk;
        let test_end = if k == splits { rows.len() } else { (k + 1) * chunk };

        let model = trainer::train(&rows[..train_end], &labels[..train_end]);
        let probas: Vec<f64> = rows[train_end..test_end]
            .iter()
            .map(|row| model.predict_proba(row))
            .collect();
        folds.push(score_predictions(&probas, &labels[train_end..test_end]));
    }

    let n = folds.len() as f64;
    ValidationMetrics {
        f1: folds.iter().map(|m| m.f1).sum::<f64>() / n,
        accuracy: folds.iter().map(|m| m.accuracy).sum::<f64>() / n,
        precision: folds.iter().map(|m| m.precision).sum::<f64>() / n,
        recall: folds.iter().map(|m| m.recall).sum::<f64>() / n,
        roc_auc: folds.iter().map(|m| m.roc_auc).sum::<f64>() / n,
    }
}

/// Classification metrics at the 0.5 threshold plus rank-based ROC-AUC.
pub fn score_predictions(probas: &[f64], labels: &[bool]) -> ValidationMetrics {
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tn = 0.0;
    let mut fn_ = 0.0;
    for (&proba, &label) in probas.iter().zip(labels) {
        match (proba >= 0.5, label) {
            (true, true) => tp += 1.0,
            (true, false) => fp += 1.0,
            (false, false) => tn += 1.0,
            (false, true) => fn_ += 1.0,
        }
    }

    let total = tp + fp + tn + fn_;
    let accuracy = if total > 0.0 { (tp + tn) / total } else { 0.0 };
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ValidationMetrics {
        f1,
        accuracy,
        precision,
        recall,
        roc_auc: roc_auc(probas, labels),
    }
}

/// Mann-Whitney rank formulation; ties share averaged ranks. Degenerate
/// single-class sets score 0.5.
fn roc_auc(probas: &[f64], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut indexed: Vec<(f64, bool)> = probas.iter().copied().zip(labels.iter().copied()).collect();
    indexed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j < indexed.len() && indexed[j].0 == indexed[i].0 {
            j += 1;
        }
        // Average rank over the tie group, 1-based.
        let rank = (i + 1 + j) as f64 / 2.0;
        for item in &indexed[i..j] {
            if item.1 {
                rank_sum += rank;
            }
        }
        i = j;
    }

    let p = positives as f64;
    let n = negatives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * n)
}
