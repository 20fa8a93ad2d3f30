//! Skill scores used in training reports.
//!
//! All functions ignore pairs where either side is missing and return `None`
//! when nothing is left to score.

use crate::helpers::finite_mean;

/// Mean absolute error over the pairs where both sides are finite.
pub fn mae(predicted: &[f64], observed: &[f64]) -> Option<f64> {
    finite_mean(predicted.iter().zip(observed).map(|(p, o)| (p - o).abs()))
}

/// Brier score: mean squared difference between the predicted probability
/// and the 0/1 outcome. 0 is perfect; always predicting 0.5 scores 0.25.
pub fn brier_score(probabilities: &[f64], outcomes: &[f64]) -> Option<f64> {
    let (sum, n) = probabilities
        .iter()
        .zip(outcomes)
        .filter(|(p, o)| p.is_finite() && o.is_finite())
        .fold((0.0, 0usize), |(s, n), (p, o)| {
            (s + (p.clamp(0.0, 1.0) - o).powi(2), n + 1)
        });
    (n > 0).then(|| sum / n as f64)
}

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// given their average rank. `None` when only one class is present.
pub fn roc_auc(scores: &[f64], outcomes: &[f64]) -> Option<f64> {
    let mut pairs: Vec<(f64, bool)> = scores
        .iter()
        .zip(outcomes)
        .filter(|(s, o)| s.is_finite() && o.is_finite())
        .map(|(&s, &o)| (s, o > 0.5))
        .collect();
    let n_pos = pairs.iter().filter(|(_, y)| *y).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        // Ranks are 1-based; the tie group i..=j shares their average.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += avg_rank * pairs[i..=j].iter().filter(|(_, y)| *y).count() as f64;
        i = j + 1;
    }
    let n_pos = n_pos as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}
