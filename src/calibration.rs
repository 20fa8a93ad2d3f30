//! Isotonic probability calibration.
//!
//! Fits a monotone non-decreasing map from raw classifier probability to
//! observed frequency with the pool-adjacent-violators algorithm, then
//! interpolates linearly between fitted knots. Inputs outside the fitted
//! range are clipped to the nearest knot.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl IsotonicCalibrator {
    /// Calibrator that returns its input unchanged (clamped to [0, 1]).
    pub fn identity() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
        }
    }

    /// Fit on raw scores and 0/1 outcomes. Non-finite pairs are skipped; an
    /// empty fit yields the identity calibrator.
    pub fn fit(scores: &[f64], outcomes: &[f64]) -> Self {
        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .zip(outcomes)
            .filter(|(s, o)| s.is_finite() && o.is_finite())
            .map(|(&s, &o)| (s, o))
            .collect();
        if pairs.is_empty() {
            return Self::identity();
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Blocks of (knots, sum of outcomes, weight); tied scores start as
        // one block.
        let mut blocks: Vec<(Vec<f64>, f64, f64)> = Vec::with_capacity(pairs.len());
        for (s, o) in pairs {
            match blocks.last_mut() {
                Some(last) if last.0.last() == Some(&s) => {
                    last.1 += o;
                    last.2 += 1.0;
                }
                _ => {
                    pool_violators(&mut blocks);
                    blocks.push((vec![s], o, 1.0));
                }
            }
        }
        pool_violators(&mut blocks);

        let mut x = Vec::new();
        let mut y = Vec::new();
        for (knots, sum, weight) in blocks {
            let value = (sum / weight).clamp(0.0, 1.0);
            for knot in knots {
                x.push(knot);
                y.push(value);
            }
        }
        Self { x, y }
    }

    pub fn is_identity(&self) -> bool {
        self.x.is_empty()
    }

    pub fn transform(&self, score: f64) -> f64 {
        if score.is_nan() {
            return score;
        }
        let (first, last) = match (self.x.first(), self.x.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => return score.clamp(0.0, 1.0),
        };
        let n = self.x.len();
        if score <= first {
            return self.y[0];
        }
        if score >= last {
            return self.y[n - 1];
        }
        // First knot strictly greater than score; 1 <= hi < n here.
        let hi = self.x.partition_point(|&k| k <= score);
        let lo = hi - 1;
        let (x0, x1) = (self.x[lo], self.x[hi]);
        let (y0, y1) = (self.y[lo], self.y[hi]);
        if x1 > x0 {
            (y0 + (y1 - y0) * (score - x0) / (x1 - x0)).clamp(0.0, 1.0)
        } else {
            y1
        }
    }

    pub fn transform_all(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|&s| self.transform(s)).collect()
    }
}

/// Merge trailing blocks while the last mean is below the one before it.
/// Merged blocks keep every input knot so interpolation stays flat
/// across the pooled range.
fn pool_violators(blocks: &mut Vec<(Vec<f64>, f64, f64)>) {
    while blocks.len() > 1 {
        let n = blocks.len();
        let (prev, last) = (&blocks[n - 2], &blocks[n - 1]);
        if prev.1 / prev.2 <= last.1 / last.2 {
            break;
        }
        if let Some((knots, sum, weight)) = blocks.pop() {
            if let Some(prev) = blocks.last_mut() {
                prev.0.extend(knots);
                prev.1 += sum;
                prev.2 += weight;
            }
        }
    }
}
