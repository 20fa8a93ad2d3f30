//! Gradient-boosted decision trees.
//!
//! A deterministic histogram booster: no row or column subsampling, so the
//! same input always yields the same ensemble. Four objectives cover what the
//! correctors need:
//!
//! - `SquaredError` for point regression,
//! - `Quantile` for prediction bands (leaves re-fitted to the residual quantile),
//! - `Binary` log-loss with a positive-class weight for rain occurrence,
//! - `Tweedie` with a log link for rain amount.
//!
//! Missing feature values are routed per split in whichever direction
//! reduced training loss.

mod tree;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::frame::FeatureMatrix;
pub use tree::{Node, Tree};
use tree::{BinnedMatrix, GrowParams};

/// Probability clamp for log-loss and logit evaluation.
const PROB_EPS: f64 = 1e-15;
/// Minimum improvement for early stopping to count a round as better.
const MIN_IMPROVEMENT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Objective {
    SquaredError,
    Quantile { alpha: f64 },
    Binary { positive_weight: f64 },
    Tweedie { variance_power: f64 },
}

impl Objective {
    fn name(&self) -> &'static str {
        match self {
            Objective::SquaredError => "l1",
            Objective::Quantile { .. } => "pinball",
            Objective::Binary { .. } => "logloss",
            Objective::Tweedie { .. } => "tweedie",
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        match *self {
            Objective::Quantile { alpha } if !(alpha > 0.0 && alpha < 1.0) => Err(
                AppError::InvalidInput(format!("quantile alpha {} must be in (0, 1)", alpha)),
            ),
            Objective::Binary { positive_weight } if !(positive_weight > 0.0) => {
                Err(AppError::InvalidInput(format!(
                    "positive class weight {} must be > 0",
                    positive_weight
                )))
            }
            Objective::Tweedie { variance_power } if !(variance_power > 1.0 && variance_power < 2.0) => {
                Err(AppError::InvalidInput(format!(
                    "tweedie variance power {} must be in (1, 2)",
                    variance_power
                )))
            }
            _ => Ok(()),
        }
    }

    fn sample_weight(&self, y: f64) -> f64 {
        match *self {
            Objective::Binary { positive_weight } if y > 0.5 => positive_weight,
            _ => 1.0,
        }
    }

    /// Gradient and hessian of the loss with respect to the raw score.
    fn grad_hess(&self, y: f64, raw: f64) -> (f64, f64) {
        match *self {
            Objective::SquaredError => (raw - y, 1.0),
            Objective::Quantile { alpha } => {
                if y < raw {
                    (1.0 - alpha, 1.0)
                } else {
                    (-alpha, 1.0)
                }
            }
            Objective::Binary { .. } => {
                let p = sigmoid(raw);
                (p - y, (p * (1.0 - p)).max(1e-16))
            }
            Objective::Tweedie { variance_power: rho } => {
                let a = (y * ((1.0 - rho) * raw).exp()).max(0.0);
                let b = ((2.0 - rho) * raw).exp();
                (-a + b, -(1.0 - rho) * a + (2.0 - rho) * b)
            }
        }
    }

    /// Validation metric for one row, lower is better.
    fn eval(&self, y: f64, raw: f64) -> f64 {
        match *self {
            Objective::SquaredError => (y - raw).abs(),
            Objective::Quantile { alpha } => pinball(y, raw, alpha),
            Objective::Binary { .. } => {
                let p = sigmoid(raw).clamp(PROB_EPS, 1.0 - PROB_EPS);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            }
            Objective::Tweedie { variance_power: rho } => {
                -y * ((1.0 - rho) * raw).exp() / (1.0 - rho) + ((2.0 - rho) * raw).exp() / (2.0 - rho)
            }
        }
    }

    fn base_score(&self, y: &[f64], weights: &[f64]) -> f64 {
        match *self {
            Objective::SquaredError => y.iter().sum::<f64>() / y.len() as f64,
            Objective::Quantile { alpha } => quantile(&mut y.to_vec(), alpha),
            Objective::Binary { .. } => {
                let wsum: f64 = weights.iter().sum();
                let p = y.iter().zip(weights).map(|(t, w)| t * w).sum::<f64>() / wsum;
                let p = p.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            Objective::Tweedie { .. } => {
                let mean = y.iter().sum::<f64>() / y.len() as f64;
                mean.max(1e-6).ln()
            }
        }
    }

    fn link(&self, raw: f64) -> f64 {
        match self {
            Objective::SquaredError | Objective::Quantile { .. } => raw,
            Objective::Binary { .. } => sigmoid(raw),
            Objective::Tweedie { .. } => raw.exp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_samples: usize,
    pub reg_lambda: f64,
    pub max_bins: usize,
    /// Stop after this many rounds without validation improvement. Zero
    /// disables early stopping.
    pub early_stopping_rounds: usize,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 1000,
            learning_rate: 0.05,
            max_depth: 6,
            min_child_samples: 20,
            reg_lambda: 1.0,
            max_bins: 64,
            early_stopping_rounds: 50,
        }
    }
}

impl BoostParams {
    /// Smaller ensembles used for the band quantile models.
    pub fn quantile() -> Self {
        Self {
            n_estimators: 500,
            max_depth: 5,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedModel {
    objective: Objective,
    base_score: f64,
    n_features: usize,
    trees: Vec<Tree>,
    best_score: Option<f64>,
}

impl GradientBoostedModel {
    /// Fit an ensemble. When `valid` is given and early stopping is enabled,
    /// the ensemble is truncated to the round with the best validation metric.
    pub fn fit(
        objective: Objective,
        params: &BoostParams,
        x: &FeatureMatrix,
        y: &[f64],
        valid: Option<(&FeatureMatrix, &[f64])>,
    ) -> Result<Self, AppError> {
        objective.validate()?;
        if x.n_rows() == 0 || x.n_rows() != y.len() {
            return Err(AppError::InvalidInput(format!(
                "cannot fit on {} rows with {} labels",
                x.n_rows(),
                y.len()
            )));
        }
        if let Some(bad) = y.iter().find(|v| !v.is_finite()) {
            return Err(AppError::InvalidInput(format!("non-finite label {}", bad)));
        }
        if let Objective::Tweedie { .. } = objective {
            if y.iter().any(|&v| v < 0.0) {
                return Err(AppError::InvalidInput(
                    "tweedie labels must be non-negative".to_string(),
                ));
            }
        }
        let valid = valid.filter(|(vx, vy)| vx.n_rows() > 0 && vx.n_rows() == vy.len());
        if let Some((vx, _)) = valid {
            if vx.n_features() != x.n_features() {
                return Err(AppError::InvalidInput(format!(
                    "validation has {} features, training has {}",
                    vx.n_features(),
                    x.n_features()
                )));
            }
        }

        let weights: Vec<f64> = y.iter().map(|&t| objective.sample_weight(t)).collect();
        let base_score = objective.base_score(y, &weights);
        let binned = BinnedMatrix::new(x, params.max_bins);
        let grow_params = GrowParams {
            max_depth: params.max_depth,
            min_child_samples: params.min_child_samples,
            reg_lambda: params.reg_lambda,
            learning_rate: params.learning_rate,
        };

        let mut raw = vec![base_score; y.len()];
        let mut valid_raw = valid.map(|(vx, _)| vec![base_score; vx.n_rows()]);
        let mut trees: Vec<Tree> = Vec::new();
        let mut best: Option<(usize, f64)> = None;
        let mut grad = vec![0.0; y.len()];
        let mut hess = vec![0.0; y.len()];

        for round in 0..params.n_estimators {
            for i in 0..y.len() {
                let (g, h) = objective.grad_hess(y[i], raw[i]);
                grad[i] = g * weights[i];
                hess[i] = h * weights[i];
            }

            let mut grown = tree::grow(&binned, &grad, &hess, &grow_params);
            if let Objective::Quantile { alpha } = objective {
                for (node, rows) in &grown.leaves {
                    let mut residuals: Vec<f64> = rows.iter().map(|&r| y[r] - raw[r]).collect();
                    let value = quantile(&mut residuals, alpha) * params.learning_rate;
                    grown.tree.set_leaf_value(*node, value);
                }
            }
            for (node, rows) in &grown.leaves {
                let value = grown.tree.leaf_value(*node);
                for &r in rows {
                    raw[r] += value;
                }
            }

            if let (Some((vx, vy)), Some(vraw)) = (valid, valid_raw.as_mut()) {
                for (r, score) in vraw.iter_mut().enumerate() {
                    *score += grown.tree.predict_row(|f| vx.value(r, f));
                }
                let metric = mean_metric(&objective, vy, vraw);
                trees.push(grown.tree);

                match best {
                    Some((_, best_metric)) if metric >= best_metric - MIN_IMPROVEMENT => {}
                    _ => best = Some((trees.len(), metric)),
                }
                if params.early_stopping_rounds > 0 {
                    if let Some((best_len, best_metric)) = best {
                        if trees.len() - best_len >= params.early_stopping_rounds {
                            tracing::debug!(
                                "Early stopping at round {}, best iteration {} ({} {:.5})",
                                round + 1,
                                best_len,
                                objective.name(),
                                best_metric
                            );
                            break;
                        }
                    }
                }
            } else {
                trees.push(grown.tree);
            }
        }

        let best_score = match best {
            Some((best_len, metric)) if params.early_stopping_rounds > 0 => {
                trees.truncate(best_len);
                Some(metric)
            }
            Some((_, _)) => valid
                .zip(valid_raw.as_ref())
                .map(|((_, vy), vraw)| mean_metric(&objective, vy, vraw)),
            None => None,
        };

        Ok(Self {
            objective,
            base_score,
            n_features: x.n_features(),
            trees,
            best_score,
        })
    }

    /// Raw scores before the inverse link.
    pub fn predict_raw(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows())
            .map(|r| {
                self.base_score
                    + self
                        .trees
                        .iter()
                        .map(|t| t.predict_row(|f| x.value(r, f)))
                        .sum::<f64>()
            })
            .collect()
    }

    /// Predictions on the response scale: identity for regression and
    /// quantiles, probability for binary, mean for Tweedie.
    pub fn predict(&self, x: &FeatureMatrix) -> Vec<f64> {
        self.predict_raw(x)
            .into_iter()
            .map(|raw| self.objective.link(raw))
            .collect()
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Validation metric at the kept iteration, if a validation set was used.
    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Check that every split references a feature inside the declared width.
    pub fn check_consistent(&self) -> Result<(), String> {
        match self.trees.iter().filter_map(Tree::max_feature).max() {
            Some(f) if f >= self.n_features => Err(format!(
                "tree references feature {} but model has {} features",
                f, self.n_features
            )),
            _ => Ok(()),
        }
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub(crate) fn pinball(y: f64, q: f64, alpha: f64) -> f64 {
    let diff = y - q;
    if diff >= 0.0 {
        alpha * diff
    } else {
        (alpha - 1.0) * diff
    }
}

fn mean_metric(objective: &Objective, y: &[f64], raw: &[f64]) -> f64 {
    y.iter()
        .zip(raw)
        .map(|(&t, &s)| objective.eval(t, s))
        .sum::<f64>()
        / y.len().max(1) as f64
}

/// Linear-interpolated quantile. Sorts `values` in place; 0 for empty input.
pub(crate) fn quantile(values: &mut [f64], alpha: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let pos = alpha.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}
