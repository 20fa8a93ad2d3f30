//! Per-variable weather correction.
//!
//! One point regressor per target variable, each paired with 10th and 90th
//! percentile regressors for an interval. Targets with too few labelled rows
//! are skipped and reported; `predict` only returns trained targets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::boosting::{BoostParams, GradientBoostedModel, Objective};
use crate::bundle::BundleModel;
use crate::errors::AppError;
use crate::frame::{FeatureMatrix, TimeFrame};
use crate::metrics;
use crate::models::{labelled, MIN_TARGET_ROWS};

/// Interval quantiles fitted for every trained target.
pub const LOWER_QUANTILE: f64 = 0.1;
pub const UPPER_QUANTILE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherTarget {
    Temperature,
    Humidity,
    WindSpeed,
    WindDirection,
}

impl WeatherTarget {
    pub const ALL: [WeatherTarget; 4] = [
        WeatherTarget::Temperature,
        WeatherTarget::Humidity,
        WeatherTarget::WindSpeed,
        WeatherTarget::WindDirection,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WeatherTarget::Temperature => "temperature",
            WeatherTarget::Humidity => "humidity",
            WeatherTarget::WindSpeed => "wind_speed",
            WeatherTarget::WindDirection => "wind_direction",
        }
    }

    /// Observation column holding the label.
    pub fn observation_column(&self) -> &'static str {
        match self {
            WeatherTarget::Temperature => "obs_temp",
            WeatherTarget::Humidity => "obs_humidity",
            WeatherTarget::WindSpeed => "obs_wind_speed",
            WeatherTarget::WindDirection => "obs_wind_dir",
        }
    }

    /// Raw NWP column for the same quantity, the uncorrected baseline.
    pub fn forecast_column(&self) -> &'static str {
        match self {
            WeatherTarget::Temperature => "fcst_temp",
            WeatherTarget::Humidity => "fcst_humidity",
            WeatherTarget::WindSpeed => "fcst_wind_speed",
            WeatherTarget::WindDirection => "fcst_wind_dir",
        }
    }

    /// Clip a model output to the physically valid range.
    pub fn clip(&self, v: f64) -> f64 {
        match self {
            WeatherTarget::Temperature => v,
            WeatherTarget::Humidity => v.clamp(0.0, 100.0),
            WeatherTarget::WindSpeed => v.max(0.0),
            WeatherTarget::WindDirection => v.rem_euclid(360.0),
        }
    }
}

impl std::fmt::Display for WeatherTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherParams {
    pub point: BoostParams,
    pub quantile: BoostParams,
    pub min_rows: usize,
}

impl Default for WeatherParams {
    fn default() -> Self {
        Self {
            point: BoostParams::default(),
            quantile: BoostParams::quantile(),
            min_rows: MIN_TARGET_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TargetModels {
    point: GradientBoostedModel,
    lower: GradientBoostedModel,
    upper: GradientBoostedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Fitted {
        train_rows: usize,
        val_rows: usize,
        val_mae: Option<f64>,
    },
    Skipped {
        available: usize,
        required: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: WeatherTarget,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

/// Point estimate and interval for one target, one value per row.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPrediction {
    pub point: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherPrediction {
    pub targets: BTreeMap<WeatherTarget, TargetPrediction>,
}

impl WeatherPrediction {
    pub fn get(&self, target: WeatherTarget) -> Option<&TargetPrediction> {
        self.targets.get(&target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCorrector {
    models: BTreeMap<WeatherTarget, TargetModels>,
}

impl WeatherCorrector {
    /// Fit every target whose observation column has enough labelled rows.
    ///
    /// Labels are read from `y_train`/`y_val` by observation column name; the
    /// frames must be row-aligned with the matching feature matrices.
    pub fn fit(
        params: &WeatherParams,
        x_train: &FeatureMatrix,
        y_train: &TimeFrame,
        x_val: &FeatureMatrix,
        y_val: &TimeFrame,
    ) -> Result<(Self, Vec<TargetReport>), AppError> {
        let mut models = BTreeMap::new();
        let mut reports = Vec::with_capacity(WeatherTarget::ALL.len());

        for target in WeatherTarget::ALL {
            let col = target.observation_column();
            let (xt, yt) = match y_train.column(col) {
                Some(labels) => labelled(x_train, labels),
                None => (x_train.select_rows(&[]), Vec::new()),
            };
            if yt.len() < params.min_rows {
                tracing::warn!(
                    "Skipping {}: only {} labelled rows, need {}",
                    target,
                    yt.len(),
                    params.min_rows
                );
                reports.push(TargetReport {
                    target,
                    outcome: TargetOutcome::Skipped {
                        available: yt.len(),
                        required: params.min_rows,
                    },
                });
                continue;
            }

            let (xv, yv) = match y_val.column(col) {
                Some(labels) => labelled(x_val, labels),
                None => (x_val.select_rows(&[]), Vec::new()),
            };
            if yv.is_empty() {
                tracing::warn!("{}: empty validation fold, fitting without early stopping", target);
            }
            let valid = (!yv.is_empty()).then_some((&xv, yv.as_slice()));

            let point = GradientBoostedModel::fit(Objective::SquaredError, &params.point, &xt, &yt, valid)?;
            let lower = GradientBoostedModel::fit(
                Objective::Quantile {
                    alpha: LOWER_QUANTILE,
                },
                &params.quantile,
                &xt,
                &yt,
                None,
            )?;
            let upper = GradientBoostedModel::fit(
                Objective::Quantile {
                    alpha: UPPER_QUANTILE,
                },
                &params.quantile,
                &xt,
                &yt,
                None,
            )?;

            let val_mae = if yv.is_empty() {
                None
            } else {
                let preds: Vec<f64> = point.predict(&xv).into_iter().map(|v| target.clip(v)).collect();
                metrics::mae(&preds, &yv)
            };
            match val_mae {
                Some(mae) => tracing::info!(
                    "{}: {} trees, val MAE = {:.3} ({} train / {} val rows)",
                    target,
                    point.n_trees(),
                    mae,
                    yt.len(),
                    yv.len()
                ),
                None => tracing::info!("{}: {} trees, {} train rows", target, point.n_trees(), yt.len()),
            }

            reports.push(TargetReport {
                target,
                outcome: TargetOutcome::Fitted {
                    train_rows: yt.len(),
                    val_rows: yv.len(),
                    val_mae,
                },
            });
            models.insert(target, TargetModels { point, lower, upper });
        }

        Ok((Self { models }, reports))
    }

    /// Targets with fitted models. Callers must check this before reading a
    /// target from [`WeatherPrediction`].
    pub fn trained_targets(&self) -> Vec<WeatherTarget> {
        self.models.keys().copied().collect()
    }

    pub fn is_trained(&self, target: WeatherTarget) -> bool {
        self.models.contains_key(&target)
    }

    /// Predict every trained target, clipped to physical ranges. Interval
    /// bounds are ordered so `lower <= upper`, except for wind direction
    /// where each bound is wrapped independently.
    pub fn predict(&self, x: &FeatureMatrix) -> WeatherPrediction {
        let targets = self
            .models
            .iter()
            .map(|(&target, m)| {
                let point: Vec<f64> = m.point.predict(x).into_iter().map(|v| target.clip(v)).collect();
                let lo = m.lower.predict(x);
                let hi = m.upper.predict(x);
                let (lower, upper): (Vec<f64>, Vec<f64>) = lo
                    .into_iter()
                    .zip(hi)
                    .map(|(l, h)| {
                        let (l, h) = (target.clip(l), target.clip(h));
                        if target == WeatherTarget::WindDirection {
                            (l, h)
                        } else {
                            (l.min(h), l.max(h))
                        }
                    })
                    .unzip();
                (target, TargetPrediction { point, lower, upper })
            })
            .collect();
        WeatherPrediction { targets }
    }
}

impl BundleModel for WeatherCorrector {
    const FILE_NAME: &'static str = "weather_model.json";

    fn check_feature_count(&self, n_features: usize) -> Result<(), String> {
        for (target, m) in &self.models {
            for (role, model) in [("point", &m.point), ("q10", &m.lower), ("q90", &m.upper)] {
                if model.n_features() != n_features {
                    return Err(format!(
                        "{} {} model expects {} features, bundle lists {}",
                        target,
                        role,
                        model.n_features(),
                        n_features
                    ));
                }
                model
                    .check_consistent()
                    .map_err(|e| format!("{} {} model: {}", target, role, e))?;
            }
        }
        Ok(())
    }
}
