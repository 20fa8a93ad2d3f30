//! Two-stage precipitation correction.
//!
//! "Will it rain" and "how much" have very different shapes: rain is rare
//! and its amount is zero-inflated and right-skewed. The corrector is a
//! composition of explicit stages:
//!
//! 1. classify: weighted binary classifier on `obs_precip >= threshold`,
//! 2. calibrate: isotonic map from raw to calibrated probability, fitted on
//!    the validation fold,
//! 3. amount: Tweedie regressor for the amount given rain, plus a quantile
//!    ensemble for bands, both fitted on rain-positive rows only.
//!
//! The amount stage is optional; without it the conditional amount and the
//! expected amount are zero and no bands are produced.

use serde::{Deserialize, Serialize};

use crate::boosting::{BoostParams, GradientBoostedModel, Objective};
use crate::bundle::BundleModel;
use crate::calibration::IsotonicCalibrator;
use crate::errors::AppError;
use crate::frame::{FeatureMatrix, TimeFrame};
use crate::metrics;
use crate::models::{labelled, MIN_TARGET_ROWS};

/// Observation column holding the precipitation label.
pub const PRECIP_COLUMN: &str = "obs_precip";
/// Default rain / no-rain threshold in millimetres.
pub const DEFAULT_THRESHOLD_MM: f64 = 0.1;
/// Validation rain rows needed before the amount regressor uses early stopping.
const MIN_VAL_RAIN_ROWS: usize = 10;
const TWEEDIE_VARIANCE_POWER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RainQuantile {
    P10,
    P25,
    P50,
    P75,
    P90,
}

impl RainQuantile {
    pub const ALL: [RainQuantile; 5] = [
        RainQuantile::P10,
        RainQuantile::P25,
        RainQuantile::P50,
        RainQuantile::P75,
        RainQuantile::P90,
    ];

    pub fn alpha(&self) -> f64 {
        match self {
            RainQuantile::P10 => 0.1,
            RainQuantile::P25 => 0.25,
            RainQuantile::P50 => 0.5,
            RainQuantile::P75 => 0.75,
            RainQuantile::P90 => 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipParams {
    pub threshold_mm: f64,
    pub classifier: BoostParams,
    pub amount: BoostParams,
    pub quantile: BoostParams,
    pub min_rows: usize,
}

impl Default for PrecipParams {
    fn default() -> Self {
        Self {
            threshold_mm: DEFAULT_THRESHOLD_MM,
            classifier: BoostParams::default(),
            amount: BoostParams::default(),
            quantile: BoostParams::quantile(),
            min_rows: MIN_TARGET_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyStage {
    model: GradientBoostedModel,
    /// Weight applied to rain rows: negatives / positives in the train slice.
    positive_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileStage {
    level: RainQuantile,
    model: GradientBoostedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountStage {
    regressor: GradientBoostedModel,
    quantiles: Vec<QuantileStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationCorrector {
    threshold_mm: f64,
    classify: ClassifyStage,
    calibrate: IsotonicCalibrator,
    amount: Option<AmountStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipReport {
    pub threshold_mm: f64,
    pub train_rows: usize,
    pub val_rows: usize,
    pub rain_rows_train: usize,
    pub positive_weight: f64,
    pub brier: Option<f64>,
    pub auc: Option<f64>,
    pub amount_stage_fitted: bool,
}

/// Probability-scaled band for one quantile level.
#[derive(Debug, Clone, PartialEq)]
pub struct RainBand {
    pub level: RainQuantile,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrecipPrediction {
    /// Calibrated probability of rain.
    pub probability: Vec<f64>,
    /// Amount given rain, floored at zero.
    pub amount_if_rain: Vec<f64>,
    /// `probability * amount_if_rain`.
    pub expected: Vec<f64>,
    /// Empty when the amount stage was not fitted.
    pub bands: Vec<RainBand>,
}

impl PrecipPrediction {
    pub fn band(&self, level: RainQuantile) -> Option<&[f64]> {
        self.bands
            .iter()
            .find(|b| b.level == level)
            .map(|b| b.values.as_slice())
    }
}

impl PrecipitationCorrector {
    pub fn fit(
        params: &PrecipParams,
        x_train: &FeatureMatrix,
        y_train: &TimeFrame,
        x_val: &FeatureMatrix,
        y_val: &TimeFrame,
    ) -> Result<(Self, PrecipReport), AppError> {
        let threshold = params.threshold_mm;
        let (xt, amounts_t) = match y_train.column(PRECIP_COLUMN) {
            Some(labels) => labelled(x_train, labels),
            None => (x_train.select_rows(&[]), Vec::new()),
        };
        if amounts_t.len() < params.min_rows {
            return Err(AppError::insufficient(
                "precipitation classifier",
                amounts_t.len(),
                params.min_rows,
            ));
        }
        let (xv, amounts_v) = match y_val.column(PRECIP_COLUMN) {
            Some(labels) => labelled(x_val, labels),
            None => (x_val.select_rows(&[]), Vec::new()),
        };

        // Stage 1: will it rain?
        let rain_t = binary_labels(&amounts_t, threshold);
        let rain_v = binary_labels(&amounts_v, threshold);
        let positives = rain_t.iter().filter(|&&v| v > 0.5).count();
        let negatives = rain_t.len() - positives;
        let positive_weight = if positives == 0 {
            1.0
        } else {
            negatives.max(1) as f64 / positives as f64
        };
        tracing::info!(
            "Precip classifier: {} rain / {} dry train rows (positive weight {:.2})",
            positives,
            negatives,
            positive_weight
        );

        let valid = (!rain_v.is_empty()).then_some((&xv, rain_v.as_slice()));
        let classifier = GradientBoostedModel::fit(
            Objective::Binary { positive_weight },
            &params.classifier,
            &xt,
            &rain_t,
            valid,
        )?;

        // Stage 2: calibrate on the validation fold.
        let raw_val = classifier.predict(&xv);
        let calibrate = if rain_v.is_empty() {
            tracing::warn!("Precip calibration: empty validation fold, using raw probabilities");
            IsotonicCalibrator::identity()
        } else {
            IsotonicCalibrator::fit(&raw_val, &rain_v)
        };

        // Stage 3: how much, given rain?
        let amount = Self::fit_amount(params, &xt, &amounts_t, &xv, &amounts_v)?;

        let calibrated_val = calibrate.transform_all(&raw_val);
        let brier = metrics::brier_score(&calibrated_val, &rain_v);
        let auc = metrics::roc_auc(&calibrated_val, &rain_v);
        tracing::info!(
            "Precip classification: Brier={}, AUC={}",
            brier.map_or("n/a".to_string(), |v| format!("{:.4}", v)),
            auc.map_or("n/a".to_string(), |v| format!("{:.4}", v))
        );

        let report = PrecipReport {
            threshold_mm: threshold,
            train_rows: amounts_t.len(),
            val_rows: amounts_v.len(),
            rain_rows_train: positives,
            positive_weight,
            brier,
            auc,
            amount_stage_fitted: amount.is_some(),
        };
        let model = Self {
            threshold_mm: threshold,
            classify: ClassifyStage {
                model: classifier,
                positive_weight,
            },
            calibrate,
            amount,
        };
        Ok((model, report))
    }

    fn fit_amount(
        params: &PrecipParams,
        xt: &FeatureMatrix,
        amounts_t: &[f64],
        xv: &FeatureMatrix,
        amounts_v: &[f64],
    ) -> Result<Option<AmountStage>, AppError> {
        let rain_rows_t = rain_rows(amounts_t, params.threshold_mm);
        if rain_rows_t.len() < params.min_rows {
            tracing::warn!(
                "Skipping precip amount stage: only {} rain rows, need {}",
                rain_rows_t.len(),
                params.min_rows
            );
            return Ok(None);
        }
        let x_rain = xt.select_rows(&rain_rows_t);
        let y_rain: Vec<f64> = rain_rows_t.iter().map(|&r| amounts_t[r]).collect();

        let rain_rows_v = rain_rows(amounts_v, params.threshold_mm);
        let xv_rain = xv.select_rows(&rain_rows_v);
        let yv_rain: Vec<f64> = rain_rows_v.iter().map(|&r| amounts_v[r]).collect();
        let valid = (rain_rows_v.len() > MIN_VAL_RAIN_ROWS).then_some((&xv_rain, yv_rain.as_slice()));

        let regressor = GradientBoostedModel::fit(
            Objective::Tweedie {
                variance_power: TWEEDIE_VARIANCE_POWER,
            },
            &params.amount,
            &x_rain,
            &y_rain,
            valid,
        )?;

        let quantiles = RainQuantile::ALL
            .iter()
            .map(|&level| {
                GradientBoostedModel::fit(
                    Objective::Quantile {
                        alpha: level.alpha(),
                    },
                    &params.quantile,
                    &x_rain,
                    &y_rain,
                    None,
                )
                .map(|model| QuantileStage { level, model })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "Precip amount: {} trees on {} rain rows, {} quantile bands",
            regressor.n_trees(),
            y_rain.len(),
            quantiles.len()
        );
        Ok(Some(AmountStage {
            regressor,
            quantiles,
        }))
    }

    pub fn threshold_mm(&self) -> f64 {
        self.threshold_mm
    }

    pub fn has_amount_stage(&self) -> bool {
        self.amount.is_some()
    }

    pub fn predict(&self, x: &FeatureMatrix) -> PrecipPrediction {
        let raw = self.classify.model.predict(x);
        let probability = self.calibrate.transform_all(&raw);

        let (amount_if_rain, bands) = match &self.amount {
            Some(stage) => {
                let amount: Vec<f64> = stage.regressor.predict(x).into_iter().map(|v| v.max(0.0)).collect();
                let bands = stage
                    .quantiles
                    .iter()
                    .map(|q| RainBand {
                        level: q.level,
                        values: q
                            .model
                            .predict(x)
                            .into_iter()
                            .zip(&probability)
                            .map(|(v, p)| v.max(0.0) * p)
                            .collect(),
                    })
                    .collect();
                (amount, bands)
            }
            None => (vec![0.0; x.n_rows()], Vec::new()),
        };
        let expected = probability
            .iter()
            .zip(&amount_if_rain)
            .map(|(p, a)| p * a)
            .collect();

        PrecipPrediction {
            probability,
            amount_if_rain,
            expected,
            bands,
        }
    }
}

fn binary_labels(amounts: &[f64], threshold: f64) -> Vec<f64> {
    amounts
        .iter()
        .map(|&v| if v >= threshold { 1.0 } else { 0.0 })
        .collect()
}

fn rain_rows(amounts: &[f64], threshold: f64) -> Vec<usize> {
    amounts
        .iter()
        .enumerate()
        .filter(|(_, v)| **v >= threshold)
        .map(|(i, _)| i)
        .collect()
}

impl BundleModel for PrecipitationCorrector {
    const FILE_NAME: &'static str = "precip_model.json";

    fn check_feature_count(&self, n_features: usize) -> Result<(), String> {
        let mut estimators = vec![("classifier".to_string(), &self.classify.model)];
        if let Some(stage) = &self.amount {
            estimators.push(("amount".to_string(), &stage.regressor));
            for q in &stage.quantiles {
                estimators.push((format!("{:?} band", q.level), &q.model));
            }
        }
        for (role, model) in estimators {
            if model.n_features() != n_features {
                return Err(format!(
                    "precip {} expects {} features, bundle lists {}",
                    role,
                    model.n_features(),
                    n_features
                ));
            }
            model.check_consistent().map_err(|e| format!("precip {}: {}", role, e))?;
        }
        Ok(())
    }
}
