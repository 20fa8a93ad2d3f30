//! Correction model families: per-variable weather regression and the
//! two-stage precipitation model.

pub mod precip;
pub mod weather;

pub use precip::{PrecipParams, PrecipPrediction, PrecipReport, PrecipitationCorrector, RainQuantile};
pub use weather::{TargetOutcome, TargetReport, WeatherCorrector, WeatherParams, WeatherPrediction, WeatherTarget};

use crate::frame::FeatureMatrix;

/// Labelled rows required before a sub-target is fitted.
pub const MIN_TARGET_ROWS: usize = 100;

/// Keep only the rows whose label is present.
pub(crate) fn labelled(x: &FeatureMatrix, labels: &[f64]) -> (FeatureMatrix, Vec<f64>) {
    let rows: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, _)| i)
        .collect();
    let y = rows.iter().map(|&r| labels[r]).collect();
    (x.select_rows(&rows), y)
}
