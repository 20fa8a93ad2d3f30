//! Serving-time assembly.
//!
//! A fresh forecast window has no observations yet, so every `obs_*` column
//! is filled with the same-hour forecast before features are built. Lag,
//! rolling and bias features therefore see forecast values where training saw
//! observations. This skew is known and kept; changing only the serving side
//! would make the two paths disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use crate::bundle::{write_atomic, TrainedModelBundle};
use crate::errors::AppError;
use crate::features::{apply_observation_proxy, build_feature_set};
use crate::frame::{FeatureMatrix, TimeFrame, LEAD_HOURS};
use crate::helpers::round_dp;
use crate::models::{PrecipitationCorrector, RainQuantile, WeatherCorrector, WeatherTarget};

/// Value written for a bundle feature that serving data does not have.
pub const MISSING_FEATURE_FILL: f64 = 0.0;

/// One corrected forecast hour. Targets the weather bundle was not trained
/// on are `None` and left out of the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_hours: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    /// 10th and 90th percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_range_c: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_kmh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_direction_deg: Option<f64>,
    pub precip_probability_pct: f64,
    pub precip_expected_mm: f64,
    /// Probability-scaled 10th and 90th percentile amounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precip_range_mm: Option<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
}

/// Document handed to the serving layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutput {
    pub generated_at: DateTime<Utc>,
    pub location: Location,
    pub hourly: Vec<PredictionRecord>,
}

impl ForecastOutput {
    pub fn new(location: Location, hourly: Vec<PredictionRecord>) -> Self {
        Self {
            generated_at: Utc::now(),
            location,
            hourly,
        }
    }

    /// Write the document atomically, pretty-printed.
    pub fn write_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        tracing::info!("Saved {} forecast hours to {}", self.hourly.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRun {
    /// One record per forecast hour, ascending by time.
    pub records: Vec<PredictionRecord>,
    /// Bundle features absent from the fresh table, filled with zero.
    pub missing_features: Vec<String>,
}

/// Applies both persisted correctors to a fresh forecast window.
pub struct PredictionAssembler {
    weather: TrainedModelBundle<WeatherCorrector>,
    precip: TrainedModelBundle<PrecipitationCorrector>,
}

impl PredictionAssembler {
    pub fn new(
        weather: TrainedModelBundle<WeatherCorrector>,
        precip: TrainedModelBundle<PrecipitationCorrector>,
    ) -> Self {
        Self { weather, precip }
    }

    pub fn assemble(&self, mut forecast: TimeFrame) -> Result<PredictionRun, AppError> {
        if !forecast.is_strictly_increasing() {
            return Err(AppError::InvalidInput(
                "forecast window must have strictly increasing, unique valid times".to_string(),
            ));
        }
        apply_observation_proxy(&mut forecast);
        build_feature_set(&mut forecast);

        let mut missing = BTreeSet::new();
        let x_weather = align(&forecast, &self.weather.feature_names, "weather", &mut missing);
        let x_precip = align(&forecast, &self.precip.feature_names, "precipitation", &mut missing);

        let weather = self.weather.model.predict(&x_weather);
        let precip = self.precip.model.predict(&x_precip);
        let leads = forecast.column(LEAD_HOURS);

        let point = |target: WeatherTarget, row: usize, dp: u32| {
            weather.get(target).map(|p| round_dp(p.point[row], dp))
        };
        let p10 = precip.band(RainQuantile::P10);
        let p90 = precip.band(RainQuantile::P90);

        let records = forecast
            .index()
            .iter()
            .enumerate()
            .map(|(row, &time)| PredictionRecord {
                time,
                lead_hours: leads
                    .map(|l| l[row])
                    .filter(|v| v.is_finite())
                    .map(|v| v.round() as i64),
                temperature_c: point(WeatherTarget::Temperature, row, 1),
                temperature_range_c: weather
                    .get(WeatherTarget::Temperature)
                    .map(|p| [round_dp(p.lower[row], 1), round_dp(p.upper[row], 1)]),
                humidity_pct: point(WeatherTarget::Humidity, row, 0),
                wind_speed_kmh: point(WeatherTarget::WindSpeed, row, 1),
                wind_direction_deg: point(WeatherTarget::WindDirection, row, 0),
                precip_probability_pct: round_dp(precip.probability[row] * 100.0, 0),
                precip_expected_mm: round_dp(precip.expected[row], 2),
                precip_range_mm: p10
                    .zip(p90)
                    .map(|(lo, hi)| [round_dp(lo[row], 2), round_dp(hi[row], 2)]),
            })
            .collect();

        Ok(PredictionRun {
            records,
            missing_features: missing.into_iter().collect(),
        })
    }
}

/// Matrix in the bundle's feature order; absent features are zero-filled and
/// collected into `missing`. Extra engineered columns are ignored.
fn align(frame: &TimeFrame, names: &[String], model: &str, missing: &mut BTreeSet<String>) -> FeatureMatrix {
    let (mut x, absent) = frame.to_matrix(names);
    if !absent.is_empty() {
        tracing::warn!(
            "{} {} model features missing from the forecast window, filled with {}: {}",
            absent.len(),
            model,
            MISSING_FEATURE_FILL,
            absent.join(", ")
        );
        x.fill_missing(&absent, MISSING_FEATURE_FILL);
        missing.extend(absent);
    }
    x
}

/// Plain-text table of the first `hours` records.
pub fn render_preview(records: &[PredictionRecord], hours: usize) -> String {
    let fmt = |v: Option<f64>, dp: usize| v.map_or_else(|| "-".to_string(), |v| format!("{:.*}", dp, v));
    let mut out = String::from("Time              Temp°C  RH%  Wind  Rain%  mm\n");
    for r in records.iter().take(hours) {
        let _ = writeln!(
            out,
            "{}  {:>6}  {:>3}  {:>4}  {:>5}  {:.2}",
            r.time.format("%Y-%m-%d %H:%M"),
            fmt(r.temperature_c, 1),
            fmt(r.humidity_pct, 0),
            fmt(r.wind_speed_kmh, 1),
            format!("{:.0}", r.precip_probability_pct),
            r.precip_expected_mm
        );
    }
    out
}
