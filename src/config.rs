use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::precip::DEFAULT_THRESHOLD_MM;
use crate::services::open_meteo::DEFAULT_OPEN_METEO_URL;

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Only required for training.
    pub database_url: Option<String>,
    pub model_dir: PathBuf,
    pub forecast_output: PathBuf,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    pub forecast_days: u32,
    /// NWP source tag whose issues are paired for training.
    pub forecast_source: String,
    pub precip_threshold_mm: f64,
    pub open_meteo_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            model_dir: PathBuf::from(text("MODEL_DIR", "./models")),
            forecast_output: PathBuf::from(text("FORECAST_OUTPUT", "./latest_forecast.json")),
            latitude: parsed(&lookup, "LATITUDE", -24.601389)?,
            longitude: parsed(&lookup, "LONGITUDE", 26.0675)?,
            location_name: text("LOCATION_NAME", "Ruretse"),
            forecast_days: parsed(&lookup, "FORECAST_DAYS", 7)?,
            forecast_source: text("FORECAST_SOURCE", "best_match"),
            precip_threshold_mm: parsed(&lookup, "PRECIP_THRESHOLD_MM", DEFAULT_THRESHOLD_MM)?,
            open_meteo_url: text("OPEN_METEO_URL", DEFAULT_OPEN_METEO_URL),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, AppError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| AppError::Config("DATABASE_URL must be set".to_string()))
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, AppError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", name, raw))),
    }
}
