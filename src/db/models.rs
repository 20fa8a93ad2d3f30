use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use crate::helpers::opt_dec_to_f64;
use crate::services::pairing::{ForecastIssue, ForecastValues, IssueTime, ObservationSample, ObservationValues};

/// One stored forecast issue for a valid time.
///
/// `fetched_at` is TEXT: live rows carry an RFC 3339 timestamp, backfilled
/// rows carry a marker tag.
#[derive(Debug, Clone, FromRow)]
pub struct ForecastRow {
    pub fetched_at: String,
    pub valid_time: DateTime<Utc>,
    pub source: String,
    pub lead_hours: Option<i32>,

    pub temperature_2m: Option<Decimal>,
    pub dewpoint_2m: Option<Decimal>,
    pub relative_humidity_2m: Option<Decimal>,
    pub pressure_msl: Option<Decimal>,
    pub surface_pressure: Option<Decimal>,
    pub wind_speed_10m: Option<Decimal>,
    pub wind_direction_10m: Option<Decimal>,
    pub wind_gusts_10m: Option<Decimal>,
    pub precipitation: Option<Decimal>,
    pub precipitation_probability: Option<Decimal>,
    pub cloud_cover: Option<Decimal>,
    pub cape: Option<Decimal>,
    pub visibility: Option<Decimal>,
}

/// One hourly station observation.
#[derive(Debug, Clone, FromRow)]
pub struct ObservationRow {
    pub time: DateTime<Utc>,
    pub temperature_2m: Option<Decimal>,
    pub dewpoint_2m: Option<Decimal>,
    pub relative_humidity_2m: Option<Decimal>,
    pub pressure_msl: Option<Decimal>,
    pub wind_speed_10m: Option<Decimal>,
    pub wind_direction_10m: Option<Decimal>,
    pub precipitation: Option<Decimal>,
    pub cloud_cover: Option<Decimal>,
}

impl From<ForecastRow> for ForecastIssue {
    fn from(row: ForecastRow) -> Self {
        ForecastIssue {
            fetched_at: IssueTime::parse(&row.fetched_at),
            valid_time: row.valid_time,
            source: row.source,
            lead_hours: row.lead_hours,
            values: ForecastValues {
                temp: opt_dec_to_f64(row.temperature_2m),
                dewpoint: opt_dec_to_f64(row.dewpoint_2m),
                humidity: opt_dec_to_f64(row.relative_humidity_2m),
                pressure: opt_dec_to_f64(row.pressure_msl),
                surface_pressure: opt_dec_to_f64(row.surface_pressure),
                wind_speed: opt_dec_to_f64(row.wind_speed_10m),
                wind_dir: opt_dec_to_f64(row.wind_direction_10m),
                wind_gust: opt_dec_to_f64(row.wind_gusts_10m),
                precip: opt_dec_to_f64(row.precipitation),
                precip_prob: opt_dec_to_f64(row.precipitation_probability),
                cloud: opt_dec_to_f64(row.cloud_cover),
                cape: opt_dec_to_f64(row.cape),
                visibility: opt_dec_to_f64(row.visibility),
            },
        }
    }
}

impl From<ObservationRow> for ObservationSample {
    fn from(row: ObservationRow) -> Self {
        ObservationSample {
            time: row.time,
            values: ObservationValues {
                temp: opt_dec_to_f64(row.temperature_2m),
                dewpoint: opt_dec_to_f64(row.dewpoint_2m),
                humidity: opt_dec_to_f64(row.relative_humidity_2m),
                pressure: opt_dec_to_f64(row.pressure_msl),
                wind_speed: opt_dec_to_f64(row.wind_speed_10m),
                wind_dir: opt_dec_to_f64(row.wind_direction_10m),
                precip: opt_dec_to_f64(row.precipitation),
                cloud: opt_dec_to_f64(row.cloud_cover),
            },
        }
    }
}
