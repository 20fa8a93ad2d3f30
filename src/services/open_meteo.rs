//! Open-Meteo forecast client.
//!
//! Fetches the upcoming hourly NWP window for the site and returns it as a
//! time-indexed table of `fcst_*` columns plus `lead_hours`.
//! See: https://open-meteo.com/en/docs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::errors::AppError;
use crate::frame::{TimeFrame, LEAD_HOURS};
use crate::helpers::MISSING;

pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Hourly variables requested for a fresh forecast.
pub const HOURLY_FORECAST_VARS: [&str; 13] = [
    "temperature_2m",
    "dewpoint_2m",
    "relative_humidity_2m",
    "pressure_msl",
    "surface_pressure",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "precipitation",
    "precipitation_probability",
    "cloud_cover",
    "cape",
    "visibility",
];

/// Open-Meteo variable name to the column name used in training.
fn column_for(variable: &str) -> Option<&'static str> {
    Some(match variable {
        "temperature_2m" => "fcst_temp",
        "dewpoint_2m" => "fcst_dewpoint",
        "relative_humidity_2m" => "fcst_humidity",
        "pressure_msl" => "fcst_pressure",
        "surface_pressure" => "fcst_surface_pressure",
        "wind_speed_10m" => "fcst_wind_speed",
        "wind_direction_10m" => "fcst_wind_dir",
        "wind_gusts_10m" => "fcst_wind_gust",
        "precipitation" => "fcst_precip",
        "precipitation_probability" => "fcst_precip_prob",
        "cloud_cover" => "fcst_cloud",
        "cape" => "fcst_cape",
        "visibility" => "fcst_visibility",
        _ => return None,
    })
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
}

// --- Open-Meteo JSON response types ---

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    #[serde(flatten)]
    series: BTreeMap<String, Vec<Option<f64>>>,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::ExternalServiceError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch the hourly forecast for the next `forecast_days` days.
    pub async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        variables: &[&str],
        forecast_days: u32,
    ) -> Result<TimeFrame, AppError> {
        let url = format!(
            "{}?latitude={:.4}&longitude={:.4}&hourly={}&timezone=UTC&forecast_days={}",
            self.base_url,
            lat,
            lon,
            variables.join(","),
            forecast_days
        );
        tracing::debug!("Fetching Open-Meteo forecast: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("Open-Meteo request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo returned HTTP {}",
                response.status()
            )));
        }

        let raw_json: serde_json::Value = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Open-Meteo JSON parse error: {}", e))
        })?;
        let frame = parse_hourly(raw_json)?;
        tracing::info!(
            "Fetched {} forecast hours ({} columns)",
            frame.len(),
            frame.column_names().count()
        );
        Ok(frame)
    }
}

/// Convert an Open-Meteo hourly response into a forecast table.
///
/// Times are naive UTC (`timezone=UTC` is requested). Nulls become missing,
/// unknown variables are dropped, and `lead_hours` is the row position.
pub fn parse_hourly(raw_json: serde_json::Value) -> Result<TimeFrame, AppError> {
    let response: ForecastResponse = serde_json::from_value(raw_json).map_err(|e| {
        AppError::ExternalServiceError(format!("Open-Meteo response structure error: {}", e))
    })?;
    let hourly = response.hourly;

    let index = hourly
        .time
        .iter()
        .map(|s| parse_time(s))
        .collect::<Result<Vec<_>, _>>()?;
    let n = index.len();
    let mut frame = TimeFrame::new(index);
    if !frame.is_strictly_increasing() {
        return Err(AppError::ExternalServiceError(
            "Open-Meteo hourly times are not strictly increasing".to_string(),
        ));
    }

    for (variable, values) in hourly.series {
        let Some(column) = column_for(&variable) else {
            tracing::debug!("Ignoring unknown Open-Meteo variable '{}'", variable);
            continue;
        };
        if values.len() != n {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo '{}' has {} values for {} times",
                variable,
                values.len(),
                n
            )));
        }
        frame.insert(column, values.into_iter().map(|v| v.unwrap_or(MISSING)).collect())?;
    }
    frame.insert(LEAD_HOURS, (0..n).map(|i| i as f64).collect())?;
    Ok(frame)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| AppError::ExternalServiceError(format!("Open-Meteo time '{}' is not parseable", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "latitude": -24.6,
            "longitude": 26.07,
            "hourly_units": { "time": "iso8601", "temperature_2m": "°C" },
            "hourly": {
                "time": ["2026-03-01T00:00", "2026-03-01T01:00", "2026-03-01T02:00"],
                "temperature_2m": [21.5, 20.9, null],
                "wind_speed_10m": [8.0, 7.5, 7.1],
                "wind_direction_10m": [90.0, 95.0, 100.0],
                "precipitation": [0.0, 0.2, 1.4],
                "uv_index": [0.0, 0.0, 0.0]
            }
        })
    }

    #[test]
    fn test_parse_hourly_renames_and_adds_lead() {
        let frame = parse_hourly(sample_json()).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(
            frame.index()[1],
            "2026-03-01T01:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        let temp = frame.column("fcst_temp").unwrap();
        assert_eq!(&temp[..2], &[21.5, 20.9]);
        assert!(temp[2].is_nan());
        assert_eq!(frame.column("fcst_precip").unwrap(), &[0.0, 0.2, 1.4]);
        assert_eq!(frame.column(LEAD_HOURS).unwrap(), &[0.0, 1.0, 2.0]);
        assert!(!frame.has_column("uv_index"));
        assert!(frame.column_names().all(|c| !c.starts_with("obs_")));
    }

    #[test]
    fn test_parse_hourly_rejects_ragged_series() {
        let json = serde_json::json!({
            "hourly": {
                "time": ["2026-03-01T00:00", "2026-03-01T01:00"],
                "temperature_2m": [21.5]
            }
        });
        assert!(matches!(parse_hourly(json), Err(AppError::ExternalServiceError(_))));
    }

    #[test]
    fn test_parse_hourly_rejects_missing_block() {
        let json = serde_json::json!({ "error": true, "reason": "bad latitude" });
        assert!(parse_hourly(json).is_err());
    }

    #[test]
    fn test_every_requested_variable_has_a_column() {
        for v in HOURLY_FORECAST_VARS {
            assert!(column_for(v).is_some(), "{} has no column mapping", v);
        }
    }

    #[tokio::test]
    async fn test_fetch_forecast_from_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", "-24.6014"))
            .and(query_param("timezone", "UTC"))
            .and(query_param("forecast_days", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_json()))
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(format!("{}/v1/forecast", server.uri())).unwrap();
        let frame = client
            .fetch_forecast(-24.601389, 26.0675, &HOURLY_FORECAST_VARS, 7)
            .await
            .unwrap();
        assert_eq!(frame.len(), 3);
        assert!(frame.has_column("fcst_wind_speed"));
    }

    #[tokio::test]
    async fn test_fetch_forecast_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(server.uri()).unwrap();
        let err = client
            .fetch_forecast(-24.6, 26.07, &HOURLY_FORECAST_VARS, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"), "got {}", err);
    }
}
