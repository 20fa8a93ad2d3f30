use sqlx::PgPool;

use super::models::{ForecastRow, ObservationRow};

/// All stored issues for one NWP source, every issue per valid time.
///
/// Latest-issue selection happens in `pairing::pair_latest`: `fetched_at` mixes
/// timestamps with backfill markers, so a text `ORDER BY` would rank markers
/// above live issues.
pub async fn load_forecast_issues(pool: &PgPool, source: &str) -> Result<Vec<ForecastRow>, sqlx::Error> {
    sqlx::query_as::<_, ForecastRow>(
        "SELECT fetched_at, valid_time, source, lead_hours,
                temperature_2m, dewpoint_2m, relative_humidity_2m,
                pressure_msl, surface_pressure,
                wind_speed_10m, wind_direction_10m, wind_gusts_10m,
                precipitation, precipitation_probability,
                cloud_cover, cape, visibility
         FROM forecasts
         WHERE source = $1
         ORDER BY valid_time, fetched_at",
    )
    .bind(source)
    .fetch_all(pool)
    .await
}

/// All hourly observations, oldest first.
pub async fn load_observations(pool: &PgPool) -> Result<Vec<ObservationRow>, sqlx::Error> {
    sqlx::query_as::<_, ObservationRow>(
        "SELECT time, temperature_2m, dewpoint_2m, relative_humidity_2m,
                pressure_msl, wind_speed_10m, wind_direction_10m,
                precipitation, cloud_cover
         FROM observations
         ORDER BY time",
    )
    .fetch_all(pool)
    .await
}
