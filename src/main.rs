// Weather MOS v0.1
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weather_mos::bundle::ModelStore;
use weather_mos::config::AppConfig;
use weather_mos::errors::AppError;
use weather_mos::models::{PrecipitationCorrector, WeatherCorrector};
use weather_mos::predict::{render_preview, ForecastOutput, Location, PredictionAssembler};
use weather_mos::services::open_meteo::{OpenMeteoClient, HOURLY_FORECAST_VARS};
use weather_mos::services::pairing::PgPairedSource;
use weather_mos::train::{train_and_persist, TrainingConfig};

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;
/// Exit status when no trained bundle exists yet.
const EXIT_NOT_TRAINED: u8 = 3;
const EXIT_USAGE: u8 = 2;
const PREVIEW_HOURS: usize = 24;
const USAGE: &str = "usage: weather-mos <train|predict>\n\n  train    fit both correctors on the paired history in DATABASE_URL\n  predict  correct the latest Open-Meteo forecast with the saved bundles";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_mos=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(command) = std::env::args().nth(1) else {
        println!("{}", USAGE);
        return ExitCode::from(EXIT_USAGE);
    };

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match command.as_str() {
        "train" => run_train(&config).await,
        "predict" => run_predict(&config).await,
        _ => {
            println!("{}", USAGE);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_untrained() => {
            tracing::error!("{}; run `weather-mos train` first", e);
            ExitCode::from(EXIT_NOT_TRAINED)
        }
        Err(e) => {
            tracing::error!("{} failed: {}", command, e);
            ExitCode::FAILURE
        }
    }
}

async fn run_train(config: &AppConfig) -> Result<(), AppError> {
    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(config.require_database_url()?)
        .await?;

    let source = PgPairedSource::new(pool, config.forecast_source.clone());
    let store = ModelStore::new(&config.model_dir);
    let training = TrainingConfig::default().with_precip_threshold(config.precip_threshold_mm);

    let report = train_and_persist(&source, &store, &training).await?;
    tracing::info!(
        "Training complete: {} train / {} val rows, {} features",
        report.train_rows,
        report.val_rows,
        report.n_features
    );
    tracing::debug!("Training report:\n{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_predict(config: &AppConfig) -> Result<(), AppError> {
    let store = ModelStore::new(&config.model_dir);
    let (weather, precip) = store.load_pair::<WeatherCorrector, PrecipitationCorrector>()?;
    let assembler = PredictionAssembler::new(weather, precip);

    let client = OpenMeteoClient::new(config.open_meteo_url.clone())?;
    let forecast = client
        .fetch_forecast(
            config.latitude,
            config.longitude,
            &HOURLY_FORECAST_VARS,
            config.forecast_days,
        )
        .await?;

    let run = assembler.assemble(forecast)?;
    if !run.missing_features.is_empty() {
        tracing::warn!(
            "Served with {} zero-filled features: {}",
            run.missing_features.len(),
            run.missing_features.join(", ")
        );
    }
    tracing::info!(
        "Next {} hours:\n{}",
        PREVIEW_HOURS,
        render_preview(&run.records, PREVIEW_HOURS)
    );

    let location = Location {
        lat: config.latitude,
        lon: config.longitude,
        name: config.location_name.clone(),
    };
    ForecastOutput::new(location, run.records).write_to(&config.forecast_output)?;
    Ok(())
}
