//! Training orchestration.
//!
//! Paired history → features → sparse-row drop → chronological split →
//! weather and precipitation correctors → bundles. The validation slice is
//! always the most recent part of the history, never shuffled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::bundle::{ModelStore, TrainedModelBundle};
use crate::errors::AppError;
use crate::features::{build_feature_set, feature_columns};
use crate::frame::{FeatureMatrix, TimeFrame, LEAD_HOURS};
use crate::metrics;
use crate::models::{
    PrecipParams, PrecipReport, PrecipitationCorrector, TargetReport, WeatherCorrector, WeatherParams,
    WeatherTarget,
};
use crate::services::pairing::{paired_frame, provenance_counts, PairedSample, PairedSampleSource, Provenance};

/// Paired rows required before training starts.
pub const MIN_PAIRED_ROWS: usize = 500;
/// Rows that must survive the sparse-row drop: one per split.
const MIN_ROWS_AFTER_DROP: usize = 2;
/// Lead times (hours) reported in the skill summary.
pub const LEAD_BUCKETS_H: [u32; 6] = [1, 3, 6, 12, 24, 48];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub min_rows: usize,
    /// Fraction of rows (oldest first) used for training.
    pub train_fraction: f64,
    pub lead_buckets: Vec<u32>,
    /// Buckets with fewer validation rows are left out of the report.
    pub min_bucket_rows: usize,
    pub weather: WeatherParams,
    pub precip: PrecipParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_rows: MIN_PAIRED_ROWS,
            train_fraction: 0.8,
            lead_buckets: LEAD_BUCKETS_H.to_vec(),
            min_bucket_rows: 10,
            weather: WeatherParams::default(),
            precip: PrecipParams::default(),
        }
    }
}

impl TrainingConfig {
    pub fn with_precip_threshold(mut self, threshold_mm: f64) -> Self {
        self.precip.threshold_mm = threshold_mm;
        self
    }
}

/// Corrected versus raw temperature MAE for one lead time, or for all
/// validation rows when `lead_hours` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTimeSkill {
    pub lead_hours: Option<u32>,
    pub rows: usize,
    pub corrected_mae: f64,
    pub raw_mae: f64,
    /// `(1 - corrected / raw) * 100`, 0 when the raw MAE is 0.
    pub improvement_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub paired_rows: usize,
    pub rows_after_drop: usize,
    pub train_rows: usize,
    pub val_rows: usize,
    pub n_features: usize,
    pub provenance: BTreeMap<Provenance, usize>,
    pub weather: Vec<TargetReport>,
    pub precip: PrecipReport,
    pub lead_skill: Vec<LeadTimeSkill>,
}

impl TrainingReport {
    /// The all-leads comparison, if temperature was trained.
    pub fn overall_skill(&self) -> Option<&LeadTimeSkill> {
        self.lead_skill.iter().find(|s| s.lead_hours.is_none())
    }
}

pub struct TrainingOutcome {
    pub weather: TrainedModelBundle<WeatherCorrector>,
    pub precip: TrainedModelBundle<PrecipitationCorrector>,
    pub report: TrainingReport,
}

/// Train both correctors on paired history.
pub fn train(samples: &[PairedSample], config: &TrainingConfig) -> Result<TrainingOutcome, AppError> {
    let provenance = provenance_counts(samples);
    if let Some(&n) = provenance.get(&Provenance::ArchiveFallback) {
        tracing::warn!(
            "Training on {} archive-fallback rows (reanalysis standing in for forecasts)",
            n
        );
    }
    if let Some(&n) = provenance.get(&Provenance::Backfill) {
        tracing::info!("{} paired rows come from backfilled forecasts", n);
    }
    let frame = paired_frame(samples)?;
    let mut outcome = train_on_frame(frame, config)?;
    outcome.report.provenance = provenance;
    Ok(outcome)
}

/// Train on an already-paired table with `obs_*`, `fcst_*` and `lead_hours`
/// columns.
pub fn train_on_frame(mut frame: TimeFrame, config: &TrainingConfig) -> Result<TrainingOutcome, AppError> {
    let paired_rows = frame.len();
    if paired_rows < config.min_rows {
        return Err(AppError::insufficient("paired rows", paired_rows, config.min_rows));
    }
    if !frame.is_strictly_increasing() {
        return Err(AppError::InvalidInput(
            "paired history must be strictly ordered by valid time".to_string(),
        ));
    }
    if let (Some(first), Some(last)) = (frame.index().first(), frame.index().last()) {
        tracing::info!("Loaded {} paired rows: {} → {}", paired_rows, first, last);
    }

    build_feature_set(&mut frame);
    let features = feature_columns(&frame);
    tracing::info!("{} features", features.len());

    let frame = drop_sparse_rows(&frame, &features);
    let rows_after_drop = frame.len();
    tracing::info!("{} rows after dropping sparse rows", rows_after_drop);
    let split = split_index(rows_after_drop, config.train_fraction);
    if split == 0 || split == rows_after_drop {
        return Err(AppError::insufficient(
            "rows after dropping sparse rows",
            rows_after_drop,
            MIN_ROWS_AFTER_DROP,
        ));
    }
    let train_idx: Vec<usize> = (0..split).collect();
    let val_idx: Vec<usize> = (split..rows_after_drop).collect();
    let train_frame = frame.select_rows(&train_idx);
    let val_frame = frame.select_rows(&val_idx);
    log_slice("Train", &train_frame);
    log_slice("Val", &val_frame);

    let (x_train, _) = train_frame.to_matrix(&features);
    let (x_val, _) = val_frame.to_matrix(&features);

    tracing::info!("Training weather corrector");
    let (weather, weather_report) =
        WeatherCorrector::fit(&config.weather, &x_train, &train_frame, &x_val, &val_frame)?;

    tracing::info!("Training precipitation corrector");
    let (precip, precip_report) =
        PrecipitationCorrector::fit(&config.precip, &x_train, &train_frame, &x_val, &val_frame)?;

    let lead_skill = lead_time_skill(&weather, &x_val, &val_frame, config);

    let report = TrainingReport {
        paired_rows,
        rows_after_drop,
        train_rows: train_frame.len(),
        val_rows: val_frame.len(),
        n_features: features.len(),
        provenance: BTreeMap::new(),
        weather: weather_report,
        precip: precip_report,
        lead_skill,
    };

    let run = Uuid::new_v4();
    Ok(TrainingOutcome {
        weather: TrainedModelBundle::new(features.clone(), weather).in_training_run(run),
        precip: TrainedModelBundle::new(features, precip).in_training_run(run),
        report,
    })
}

/// Load paired history, train off the async runtime, and persist both
/// bundles. Nothing is written when training fails.
pub async fn train_and_persist<S: PairedSampleSource>(
    source: &S,
    store: &ModelStore,
    config: &TrainingConfig,
) -> Result<TrainingReport, AppError> {
    let samples = source.load_paired().await?;
    let config = config.clone();
    let outcome = run_blocking(move || train(&samples, &config)).await?;

    store.save_pair(&outcome.weather, &outcome.precip)?;
    Ok(outcome.report)
}

/// Run compute-bound work on the blocking pool. A panic in `work` comes back
/// as `AppError::Internal`.
async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("training task failed: {}", e)))?
}

/// Keep rows with at least half (rounded down) of the feature columns present.
pub fn drop_sparse_rows(frame: &TimeFrame, features: &[String]) -> TimeFrame {
    let threshold = features.len() / 2;
    let columns: Vec<&[f64]> = features.iter().filter_map(|f| frame.column(f)).collect();
    let keep: Vec<usize> = (0..frame.len())
        .filter(|&r| columns.iter().filter(|c| !c[r].is_nan()).count() >= threshold)
        .collect();
    frame.select_rows(&keep)
}

/// First validation row for a chronological split.
pub fn split_index(n_rows: usize, train_fraction: f64) -> usize {
    ((n_rows as f64 * train_fraction.clamp(0.0, 1.0)) as usize).min(n_rows)
}

fn log_slice(label: &str, frame: &TimeFrame) {
    match (frame.index().first(), frame.index().last()) {
        (Some(first), Some(last)) => {
            tracing::info!("{}: {} rows ({} → {})", label, frame.len(), first, last)
        }
        _ => tracing::warn!("{}: empty slice", label),
    }
}

/// Corrected versus raw temperature MAE per lead bucket plus an all-leads row.
fn lead_time_skill(
    weather: &WeatherCorrector,
    x_val: &FeatureMatrix,
    val: &TimeFrame,
    config: &TrainingConfig,
) -> Vec<LeadTimeSkill> {
    let target = WeatherTarget::Temperature;
    let (Some(obs), Some(raw)) = (val.column(target.observation_column()), val.column(target.forecast_column())) else {
        tracing::warn!("Lead-time report skipped: validation slice has no temperature columns");
        return Vec::new();
    };
    let prediction = weather.predict(x_val);
    let Some(corrected) = prediction.get(target).map(|p| p.point.as_slice()) else {
        tracing::warn!("Lead-time report skipped: temperature was not trained");
        return Vec::new();
    };
    let leads = val.column(LEAD_HOURS);

    let skill_for = |rows: &[usize], lead_hours: Option<u32>| -> Option<LeadTimeSkill> {
        let rows: Vec<usize> = rows
            .iter()
            .copied()
            .filter(|&r| obs[r].is_finite() && raw[r].is_finite() && corrected[r].is_finite())
            .collect();
        let pick = |values: &[f64]| rows.iter().map(|&r| values[r]).collect::<Vec<f64>>();
        let (o, f, c) = (pick(obs), pick(raw), pick(corrected));
        let corrected_mae = metrics::mae(&c, &o)?;
        let raw_mae = metrics::mae(&f, &o)?;
        let improvement_pct = if raw_mae > 0.0 {
            (1.0 - corrected_mae / raw_mae) * 100.0
        } else {
            0.0
        };
        Some(LeadTimeSkill {
            lead_hours,
            rows: rows.len(),
            corrected_mae,
            raw_mae,
            improvement_pct,
        })
    };

    let mut skill = Vec::new();
    if let Some(leads) = leads {
        for &bucket in &config.lead_buckets {
            let rows: Vec<usize> = (0..val.len()).filter(|&r| leads[r] == f64::from(bucket)).collect();
            if rows.len() < config.min_bucket_rows {
                continue;
            }
            if let Some(s) = skill_for(&rows, Some(bucket)) {
                tracing::info!(
                    "Lead {:2}h (n={:4}): Temp MAE corrected={:.2}°C NWP={:.2}°C Δ={:+.1}%",
                    bucket,
                    s.rows,
                    s.corrected_mae,
                    s.raw_mae,
                    s.improvement_pct
                );
                skill.push(s);
            }
        }
    }
    let all: Vec<usize> = (0..val.len()).collect();
    if let Some(s) = skill_for(&all, None) {
        tracing::info!(
            "All leads (n={}): Temp MAE corrected={:.2}°C NWP={:.2}°C Δ={:+.1}%",
            s.rows,
            s.corrected_mae,
            s.raw_mae,
            s.improvement_pct
        );
        skill.push(s);
    }
    skill
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boosting::BoostParams;
    use crate::models::TargetOutcome;
    use crate::services::pairing::{ForecastValues, IssueTime, ObservationValues};
    use chrono::{DateTime, Duration, Utc};
    use std::f64::consts::PI;

    /// Deterministic pseudo-noise in [-1, 1].
    fn noise(i: usize) -> f64 {
        ((i as f64 * 12.9898 + 78.233).sin() * 43758.5453).fract().abs() * 2.0 - 1.0
    }

    fn start() -> DateTime<Utc> {
        "2023-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
    }

    fn light_config() -> TrainingConfig {
        let point = BoostParams {
            n_estimators: 60,
            learning_rate: 0.3,
            max_depth: 3,
            min_child_samples: 10,
            reg_lambda: 1.0,
            max_bins: 64,
            early_stopping_rounds: 15,
        };
        let quantile = BoostParams {
            n_estimators: 20,
            early_stopping_rounds: 0,
            ..point.clone()
        };
        TrainingConfig {
            weather: WeatherParams {
                point: point.clone(),
                quantile: quantile.clone(),
                ..WeatherParams::default()
            },
            precip: PrecipParams {
                classifier: point.clone(),
                amount: point,
                quantile,
                ..PrecipParams::default()
            },
            ..TrainingConfig::default()
        }
    }

    /// Hourly table with a diurnal and slow temperature cycle. `obs` maps the
    /// true temperature and row to the observed value; `fcst` likewise for
    /// the forecast. One hour in `rain_every` is wet.
    fn synthetic(
        n: usize,
        rain_every: usize,
        fcst: impl Fn(f64, usize) -> f64,
        obs: impl Fn(f64, usize) -> f64,
    ) -> TimeFrame {
        let idx = (0..n).map(|i| start() + Duration::hours(i as i64)).collect();
        let truth: Vec<f64> = (0..n)
            .map(|i| {
                let h = i as f64;
                20.0 + 6.0 * (2.0 * PI * h / 24.0).sin() + 4.0 * (2.0 * PI * h / 240.0).sin()
            })
            .collect();
        let mut frame = TimeFrame::new(idx);
        frame
            .insert("fcst_temp", truth.iter().enumerate().map(|(i, &t)| fcst(t, i)).collect())
            .unwrap();
        frame
            .insert("obs_temp", truth.iter().enumerate().map(|(i, &t)| obs(t, i)).collect())
            .unwrap();
        let wet = |i: usize| i % rain_every == 0;
        frame
            .insert(
                "fcst_precip",
                (0..n).map(|i| if wet(i) { 1.0 + (i % 3) as f64 } else { 0.0 }).collect(),
            )
            .unwrap();
        frame
            .insert(
                "obs_precip",
                (0..n).map(|i| if wet(i) { 0.8 + (i % 5) as f64 * 0.3 } else { 0.0 }).collect(),
            )
            .unwrap();
        frame
            .insert(LEAD_HOURS, (0..n).map(|i| ((i % 48) + 1) as f64).collect())
            .unwrap();
        frame
    }

    fn paired_samples(n: usize) -> Vec<PairedSample> {
        (0..n)
            .map(|i| PairedSample {
                valid_time: start() + Duration::hours(i as i64),
                issue: IssueTime::Issued(start()),
                lead_hours: Some(6),
                forecast: ForecastValues {
                    temp: 20.0,
                    ..ForecastValues::missing()
                },
                observation: ObservationValues {
                    temp: 21.0,
                    precip: 0.0,
                    ..ObservationValues::missing()
                },
            })
            .collect()
    }

    /// Paired samples with every forecast and observation field present.
    /// The forecast runs 1.5 °C warm and one hour in four is wet.
    fn full_samples(n: usize) -> Vec<PairedSample> {
        (0..n)
            .map(|i| {
                let h = i as f64;
                let day = (2.0 * PI * h / 24.0).sin();
                let truth = 20.0 + 6.0 * day + 3.0 * (2.0 * PI * h / 240.0).sin();
                let wet = i % 4 == 0;
                let rain = if wet { 0.6 + (i % 3) as f64 * 0.7 } else { 0.0 };
                PairedSample {
                    valid_time: start() + Duration::hours(i as i64),
                    issue: if i < 50 {
                        IssueTime::Backfill("backfill".to_string())
                    } else {
                        IssueTime::Issued(start())
                    },
                    lead_hours: Some(((i % 48) + 1) as i32),
                    forecast: ForecastValues {
                        temp: truth + 1.5 + 0.2 * noise(i),
                        dewpoint: truth - 8.0,
                        humidity: 55.0 - 20.0 * day,
                        pressure: 1012.0 + 2.0 * day,
                        surface_pressure: 880.0 + 2.0 * day,
                        wind_speed: 12.0 + 4.0 * day,
                        wind_dir: ((i * 37) % 360) as f64,
                        wind_gust: 18.0 + 6.0 * day,
                        precip: rain * 1.2,
                        precip_prob: if wet { 70.0 } else { 10.0 },
                        cloud: if wet { 90.0 } else { 20.0 },
                        cape: 300.0 + 100.0 * day,
                        visibility: 20000.0,
                    },
                    observation: ObservationValues {
                        temp: truth,
                        dewpoint: truth - 9.0,
                        humidity: 50.0 - 20.0 * day,
                        pressure: 1011.5 + 2.0 * day,
                        wind_speed: 10.0 + 4.0 * day,
                        wind_dir: ((i * 37 + 10) % 360) as f64,
                        precip: rain,
                        cloud: if wet { 85.0 } else { 25.0 },
                    },
                }
            })
            .collect()
    }

    #[test]
    fn test_exactly_min_rows_trains() {
        let outcome = train(&full_samples(500), &light_config()).unwrap();
        let report = &outcome.report;
        assert_eq!(report.paired_rows, 500);
        assert!(report.rows_after_drop < 500, "leading rows lack history");
        assert_eq!(report.train_rows + report.val_rows, report.rows_after_drop);
        assert_eq!(report.provenance.get(&Provenance::Backfill), Some(&50));
        assert_eq!(report.provenance.get(&Provenance::Live), Some(&450));
        assert!(report
            .weather
            .iter()
            .all(|r| matches!(r.outcome, TargetOutcome::Fitted { .. })));
    }

    #[test]
    fn test_too_few_rows_after_drop_aborts() {
        let config = TrainingConfig {
            min_rows: 1,
            ..light_config()
        };
        let frame = synthetic(1, 4, |t, _| t, |t, _| t);
        match train_on_frame(frame, &config).err().unwrap() {
            AppError::InsufficientData { context, .. } => {
                assert!(context.contains("after dropping"), "got {}", context)
            }
            other => panic!("expected insufficient data, got {}", other),
        }
    }

    #[test]
    fn test_corrector_bundles_roundtrip_predict_identically() {
        let frame = synthetic(600, 4, |t, _| t + 1.0, |t, i| t + 0.3 * noise(i));
        let outcome = train_on_frame(frame, &light_config()).unwrap();
        assert!(outcome.precip.model.has_amount_stage());

        let store = ModelStore::new(
            std::env::temp_dir().join(format!("weather_mos_roundtrip_{}", uuid::Uuid::new_v4())),
        );
        store.save_pair(&outcome.weather, &outcome.precip).unwrap();
        let (weather, precip) = store
            .load_pair::<WeatherCorrector, PrecipitationCorrector>()
            .unwrap();
        assert_eq!(weather.training_run, outcome.weather.training_run);
        assert_eq!(weather.feature_names, outcome.weather.feature_names);

        let mut serve = synthetic(120, 3, |t, i| t + 0.5 * noise(i), |t, _| t);
        build_feature_set(&mut serve);
        let (x, _) = serve.to_matrix(&weather.feature_names);
        assert_eq!(weather.model.predict(&x), outcome.weather.model.predict(&x));
        assert_eq!(precip.model.predict(&x), outcome.precip.model.predict(&x));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn test_panicking_training_task_is_internal_error() {
        let err = run_blocking::<(), _>(|| panic!("worker exploded")).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)), "got {}", err);
    }

    #[test]
    fn test_aborts_below_min_rows() {
        let err = train(&paired_samples(499), &light_config()).err().unwrap();
        match err {
            AppError::InsufficientData {
                available, required, ..
            } => {
                assert_eq!(available, 499);
                assert_eq!(required, 500);
            }
            other => panic!("expected insufficient data, got {}", other),
        }
    }

    #[test]
    fn test_split_index_is_chronological_80_20() {
        assert_eq!(split_index(1000, 0.8), 800);
        assert_eq!(split_index(599, 0.8), 479);
        assert_eq!(split_index(10, 1.5), 10);
    }

    #[test]
    fn test_drop_sparse_rows_keeps_half_present() {
        let idx = (0..3).map(|i| start() + Duration::hours(i)).collect();
        let mut frame = TimeFrame::new(idx);
        let nan = f64::NAN;
        frame.insert("a", vec![1.0, nan, nan]).unwrap();
        frame.insert("b", vec![1.0, 1.0, nan]).unwrap();
        frame.insert("c", vec![nan, nan, nan]).unwrap();
        frame.insert("d", vec![1.0, nan, nan]).unwrap();
        let features: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let kept = drop_sparse_rows(&frame, &features);
        // Rows need 2 of 4 present: row 0 has 3, row 1 has 1, row 2 has 0.
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.index()[0], start());
    }

    #[test]
    fn test_learnable_relationship_beats_raw_forecast() {
        let frame = synthetic(
            500,
            4,
            |t, _| t,
            |t, i| 1.2 * t + 3.0 + 0.3 * noise(i),
        );
        let outcome = train_on_frame(frame, &light_config()).unwrap();
        let report = &outcome.report;
        assert_eq!(report.paired_rows, 500);
        assert_eq!(report.train_rows + report.val_rows, report.rows_after_drop);

        let overall = report.overall_skill().expect("temperature trained");
        assert!(
            overall.corrected_mae < overall.raw_mae,
            "corrected {} vs raw {}",
            overall.corrected_mae,
            overall.raw_mae
        );
        let temp = report
            .weather
            .iter()
            .find(|r| r.target == WeatherTarget::Temperature)
            .unwrap();
        assert!(matches!(temp.outcome, TargetOutcome::Fitted { .. }));
        // No humidity or wind observations in this table.
        assert!(report
            .weather
            .iter()
            .filter(|r| r.target != WeatherTarget::Temperature)
            .all(|r| matches!(r.outcome, TargetOutcome::Skipped { available: 0, .. })));
        assert_eq!(outcome.weather.feature_names, outcome.precip.feature_names);
        assert!(outcome.weather.feature_names.contains(&LEAD_HOURS.to_string()));
    }

    #[test]
    fn test_too_few_precip_labels_aborts_training() {
        let mut frame = synthetic(600, 4, |t, _| t, |t, _| t);
        frame.insert("obs_precip", vec![f64::NAN; 600]).unwrap();
        let err = train_on_frame(frame, &light_config()).err().unwrap();
        assert!(matches!(err, AppError::InsufficientData { .. }), "got {}", err);
    }

    #[test]
    fn test_two_year_constant_bias_is_removed() {
        let n = 2 * 8760;
        // The forecast runs 2 °C warm; rain is rare enough to skip the amount stage.
        let frame = synthetic(
            n,
            200,
            |t, i| t + 2.0 + 0.3 * noise(i),
            |t, _| t,
        );
        let mut config = light_config();
        config.weather.point.max_depth = 4;
        let outcome = train_on_frame(frame, &config).unwrap();
        let overall = outcome.report.overall_skill().unwrap();
        assert!((overall.raw_mae - 2.0).abs() < 0.2, "raw MAE {}", overall.raw_mae);
        assert!(
            overall.raw_mae - overall.corrected_mae > 1.0,
            "corrected {} vs raw {}",
            overall.corrected_mae,
            overall.raw_mae
        );
        assert!(!outcome.report.precip.amount_stage_fitted);
    }

    #[test]
    fn test_lead_buckets_use_exact_match() {
        let frame = synthetic(2000, 4, |t, _| t + 1.0, |t, _| t);
        let outcome = train_on_frame(frame, &light_config()).unwrap();
        let buckets: Vec<Option<u32>> = outcome.report.lead_skill.iter().map(|s| s.lead_hours).collect();
        // 400 validation rows cycle through leads 1..=48, so each bucket has 8 or 9 rows.
        assert_eq!(buckets, vec![None]);

        let mut config = light_config();
        config.min_bucket_rows = 5;
        let frame = synthetic(2000, 4, |t, _| t + 1.0, |t, _| t);
        let outcome = train_on_frame(frame, &config).unwrap();
        let buckets: Vec<Option<u32>> = outcome.report.lead_skill.iter().map(|s| s.lead_hours).collect();
        assert_eq!(
            buckets,
            vec![Some(1), Some(3), Some(6), Some(12), Some(24), Some(48), None]
        );
        for s in &outcome.report.lead_skill {
            assert!(s.lead_hours.is_none() || s.rows >= 5);
        }
    }

    #[tokio::test]
    async fn test_train_and_persist_writes_nothing_on_abort() {
        let dir = std::env::temp_dir().join(format!("weather_mos_train_{}", uuid::Uuid::new_v4()));
        let store = ModelStore::new(&dir);
        let source = paired_samples(100);
        let result = train_and_persist(&source, &store, &light_config()).await;
        assert!(result.is_err());
        assert!(store.load::<WeatherCorrector>().unwrap_err().is_untrained());
    }

    #[tokio::test]
    async fn test_train_and_persist_writes_one_training_run() {
        let dir = std::env::temp_dir().join(format!("weather_mos_train_{}", uuid::Uuid::new_v4()));
        let store = ModelStore::new(&dir);
        let report = train_and_persist(&full_samples(500), &store, &light_config())
            .await
            .unwrap();
        assert_eq!(report.paired_rows, 500);

        let (weather, precip) = store
            .load_pair::<WeatherCorrector, PrecipitationCorrector>()
            .unwrap();
        assert_eq!(weather.training_run, precip.training_run);
        assert_ne!(weather.bundle_id, precip.bundle_id);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
