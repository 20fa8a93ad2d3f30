//! Paired forecast/observation history.
//!
//! For each valid time, exactly one forecast issue is kept: the one with the
//! greatest [`IssueTime`]. Live issues always outrank backfilled ones, and the
//! archive fallback (reanalysis copied into the forecast table) only fills
//! hours nothing else covers. Every paired row keeps its [`Provenance`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::db::queries;
use crate::errors::AppError;
use crate::frame::{TimeFrame, LEAD_HOURS};
use crate::helpers::{opt_i32_to_f64, MISSING};

/// `fetched_at` marker for reanalysis rows copied in as stand-in forecasts.
pub const ARCHIVE_FALLBACK_MARKER: &str = "backfill-archive";

/// Forecast columns in the paired table, in [`ForecastValues::as_array`] order.
pub const FORECAST_COLUMNS: [&str; 13] = [
    "fcst_temp",
    "fcst_dewpoint",
    "fcst_humidity",
    "fcst_pressure",
    "fcst_surface_pressure",
    "fcst_wind_speed",
    "fcst_wind_dir",
    "fcst_wind_gust",
    "fcst_precip",
    "fcst_precip_prob",
    "fcst_cloud",
    "fcst_cape",
    "fcst_visibility",
];

/// Observation columns in the paired table, in [`ObservationValues::as_array`] order.
pub const OBSERVATION_COLUMNS: [&str; 8] = [
    "obs_temp",
    "obs_dewpoint",
    "obs_humidity",
    "obs_pressure",
    "obs_wind_speed",
    "obs_wind_dir",
    "obs_precip",
    "obs_cloud",
];

/// When a forecast was issued.
///
/// Variant order is the ranking used to pick the latest issue:
/// `ArchiveFallback < Backfill(tag) < Issued(time)`, tags compared lexically
/// and timestamps chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueTime {
    ArchiveFallback,
    Backfill(String),
    Issued(DateTime<Utc>),
}

impl IssueTime {
    /// Parse a stored `fetched_at` value. Anything that is neither the
    /// archive marker nor a timestamp is a backfill tag.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == ARCHIVE_FALLBACK_MARKER {
            return IssueTime::ArchiveFallback;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return IssueTime::Issued(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return IssueTime::Issued(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }
        IssueTime::Backfill(raw.to_string())
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            IssueTime::Issued(_) => Provenance::Live,
            IssueTime::Backfill(_) => Provenance::Backfill,
            IssueTime::ArchiveFallback => Provenance::ArchiveFallback,
        }
    }
}

/// Where the forecast side of a paired row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// A forecast issued before its valid time.
    Live,
    /// A historical-forecast backfill.
    Backfill,
    /// Reanalysis copied in place of a forecast. Degraded data.
    ArchiveFallback,
}

/// NWP values for one valid time. Missing values are `NaN`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastValues {
    pub temp: f64,
    pub dewpoint: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub surface_pressure: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,
    pub wind_gust: f64,
    pub precip: f64,
    pub precip_prob: f64,
    pub cloud: f64,
    pub cape: f64,
    pub visibility: f64,
}

impl ForecastValues {
    pub fn missing() -> Self {
        Self {
            temp: MISSING,
            dewpoint: MISSING,
            humidity: MISSING,
            pressure: MISSING,
            surface_pressure: MISSING,
            wind_speed: MISSING,
            wind_dir: MISSING,
            wind_gust: MISSING,
            precip: MISSING,
            precip_prob: MISSING,
            cloud: MISSING,
            cape: MISSING,
            visibility: MISSING,
        }
    }

    pub fn as_array(&self) -> [f64; 13] {
        [
            self.temp,
            self.dewpoint,
            self.humidity,
            self.pressure,
            self.surface_pressure,
            self.wind_speed,
            self.wind_dir,
            self.wind_gust,
            self.precip,
            self.precip_prob,
            self.cloud,
            self.cape,
            self.visibility,
        ]
    }
}

/// Realised values for one hour. Missing values are `NaN`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationValues {
    pub temp: f64,
    pub dewpoint: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,
    pub precip: f64,
    pub cloud: f64,
}

impl ObservationValues {
    pub fn missing() -> Self {
        Self {
            temp: MISSING,
            dewpoint: MISSING,
            humidity: MISSING,
            pressure: MISSING,
            wind_speed: MISSING,
            wind_dir: MISSING,
            precip: MISSING,
            cloud: MISSING,
        }
    }

    pub fn as_array(&self) -> [f64; 8] {
        [
            self.temp,
            self.dewpoint,
            self.humidity,
            self.pressure,
            self.wind_speed,
            self.wind_dir,
            self.precip,
            self.cloud,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastIssue {
    pub fetched_at: IssueTime,
    pub valid_time: DateTime<Utc>,
    pub source: String,
    /// `None` for backfilled rows.
    pub lead_hours: Option<i32>,
    pub values: ForecastValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSample {
    pub time: DateTime<Utc>,
    pub values: ObservationValues,
}

/// One valid time joined to its latest forecast issue and its observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedSample {
    pub valid_time: DateTime<Utc>,
    pub issue: IssueTime,
    pub lead_hours: Option<i32>,
    pub forecast: ForecastValues,
    pub observation: ObservationValues,
}

impl PairedSample {
    pub fn provenance(&self) -> Provenance {
        self.issue.provenance()
    }
}

/// Inner-join the latest issue per valid time (for `source`) with the
/// observation at that time. One row per valid time, ascending.
pub fn pair_latest(
    issues: impl IntoIterator<Item = ForecastIssue>,
    observations: &[ObservationSample],
    source: &str,
) -> Vec<PairedSample> {
    let mut latest: BTreeMap<DateTime<Utc>, ForecastIssue> = BTreeMap::new();
    for issue in issues.into_iter().filter(|i| i.source == source) {
        match latest.get(&issue.valid_time) {
            Some(current) if current.fetched_at >= issue.fetched_at => {}
            _ => {
                latest.insert(issue.valid_time, issue);
            }
        }
    }

    let mut obs_by_time: BTreeMap<DateTime<Utc>, &ObservationSample> = BTreeMap::new();
    for obs in observations {
        obs_by_time.entry(obs.time).or_insert(obs);
    }

    latest
        .into_values()
        .filter_map(|issue| {
            obs_by_time.get(&issue.valid_time).map(|obs| PairedSample {
                valid_time: issue.valid_time,
                issue: issue.fetched_at,
                lead_hours: issue.lead_hours,
                forecast: issue.values,
                observation: obs.values,
            })
        })
        .collect()
}

/// Row counts per provenance.
pub fn provenance_counts(samples: &[PairedSample]) -> BTreeMap<Provenance, usize> {
    let mut counts = BTreeMap::new();
    for s in samples {
        *counts.entry(s.provenance()).or_insert(0) += 1;
    }
    counts
}

/// Convert paired samples to the time-indexed table the feature builder
/// consumes: `obs_*`, `fcst_*` and `lead_hours` columns.
pub fn paired_frame(samples: &[PairedSample]) -> Result<TimeFrame, AppError> {
    let mut frame = TimeFrame::new(samples.iter().map(|s| s.valid_time).collect());
    if !frame.is_strictly_increasing() {
        return Err(AppError::InvalidInput(
            "paired samples must be strictly ordered by valid time".to_string(),
        ));
    }
    for (i, name) in FORECAST_COLUMNS.iter().enumerate() {
        frame.insert(*name, samples.iter().map(|s| s.forecast.as_array()[i]).collect())?;
    }
    for (i, name) in OBSERVATION_COLUMNS.iter().enumerate() {
        frame.insert(*name, samples.iter().map(|s| s.observation.as_array()[i]).collect())?;
    }
    frame.insert(LEAD_HOURS, samples.iter().map(|s| opt_i32_to_f64(s.lead_hours)).collect())?;
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Supplies the full paired history, ordered by valid time ascending.
#[allow(async_fn_in_trait)]
pub trait PairedSampleSource {
    async fn load_paired(&self) -> Result<Vec<PairedSample>, AppError>;
}

/// In-memory source, used by tests and offline tooling.
impl PairedSampleSource for Vec<PairedSample> {
    async fn load_paired(&self) -> Result<Vec<PairedSample>, AppError> {
        let mut samples = self.clone();
        samples.sort_by_key(|s| s.valid_time);
        Ok(samples)
    }
}

/// Postgres-backed source reading the `forecasts` and `observations` tables.
#[derive(Debug, Clone)]
pub struct PgPairedSource {
    pool: PgPool,
    source: String,
}

impl PgPairedSource {
    pub fn new(pool: PgPool, source: impl Into<String>) -> Self {
        Self {
            pool,
            source: source.into(),
        }
    }
}

impl PairedSampleSource for PgPairedSource {
    async fn load_paired(&self) -> Result<Vec<PairedSample>, AppError> {
        let issues = queries::load_forecast_issues(&self.pool, &self.source).await?;
        let observations: Vec<ObservationSample> = queries::load_observations(&self.pool)
            .await?
            .into_iter()
            .map(ObservationSample::from)
            .collect();
        let n_issues = issues.len();
        let paired = pair_latest(
            issues.into_iter().map(ForecastIssue::from),
            &observations,
            &self.source,
        );
        tracing::info!(
            "Paired {} valid times from {} forecast issues ({}) and {} observations",
            paired.len(),
            n_issues,
            self.source,
            observations.len()
        );
        Ok(paired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(h: i64) -> DateTime<Utc> {
        "2025-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap() + Duration::hours(h)
    }

    fn issue(valid_h: i64, fetched_at: &str, temp: f64) -> ForecastIssue {
        ForecastIssue {
            fetched_at: IssueTime::parse(fetched_at),
            valid_time: t(valid_h),
            source: "best_match".to_string(),
            lead_hours: Some(6),
            values: ForecastValues {
                temp,
                ..ForecastValues::missing()
            },
        }
    }

    fn obs(h: i64, temp: f64) -> ObservationSample {
        ObservationSample {
            time: t(h),
            values: ObservationValues {
                temp,
                ..ObservationValues::missing()
            },
        }
    }

    #[test]
    fn test_issue_time_parse() {
        assert_eq!(IssueTime::parse("backfill-archive"), IssueTime::ArchiveFallback);
        assert_eq!(IssueTime::parse("backfill"), IssueTime::Backfill("backfill".into()));
        assert_eq!(
            IssueTime::parse("2025-03-01T06:00:00+00:00"),
            IssueTime::Issued(t(6))
        );
        assert_eq!(IssueTime::parse("2025-03-01 06:00:00"), IssueTime::Issued(t(6)));
    }

    #[test]
    fn test_issue_time_ordering() {
        let archive = IssueTime::ArchiveFallback;
        let backfill = IssueTime::parse("backfill");
        let early = IssueTime::parse("2020-01-01T00:00:00Z");
        let late = IssueTime::parse("2025-01-01T00:00:00Z");
        assert!(archive < backfill);
        assert!(backfill < early, "live issues outrank backfill tags");
        assert!(early < late);
    }

    #[test]
    fn test_latest_issue_wins() {
        let issues = vec![
            issue(1, "2025-02-28T18:00:00Z", 10.0),
            issue(1, "2025-03-01T00:00:00Z", 11.0),
            issue(1, "2025-02-28T12:00:00Z", 9.0),
        ];
        let paired = pair_latest(issues, &[obs(1, 12.0)], "best_match");
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].forecast.temp, 11.0);
        assert_eq!(paired[0].provenance(), Provenance::Live);
    }

    #[test]
    fn test_backfill_only_when_no_live_issue() {
        let issues = vec![
            issue(1, "backfill", 1.0),
            issue(1, "2025-02-28T18:00:00Z", 2.0),
            issue(2, "backfill", 3.0),
            issue(2, "backfill-archive", 4.0),
            issue(3, "backfill-archive", 5.0),
        ];
        let observations = vec![obs(1, 0.0), obs(2, 0.0), obs(3, 0.0)];
        let paired = pair_latest(issues, &observations, "best_match");
        let temps: Vec<f64> = paired.iter().map(|p| p.forecast.temp).collect();
        assert_eq!(temps, vec![2.0, 3.0, 5.0]);
        let provenance: Vec<Provenance> = paired.iter().map(|p| p.provenance()).collect();
        assert_eq!(
            provenance,
            vec![Provenance::Live, Provenance::Backfill, Provenance::ArchiveFallback]
        );
    }

    #[test]
    fn test_each_valid_time_once_and_ascending() {
        let issues = vec![
            issue(3, "2025-03-01T00:00:00Z", 1.0),
            issue(1, "2025-03-01T00:00:00Z", 1.0),
            issue(2, "2025-03-01T00:00:00Z", 1.0),
            issue(1, "2025-03-01T01:00:00Z", 2.0),
        ];
        let observations = vec![obs(1, 0.0), obs(2, 0.0), obs(3, 0.0)];
        let paired = pair_latest(issues, &observations, "best_match");
        let times: Vec<DateTime<Utc>> = paired.iter().map(|p| p.valid_time).collect();
        assert_eq!(times, vec![t(1), t(2), t(3)]);
    }

    #[test]
    fn test_inner_join_and_source_filter() {
        let mut other = issue(2, "2025-03-01T00:00:00Z", 7.0);
        other.source = "ecmwf".to_string();
        let issues = vec![issue(1, "2025-03-01T00:00:00Z", 1.0), other, issue(5, "2025-03-01T00:00:00Z", 1.0)];
        // Hour 5 has no observation, hour 2 only has another source.
        let observations = vec![obs(1, 0.0), obs(2, 0.0)];
        let paired = pair_latest(issues, &observations, "best_match");
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].valid_time, t(1));
    }

    #[test]
    fn test_paired_frame_columns() {
        let paired = pair_latest(
            vec![issue(1, "2025-03-01T00:00:00Z", 10.0), issue(2, "backfill", 11.0)],
            &[obs(1, 12.0), obs(2, 13.0)],
            "best_match",
        );
        let frame = paired_frame(&paired).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column("fcst_temp").unwrap(), &[10.0, 11.0]);
        assert_eq!(frame.column("obs_temp").unwrap(), &[12.0, 13.0]);
        assert_eq!(frame.column(LEAD_HOURS).unwrap(), &[6.0, 6.0]);
        assert!(frame.column("obs_precip").unwrap().iter().all(|v| v.is_nan()));
        assert_eq!(frame.column_names().count(), 13 + 8 + 1);
    }

    #[test]
    fn test_provenance_counts() {
        let paired = pair_latest(
            vec![issue(1, "2025-03-01T00:00:00Z", 1.0), issue(2, "backfill-archive", 1.0)],
            &[obs(1, 0.0), obs(2, 0.0)],
            "best_match",
        );
        let counts = provenance_counts(&paired);
        assert_eq!(counts.get(&Provenance::Live), Some(&1));
        assert_eq!(counts.get(&Provenance::ArchiveFallback), Some(&1));
        assert_eq!(counts.get(&Provenance::Backfill), None);
    }

    #[tokio::test]
    async fn test_vec_source_orders_by_valid_time() {
        let mut samples = pair_latest(
            vec![issue(1, "2025-03-01T00:00:00Z", 1.0), issue(2, "2025-03-01T00:00:00Z", 2.0)],
            &[obs(1, 0.0), obs(2, 0.0)],
            "best_match",
        );
        samples.reverse();
        let loaded = samples.load_paired().await.unwrap();
        assert_eq!(loaded[0].valid_time, t(1));
        assert_eq!(loaded[1].valid_time, t(2));
    }
}
