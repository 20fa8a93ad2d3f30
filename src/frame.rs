//! Time-indexed columnar table used for paired history, fresh forecasts and
//! engineered features.
//!
//! Columns are stored in a `BTreeMap`, so iteration order is always sorted by
//! name and two tables built from the same input are identical. Missing cells
//! are `NaN`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::errors::AppError;
use crate::helpers::MISSING;

/// Prefix of observation columns.
pub const OBS_PREFIX: &str = "obs_";
/// Lead time of the forecast issue, in hours.
pub const LEAD_HOURS: &str = "lead_hours";

#[derive(Debug, Clone, PartialEq)]
pub struct TimeFrame {
    index: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl TimeFrame {
    pub fn new(index: Vec<DateTime<Utc>>) -> Self {
        Self {
            index,
            columns: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    /// Insert or replace a column. The column must have one value per row.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), AppError> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(AppError::InvalidInput(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.index.len()
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Insert a column computed from a row-aligned iterator. Used by the
    /// feature builders, whose outputs are length-preserving by construction.
    pub(crate) fn put(&mut self, name: impl Into<String>, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.index.len());
        self.columns.insert(name.into(), values);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in sorted order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// True when the index is strictly increasing (no duplicates, ordered).
    pub fn is_strictly_increasing(&self) -> bool {
        self.index.windows(2).all(|w| w[0] < w[1])
    }

    /// New table holding only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> TimeFrame {
        TimeFrame {
            index: rows.iter().map(|&r| self.index[r]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), rows.iter().map(|&r| values[r]).collect()))
                .collect(),
        }
    }

    /// Build a column-major feature matrix with the given column order.
    ///
    /// Columns absent from the table come back as all-missing and are listed
    /// in the second element, so the caller decides how to treat them.
    pub fn to_matrix(&self, names: &[String]) -> (FeatureMatrix, Vec<String>) {
        let mut absent = Vec::new();
        let columns = names
            .iter()
            .map(|name| match self.columns.get(name) {
                Some(values) => values.clone(),
                None => {
                    absent.push(name.clone());
                    vec![MISSING; self.len()]
                }
            })
            .collect();
        (
            FeatureMatrix {
                names: names.to_vec(),
                columns,
                n_rows: self.len(),
            },
            absent,
        )
    }
}

/// Column-major numeric matrix handed to the estimators.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
}

impl FeatureMatrix {
    pub fn from_columns(names: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self, AppError> {
        if names.len() != columns.len() {
            return Err(AppError::InvalidInput(format!(
                "{} feature names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        let n_rows = columns.first().map_or(0, Vec::len);
        if let Some((name, col)) = names.iter().zip(&columns).find(|(_, c)| c.len() != n_rows) {
            return Err(AppError::InvalidInput(format!(
                "feature '{}' has {} rows, expected {}",
                name,
                col.len(),
                n_rows
            )));
        }
        Ok(Self {
            names,
            columns,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, feature: usize) -> &[f64] {
        &self.columns[feature]
    }

    pub fn value(&self, row: usize, feature: usize) -> f64 {
        self.columns[feature][row]
    }

    /// Replace every missing cell of the named columns with `fill`.
    pub fn fill_missing(&mut self, names: &[String], fill: f64) {
        for (name, col) in self.names.iter().zip(self.columns.iter_mut()) {
            if names.contains(name) {
                col.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = fill);
            }
        }
    }

    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| rows.iter().map(|&r| col[r]).collect())
                .collect(),
            n_rows: rows.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Window operations
// ---------------------------------------------------------------------------

/// Shift a series forward by `periods` rows; the first `periods` rows become
/// missing. `out[i] = values[i - periods]`.
pub fn shift(values: &[f64], periods: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= periods { values[i - periods] } else { MISSING })
        .collect()
}

/// Aggregation applied over a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rolling {
    Sum,
    Mean,
    Max,
}

/// Rolling aggregate over the `window` rows ending at each row (inclusive),
/// ignoring missing cells. A window with no present values yields missing
/// (minimum one sample).
pub fn rolling(values: &[f64], window: usize, agg: Rolling) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let present = values[start..=i].iter().copied().filter(|v| !v.is_nan());
            let (count, acc) = match agg {
                Rolling::Max => present.fold((0usize, f64::NEG_INFINITY), |(n, m), v| {
                    (n + 1, m.max(v))
                }),
                Rolling::Sum | Rolling::Mean => {
                    present.fold((0usize, 0.0), |(n, s), v| (n + 1, s + v))
                }
            };
            match (count, agg) {
                (0, _) => MISSING,
                (n, Rolling::Mean) => acc / n as f64,
                _ => acc,
            }
        })
        .collect()
}

/// Rolling aggregate over the `window` rows strictly before each row.
pub fn trailing(values: &[f64], window: usize, agg: Rolling) -> Vec<f64> {
    rolling(&shift(values, 1), window, agg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn hourly(n: usize) -> Vec<DateTime<Utc>> {
        let start = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        (0..n).map(|i| start + Duration::hours(i as i64)).collect()
    }

    fn same(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| (x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-12)
    }

    #[test]
    fn test_shift() {
        let out = shift(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(same(&out, &[f64::NAN, f64::NAN, 1.0, 2.0]));
    }

    #[test]
    fn test_shift_longer_than_series() {
        let out = shift(&[1.0, 2.0], 5);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_rolling_sum_min_periods_one() {
        let out = rolling(&[1.0, 2.0, 3.0, 4.0], 3, Rolling::Sum);
        assert!(same(&out, &[1.0, 3.0, 6.0, 9.0]));
    }

    #[test]
    fn test_rolling_skips_missing() {
        let out = rolling(&[f64::NAN, 2.0, f64::NAN, 4.0], 2, Rolling::Mean);
        assert!(same(&out, &[f64::NAN, 2.0, 2.0, 4.0]));
        let out = rolling(&[f64::NAN, 2.0, f64::NAN, 4.0], 2, Rolling::Max);
        assert!(same(&out, &[f64::NAN, 2.0, 2.0, 4.0]));
    }

    #[test]
    fn test_trailing_excludes_current_row() {
        let out = trailing(&[1.0, 2.0, 3.0, 100.0], 2, Rolling::Max);
        assert!(same(&out, &[f64::NAN, 1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_insert_rejects_wrong_length() {
        let mut frame = TimeFrame::new(hourly(3));
        assert!(frame.insert("a", vec![1.0, 2.0]).is_err());
        assert!(frame.insert("a", vec![1.0, 2.0, 3.0]).is_ok());
    }

    #[test]
    fn test_column_names_sorted() {
        let mut frame = TimeFrame::new(hourly(1));
        frame.insert("zeta", vec![1.0]).unwrap();
        frame.insert("alpha", vec![1.0]).unwrap();
        frame.insert("mid", vec![1.0]).unwrap();
        let names: Vec<&str> = frame.column_names().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_to_matrix_reports_absent_columns() {
        let mut frame = TimeFrame::new(hourly(2));
        frame.insert("a", vec![1.0, 2.0]).unwrap();
        let (m, absent) = frame.to_matrix(&["a".to_string(), "c".to_string()]);
        assert_eq!(absent, vec!["c".to_string()]);
        assert_eq!(m.n_features(), 2);
        assert_eq!(m.value(1, 0), 2.0);
        assert!(m.value(0, 1).is_nan());
    }

    #[test]
    fn test_fill_missing() {
        let mut m = FeatureMatrix::from_columns(
            vec!["a".into(), "b".into()],
            vec![vec![f64::NAN, 1.0], vec![f64::NAN, 2.0]],
        )
        .unwrap();
        m.fill_missing(&["b".to_string()], 0.0);
        assert!(m.value(0, 0).is_nan());
        assert_eq!(m.value(0, 1), 0.0);
    }

    #[test]
    fn test_select_rows_keeps_order() {
        let mut frame = TimeFrame::new(hourly(3));
        frame.insert("a", vec![10.0, 20.0, 30.0]).unwrap();
        let sub = frame.select_rows(&[2, 0]);
        assert_eq!(sub.column("a").unwrap(), &[30.0, 10.0]);
        assert_eq!(sub.index()[0], frame.index()[2]);
    }

    #[test]
    fn test_strictly_increasing() {
        let mut idx = hourly(3);
        assert!(TimeFrame::new(idx.clone()).is_strictly_increasing());
        idx[2] = idx[1];
        assert!(!TimeFrame::new(idx).is_strictly_increasing());
    }

    #[test]
    fn test_matrix_rejects_ragged_columns() {
        let res = FeatureMatrix::from_columns(
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 2.0], vec![1.0]],
        );
        assert!(res.is_err());
    }
}
