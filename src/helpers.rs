//! Shared numeric helpers.
//!
//! Missing values travel through the engine as `f64::NAN`, the same way a
//! missing cell does in the stored tables. Decimal conversions cover the
//! NUMERIC columns read from Postgres and the presentation rounding applied
//! to prediction records.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Missing-value marker used in feature and label columns.
pub const MISSING: f64 = f64::NAN;

/// Round to `dp` decimal places using banker's rounding (midpoint to even).
///
/// Non-finite inputs are reported and mapped to 0, matching how the rest of
/// the service treats unrepresentable values at the presentation boundary.
pub(crate) fn round_dp(v: f64, dp: u32) -> f64 {
    if !v.is_finite() {
        tracing::warn!("round_dp received non-finite value {}, defaulting to 0", v);
        return 0.0;
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp(dp))
        .and_then(|d| d.to_f64())
        .unwrap_or(v)
}

/// Convert an optional NUMERIC column value into the engine's
/// numeric-or-missing representation.
pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> f64 {
    d.and_then(|v| v.to_f64()).unwrap_or(MISSING)
}

/// Convert an optional integer column into numeric-or-missing.
pub(crate) fn opt_i32_to_f64(v: Option<i32>) -> f64 {
    v.map(f64::from).unwrap_or(MISSING)
}

/// Mean of the finite values, `None` when there are none.
pub(crate) fn finite_mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}
