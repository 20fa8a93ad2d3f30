//! Feature engineering for forecast correction.
//!
//! Every step is a pure function of the input table plus fixed lookback
//! windows. Forecast values at the target hour are legitimately known in
//! advance; observations are only ever read from strictly earlier hours.
//!
//! At serving time no observations exist for the forecast window. The caller
//! runs [`apply_observation_proxy`] first, which copies each forecast value
//! into the matching `obs_*` column. Lag, rolling and bias features computed
//! from those placeholders are systematically optimistic (the running bias
//! collapses to zero) until real observations are backfilled. Training data
//! never goes through the proxy.

use chrono::{Datelike, Timelike};
use std::f64::consts::PI;

use crate::frame::{shift, trailing, Rolling, TimeFrame, LEAD_HOURS, OBS_PREFIX};
use crate::helpers::MISSING;

/// Lags (hours) applied to observed precipitation and temperature.
pub const OBS_LAGS_H: [usize; 6] = [1, 2, 3, 6, 12, 24];
/// Trailing windows (hours) for observed precipitation sums and maxima.
pub const PRECIP_WINDOWS_H: [usize; 3] = [6, 12, 24];
/// Tendency windows (hours) for pressure, temperature and humidity.
pub const TENDENCY_WINDOWS_H: [usize; 4] = [3, 6, 12, 24];
/// Change windows (hours) for the wind components.
pub const WIND_CHANGE_WINDOWS_H: [usize; 2] = [3, 6];

/// Observation columns that get a same-hour forecast placeholder at serving
/// time, paired with their forecast source column.
pub const OBSERVATION_PROXIES: [(&str, &str); 8] = [
    ("obs_temp", "fcst_temp"),
    ("obs_precip", "fcst_precip"),
    ("obs_humidity", "fcst_humidity"),
    ("obs_pressure", "fcst_pressure"),
    ("obs_wind_speed", "fcst_wind_speed"),
    ("obs_wind_dir", "fcst_wind_dir"),
    ("obs_dewpoint", "fcst_dewpoint"),
    ("obs_cloud", "fcst_cloud"),
];

/// Cyclical time encodings: hour of day (period 24) and day of year
/// (period 365.25) as sine/cosine pairs, plus the raw month.
pub fn add_temporal_features(frame: &mut TimeFrame) {
    let idx = frame.index();
    let hour: Vec<f64> = idx.iter().map(|t| f64::from(t.hour())).collect();
    let doy: Vec<f64> = idx.iter().map(|t| f64::from(t.ordinal())).collect();
    let month: Vec<f64> = idx.iter().map(|t| f64::from(t.month())).collect();

    let cyc = |v: &[f64], period: f64, f: fn(f64) -> f64| -> Vec<f64> {
        v.iter().map(|x| f(2.0 * PI * x / period)).collect()
    };
    let hour_sin = cyc(&hour, 24.0, f64::sin);
    let hour_cos = cyc(&hour, 24.0, f64::cos);
    let doy_sin = cyc(&doy, 365.25, f64::sin);
    let doy_cos = cyc(&doy, 365.25, f64::cos);

    frame.put("hour_sin", hour_sin);
    frame.put("hour_cos", hour_cos);
    frame.put("doy_sin", doy_sin);
    frame.put("doy_cos", doy_cos);
    frame.put("month", month);
}

/// Gust factor; 1.0 whenever the ratio is undefined (calm wind, missing gust).
pub fn gust_ratio(gust: f64, speed: f64) -> f64 {
    if speed == 0.0 {
        return 1.0;
    }
    let ratio = gust / speed;
    if ratio.is_finite() {
        ratio
    } else {
        1.0
    }
}

/// Wind vector from speed and meteorological "from" direction in degrees.
pub fn wind_components(speed: f64, direction_deg: f64) -> (f64, f64) {
    let rad = direction_deg.to_radians();
    (-speed * rad.sin(), -speed * rad.cos())
}

/// Dewpoint depression, wind u/v components and gust ratio.
pub fn add_derived_meteo(frame: &mut TimeFrame) {
    let depression = match (frame.column("fcst_temp"), frame.column("fcst_dewpoint")) {
        (Some(t), Some(td)) => Some(t.iter().zip(td).map(|(a, b)| a - b).collect::<Vec<f64>>()),
        _ => None,
    };
    if let Some(dd) = depression {
        frame.put("dewpoint_depression", dd);
    }

    let components = match (frame.column("fcst_wind_speed"), frame.column("fcst_wind_dir")) {
        (Some(speed), Some(dir)) => Some(
            speed
                .iter()
                .zip(dir)
                .map(|(&s, &d)| wind_components(s, d))
                .unzip::<f64, f64, Vec<f64>, Vec<f64>>(),
        ),
        _ => None,
    };
    if let Some((u, v)) = components {
        frame.put("wind_u", u);
        frame.put("wind_v", v);
    }

    let ratio = frame.column("fcst_wind_speed").map(|speed| {
        let gust = frame.column("fcst_wind_gust");
        speed
            .iter()
            .enumerate()
            .map(|(i, &s)| gust_ratio(gust.map_or(MISSING, |g| g[i]), s))
            .collect::<Vec<f64>>()
    });
    if let Some(ratio) = ratio {
        frame.put("gust_ratio", ratio);
    }
}

fn difference(values: &[f64], periods: usize) -> Vec<f64> {
    values
        .iter()
        .zip(shift(values, periods))
        .map(|(now, before)| now - before)
        .collect()
}

/// Signed change of forecast pressure, temperature, humidity and wind
/// components over the preceding hours. Frontal passages show up here.
pub fn add_tendency_features(frame: &mut TimeFrame) {
    for (var, col) in [
        ("pressure", "fcst_pressure"),
        ("temp", "fcst_temp"),
        ("humidity", "fcst_humidity"),
    ] {
        let Some(values) = frame.column(col).map(<[f64]>::to_vec) else {
            tracing::debug!("Tendency features skipped: no '{}' column", col);
            continue;
        };
        for window in TENDENCY_WINDOWS_H {
            frame.put(format!("{}_tend_{}h", var, window), difference(&values, window));
        }
    }

    for comp in ["wind_u", "wind_v"] {
        let Some(values) = frame.column(comp).map(<[f64]>::to_vec) else {
            continue;
        };
        for window in WIND_CHANGE_WINDOWS_H {
            frame.put(format!("{}_change_{}h", comp, window), difference(&values, window));
        }
    }
}

/// Recently observed conditions: lagged precipitation and temperature, and
/// trailing precipitation sums/maxima over the hours before each row.
pub fn add_lag_features(frame: &mut TimeFrame) {
    let precip = frame.column("obs_precip").map(<[f64]>::to_vec);
    let temp = frame.column("obs_temp").map(<[f64]>::to_vec);

    for lag in OBS_LAGS_H {
        if let Some(p) = &precip {
            frame.put(format!("obs_precip_lag_{}h", lag), shift(p, lag));
        }
        if let Some(t) = &temp {
            frame.put(format!("obs_temp_lag_{}h", lag), shift(t, lag));
        }
    }

    if let Some(p) = &precip {
        for window in PRECIP_WINDOWS_H {
            frame.put(
                format!("obs_precip_roll_{}h_sum", window),
                trailing(p, window, Rolling::Sum),
            );
            frame.put(
                format!("obs_precip_roll_{}h_max", window),
                trailing(p, window, Rolling::Max),
            );
        }
    }
}

/// Running NWP error (observation minus forecast) over the preceding hours.
pub fn add_nwp_bias_features(frame: &mut TimeFrame) {
    if let Some(error) = forecast_error(frame, "obs_temp", "fcst_temp") {
        frame.put("nwp_temp_bias_24h", trailing(&error, 24, Rolling::Mean));
        frame.put("nwp_temp_bias_72h", trailing(&error, 72, Rolling::Mean));
    }
    if let Some(error) = forecast_error(frame, "obs_precip", "fcst_precip") {
        frame.put("nwp_precip_bias_24h", trailing(&error, 24, Rolling::Mean));
    }
}

fn forecast_error(frame: &TimeFrame, obs_col: &str, fcst_col: &str) -> Option<Vec<f64>> {
    let obs = frame.column(obs_col)?;
    let fcst = frame.column(fcst_col)?;
    Some(obs.iter().zip(fcst).map(|(o, f)| o - f).collect())
}

/// Apply all feature steps in order.
pub fn build_feature_set(frame: &mut TimeFrame) {
    add_temporal_features(frame);
    add_derived_meteo(frame);
    add_tendency_features(frame);
    add_lag_features(frame);
    add_nwp_bias_features(frame);
}

/// Fill each `obs_*` column with the same-hour forecast value, for serving
/// windows where observations do not exist yet.
pub fn apply_observation_proxy(frame: &mut TimeFrame) {
    for (obs_col, fcst_col) in OBSERVATION_PROXIES {
        if let Some(values) = frame.column(fcst_col).map(<[f64]>::to_vec) {
            frame.put(obs_col, values);
        }
    }
}

fn is_history_derived(name: &str) -> bool {
    name.contains("lag_") || name.contains("roll_") || name.contains("bias_")
}

/// Columns usable as model inputs, sorted.
///
/// Raw observations are labels and are excluded; the lag/rolling/bias
/// columns derived from them are kept. `lead_hours` is always a feature.
pub fn feature_columns(frame: &TimeFrame) -> Vec<String> {
    let mut names: Vec<String> = frame
        .column_names()
        .filter(|name| is_history_derived(name) || !name.starts_with(OBS_PREFIX))
        .map(str::to_string)
        .collect();
    if !names.iter().any(|n| n == LEAD_HOURS) {
        names.push(LEAD_HOURS.to_string());
    }
    names.sort();
    names
}
