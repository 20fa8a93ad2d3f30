//! MOS correction engine: learns site-specific corrections of NWP forecasts
//! from paired forecast/observation history and applies them to fresh
//! forecast windows.

pub mod boosting;
pub mod bundle;
pub mod calibration;
pub mod config;
pub mod db;
pub mod errors;
pub mod features;
pub mod frame;
pub mod helpers;
pub mod metrics;
pub mod models;
pub mod predict;
pub mod services;
pub mod train;
