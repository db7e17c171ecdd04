use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("safety distances must be positive and finite (danger {danger_m} m, clear {clear_m} m)")]
    NonPositiveDistance { danger_m: f64, clear_m: f64 },
    #[error("danger distance {danger_m} m must be below clear distance {clear_m} m")]
    ThresholdOrder { danger_m: f64, clear_m: f64 },
    #[error("slowdown factor {0} must lie in (0, 1]")]
    SlowdownFactor(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum BusError {
    #[error("the {0} writer handle has already been taken")]
    WriterTaken(&'static str),
    #[error("camera not ready within {0:?}")]
    CameraReadyTimeout(Duration),
    #[error("stop requested while waiting for the camera")]
    Stopped,
}
