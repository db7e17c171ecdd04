//! Pinhole camera model converting pixels plus depth into metric 3D points.
//!
//! ```text
//! | fx  0 cx |
//! |  0 fy cy |
//! |  0  0  1 |
//! ```
//!
//! When the model is not calibrated, distances fall back to a flat
//! pixel-to-centimetre ratio. That estimate ignores depth entirely and is kept
//! as its own code path ([`CalibrationModel::pixel_distance_m`]).

use sensor_ingest::{DriverError, Intrinsics, Pixel};
use serde::Serialize;
use tracing::{info, warn};

/// Empirical ratio used by the uncalibrated fallback.
pub const PIXEL_TO_CM_RATIO: f64 = 0.18;
pub const DEFAULT_WORKING_DEPTH_M: f64 = 0.6;
pub const DEFAULT_FOV_DEG: f64 = 87.0;
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
/// Measured depths outside `(DEPTH_MIN_M, DEPTH_MAX_M)` are treated as missing.
pub const DEPTH_MIN_M: f64 = 0.05;
pub const DEPTH_MAX_M: f64 = 2.0;

/// Point in the camera frame, metres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn distance(&self, other: &Point3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Fallback optics used when the driver cannot report intrinsics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationDefaults {
    pub width: u32,
    pub height: u32,
    pub fov_deg: f64,
    pub working_depth_m: f64,
}

impl Default for CalibrationDefaults {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fov_deg: DEFAULT_FOV_DEG,
            working_depth_m: DEFAULT_WORKING_DEPTH_M,
        }
    }
}

/// Observer-facing snapshot of the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CalibrationSummary {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
    pub is_calibrated: bool,
}

#[derive(Clone, Debug)]
pub struct CalibrationModel {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
    dist_coeffs: [f64; 5],
    is_calibrated: bool,
    defaults: CalibrationDefaults,
}

impl CalibrationModel {
    /// An uncalibrated model. Distances use the pixel-ratio fallback until one of
    /// the calibration methods runs.
    pub fn new(defaults: CalibrationDefaults) -> Self {
        Self {
            fx: 0.0,
            fy: 0.0,
            cx: 0.0,
            cy: 0.0,
            width: 0,
            height: 0,
            dist_coeffs: [0.0; 5],
            is_calibrated: false,
            defaults,
        }
    }

    /// Adopt driver-reported intrinsics.
    ///
    /// Returns `false` when the driver failed or reported unusable values, in
    /// which case the model is synthesized from the configured field of view.
    pub fn calibrate_from_driver(&mut self, intrinsics: Result<Intrinsics, DriverError>) -> bool {
        let intrinsics = match intrinsics {
            Ok(intrinsics) if intrinsics_usable(&intrinsics) => intrinsics,
            Ok(intrinsics) => {
                warn!("driver reported unusable intrinsics {intrinsics:?}; synthesizing from FOV");
                self.apply_defaults();
                return false;
            }
            Err(err) => {
                warn!("driver calibration failed ({err}); synthesizing from FOV");
                self.apply_defaults();
                return false;
            }
        };

        self.fx = intrinsics.fx;
        self.fy = intrinsics.fy;
        self.cx = intrinsics.ppx;
        self.cy = intrinsics.ppy;
        self.width = intrinsics.width;
        self.height = intrinsics.height;
        self.dist_coeffs = intrinsics.coeffs;
        self.is_calibrated = true;
        info!(
            "calibrated from driver: {}x{}, f=({:.1}, {:.1}) px, c=({:.1}, {:.1})",
            self.width, self.height, self.fx, self.fy, self.cx, self.cy
        );
        true
    }

    /// Synthesize intrinsics from a horizontal field of view, assuming square
    /// pixels and a centred principal point: `fx = width / (2 tan(fov / 2))`.
    pub fn set_defaults(&mut self, width: u32, height: u32, fov_deg: f64) {
        let fx = width as f64 / (2.0 * (fov_deg.to_radians() / 2.0).tan());
        self.width = width;
        self.height = height;
        self.cx = width as f64 / 2.0;
        self.cy = height as f64 / 2.0;
        self.fx = fx;
        self.fy = fx;
        self.dist_coeffs = [0.0; 5];
        self.is_calibrated = true;
        info!("synthesized calibration: {width}x{height}, FOV {fov_deg} deg, f={fx:.1} px");
    }

    fn apply_defaults(&mut self) {
        let CalibrationDefaults {
            width,
            height,
            fov_deg,
            ..
        } = self.defaults;
        self.set_defaults(width, height, fov_deg);
    }

    pub fn is_calibrated(&self) -> bool {
        self.is_calibrated
    }

    pub fn default_depth(&self) -> f64 {
        self.defaults.working_depth_m
    }

    pub fn distortion(&self) -> &[f64; 5] {
        &self.dist_coeffs
    }

    /// Back-project a pixel: `X = (u - cx) Z / fx`, `Y = (v - cy) Z / fy`.
    ///
    /// Uses the default working depth when no measurement is supplied.
    pub fn pixel_to_3d(&self, u: f64, v: f64, depth_m: Option<f64>) -> Option<Point3> {
        if !self.is_calibrated {
            return None;
        }
        let z = depth_m.unwrap_or(self.defaults.working_depth_m);
        Some(Point3 {
            x: (u - self.cx) * z / self.fx,
            y: (v - self.cy) * z / self.fy,
            z,
        })
    }

    /// Forward-project a camera-frame point onto the image plane.
    pub fn project(&self, point: Point3) -> Option<(f64, f64)> {
        if !self.is_calibrated || point.z <= 0.0 {
            return None;
        }
        Some((
            point.x * self.fx / point.z + self.cx,
            point.y * self.fy / point.z + self.cy,
        ))
    }

    /// Metric distance between two pixels with optional per-point depths.
    pub fn distance_3d(
        &self,
        p1: Pixel,
        p2: Pixel,
        depth1: Option<f64>,
        depth2: Option<f64>,
    ) -> f64 {
        match (
            self.pixel_to_3d(p1.u, p1.v, depth1),
            self.pixel_to_3d(p2.u, p2.v, depth2),
        ) {
            (Some(a), Some(b)) => a.distance(&b),
            _ => Self::pixel_distance_m(p1, p2),
        }
    }

    /// Uncalibrated estimate: pixel distance scaled by [`PIXEL_TO_CM_RATIO`].
    pub fn pixel_distance_m(p1: Pixel, p2: Pixel) -> f64 {
        p1.distance(&p2) * PIXEL_TO_CM_RATIO / 100.0
    }

    pub fn camera_matrix(&self) -> Option<[[f64; 3]; 3]> {
        self.is_calibrated.then_some([
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ])
    }

    pub fn summary(&self) -> CalibrationSummary {
        CalibrationSummary {
            fx: self.fx,
            fy: self.fy,
            cx: self.cx,
            cy: self.cy,
            width: self.width,
            height: self.height,
            is_calibrated: self.is_calibrated,
        }
    }
}

fn intrinsics_usable(intrinsics: &Intrinsics) -> bool {
    [intrinsics.fx, intrinsics.fy, intrinsics.ppx, intrinsics.ppy]
        .iter()
        .all(|v| v.is_finite())
        && intrinsics.fx > 0.0
        && intrinsics.fy > 0.0
        && intrinsics.width > 0
        && intrinsics.height > 0
}

/// Keep a measured depth only inside the sensor's trusted range.
pub fn valid_depth(depth_m: Option<f64>) -> Option<f64> {
    depth_m.filter(|d| *d > DEPTH_MIN_M && *d < DEPTH_MAX_M)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_intrinsics() -> Intrinsics {
        Intrinsics {
            width: 1280,
            height: 720,
            fx: 900.0,
            fy: 910.0,
            ppx: 640.0,
            ppy: 360.0,
            coeffs: [0.1, 0.0, 0.0, 0.0, 0.0],
        }
    }

    fn calibrated() -> CalibrationModel {
        let mut model = CalibrationModel::new(CalibrationDefaults::default());
        assert!(model.calibrate_from_driver(Ok(driver_intrinsics())));
        model
    }

    #[test]
    fn driver_intrinsics_are_adopted() {
        let model = calibrated();
        let summary = model.summary();
        assert_eq!((summary.fx, summary.fy), (900.0, 910.0));
        assert_eq!((summary.cx, summary.cy), (640.0, 360.0));
        assert_eq!(model.distortion()[0], 0.1);
        assert!(summary.is_calibrated);
    }

    #[test]
    fn driver_failure_falls_back_to_fov() {
        let mut model = CalibrationModel::new(CalibrationDefaults::default());
        let ok = model.calibrate_from_driver(Err(DriverError::Unavailable {
            driver: "camera".into(),
        }));
        assert!(!ok);
        assert!(model.is_calibrated());
        let expected_fx = 1280.0 / (2.0 * (87.0_f64.to_radians() / 2.0).tan());
        let summary = model.summary();
        assert!((summary.fx - expected_fx).abs() < 1e-9);
        assert_eq!(summary.fx, summary.fy);
        assert_eq!((summary.cx, summary.cy), (640.0, 360.0));
    }

    #[test]
    fn unusable_intrinsics_fall_back() {
        let mut model = CalibrationModel::new(CalibrationDefaults::default());
        let mut bad = driver_intrinsics();
        bad.fx = 0.0;
        assert!(!model.calibrate_from_driver(Ok(bad)));
        assert!(model.summary().fx > 0.0);
    }

    #[test]
    fn uncalibrated_model_has_no_projection() {
        let model = CalibrationModel::new(CalibrationDefaults::default());
        assert!(model.pixel_to_3d(10.0, 10.0, Some(1.0)).is_none());
        assert!(model.camera_matrix().is_none());
    }

    #[test]
    fn pixel_to_3d_round_trips_through_projection() {
        let model = calibrated();
        for &(u, v) in &[(0.0, 0.0), (640.0, 360.0), (1279.5, 12.25), (33.0, 700.0)] {
            for &depth in &[0.06, 0.6, 1.9, 25.0] {
                let point = model.pixel_to_3d(u, v, Some(depth)).unwrap();
                assert_eq!(point.z, depth);
                let (pu, pv) = model.project(point).unwrap();
                assert!((pu - u).abs() < 1e-9, "u {u} -> {pu}");
                assert!((pv - v).abs() < 1e-9, "v {v} -> {pv}");
            }
        }
    }

    #[test]
    fn missing_depth_uses_working_distance() {
        let model = calibrated();
        let point = model.pixel_to_3d(740.0, 360.0, None).unwrap();
        assert_eq!(point.z, DEFAULT_WORKING_DEPTH_M);
        assert!((point.x - 100.0 * 0.6 / 900.0).abs() < 1e-12);
    }

    #[test]
    fn fallback_distance_is_pixel_ratio_formula() {
        let model = CalibrationModel::new(CalibrationDefaults::default());
        let (a, b) = (Pixel::new(100.0, 100.0), Pixel::new(400.0, 500.0));
        let expected = 500.0 * PIXEL_TO_CM_RATIO / 100.0;
        assert!((model.distance_3d(a, b, Some(0.4), Some(0.9)) - expected).abs() < 1e-12);
        assert_eq!(
            model.distance_3d(a, b, None, None),
            CalibrationModel::pixel_distance_m(a, b)
        );
    }

    #[test]
    fn calibrated_path_differs_from_fallback_when_depths_differ() {
        let model = calibrated();
        let (a, b) = (Pixel::new(640.0, 360.0), Pixel::new(700.0, 360.0));
        let metric = model.distance_3d(a, b, Some(0.4), Some(0.9));
        let fallback = CalibrationModel::pixel_distance_m(a, b);
        assert!((metric - fallback).abs() > 0.1);
        assert!(metric > 0.5);
    }

    #[test]
    fn depth_window_filters_outliers() {
        assert_eq!(valid_depth(Some(0.6)), Some(0.6));
        assert_eq!(valid_depth(Some(0.05)), None);
        assert_eq!(valid_depth(Some(2.5)), None);
        assert_eq!(valid_depth(None), None);
    }
}
