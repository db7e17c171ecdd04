//! Observer snapshot assembled from the shared region.

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

use crate::{
    arbiter::{SafetyState, SafetyThresholds},
    bus::SharedRegion,
};

/// Distances at or above this (metres) are reported as unknown.
const REPORTABLE_DISTANCE_M: f64 = 100.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub is_calibrated: bool,
    pub resolution: String,
    /// `None` until a focal length is known.
    pub fx: Option<f64>,
    pub fy: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: SafetyState,
    pub hand_detected: bool,
    pub hand_distance_cm: Option<f64>,
    pub robot_paused: bool,
    pub progress: f64,
    pub in_workspace: bool,
    pub is_slowdown: bool,
    pub calibration: CalibrationStatus,
    pub aruco_marker_id: i32,
    pub aruco_detected: u32,
    pub workspace_defined: bool,
    #[serde(serialize_with = "millis_time")]
    pub timestamp: DateTime<Local>,
}

fn millis_time<S: Serializer>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format("%H:%M:%S%.3f"))
}

fn round_focal(f: f64) -> Option<f64> {
    (f > 0.0).then(|| (f * 10.0).round() / 10.0)
}

impl StatusSnapshot {
    /// `resolution` is reported until perception publishes its calibration.
    pub fn from_region(
        region: &SharedRegion,
        thresholds: &SafetyThresholds,
        marker_id: i32,
        resolution: (u32, u32),
    ) -> Self {
        let obs = region.observation();
        let status = if obs.hand_detected {
            thresholds.classify(obs.distance_m)
        } else {
            SafetyState::Safe
        };
        let hand_distance_cm = (obs.hand_detected && obs.distance_m < REPORTABLE_DISTANCE_M)
            .then(|| (obs.distance_m * 1000.0).round() / 10.0);

        let calibration = region.calibration();
        let (width, height) = if calibration.width > 0 && calibration.height > 0 {
            (calibration.width, calibration.height)
        } else {
            resolution
        };

        Self {
            status,
            hand_detected: obs.hand_detected,
            hand_distance_cm,
            robot_paused: region.robot_paused(),
            progress: (region.progress_percent() * 10.0).round() / 10.0,
            in_workspace: obs.hand_in_zone,
            is_slowdown: obs.slowdown,
            calibration: CalibrationStatus {
                is_calibrated: calibration.is_calibrated,
                resolution: format!("{width}x{height}"),
                fx: round_focal(calibration.fx),
                fy: round_focal(calibration.fy),
            },
            aruco_marker_id: marker_id,
            aruco_detected: region.marker_count(),
            workspace_defined: region.zone_defined(),
            timestamp: Local::now(),
        }
    }

    /// One-line human summary. Excludes the timestamp so consecutive
    /// identical states compare equal.
    pub fn console_line(&self) -> String {
        let distance = match self.hand_distance_cm {
            Some(cm) => format!("{cm:.1} cm"),
            None => "--".to_string(),
        };
        let mut line = format!(
            "[{}] hand {} | progress {:.1}%",
            self.status.as_str(),
            distance,
            self.progress
        );
        if self.robot_paused {
            line.push_str(" | PAUSED");
        }
        if self.workspace_defined {
            line.push_str(if self.in_workspace {
                " | zone: in"
            } else {
                " | zone: out"
            });
        } else {
            line.push_str(&format!(" | zone: {}/4 markers", self.aruco_detected));
        }
        if self.is_slowdown {
            line.push_str(" (slowdown)");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sensor_ingest::Pixel;

    use super::*;
    use crate::{bus::CoordinationBus, calibration::CalibrationSummary, observation::SafetyObservation};

    #[test]
    fn idle_region_reports_safe_without_distance() {
        let bus = CoordinationBus::new();
        let snapshot =
            StatusSnapshot::from_region(bus.region(), &SafetyThresholds::default(), 0, (1280, 720));
        assert_eq!(snapshot.status, SafetyState::Safe);
        assert_eq!(snapshot.hand_distance_cm, None);
        assert_eq!(snapshot.calibration.resolution, "1280x720");
        assert!(!snapshot.calibration.is_calibrated);
        assert_eq!(snapshot.calibration.fx, None);
    }

    #[test]
    fn serializes_the_broadcast_record() {
        let bus = CoordinationBus::new();
        let perception = bus.take_perception_writer().unwrap();
        let motion = bus.take_motion_writer().unwrap();
        perception.publish_observation(&SafetyObservation {
            hand_detected: true,
            distance_m: 0.2234,
            nearest_keypoint: Some(Pixel::new(10.0, 10.0)),
            hand_in_zone: true,
            slowdown: true,
        });
        perception.publish_calibration(&CalibrationSummary {
            fx: 900.0,
            fy: 900.0,
            cx: 640.0,
            cy: 360.0,
            width: 1280,
            height: 720,
            is_calibrated: true,
        });
        perception.publish_zone(4, true);
        motion.set_paused(true);
        motion.set_progress(42.0);

        let snapshot =
            StatusSnapshot::from_region(bus.region(), &SafetyThresholds::default(), 3, (640, 480));
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], "CAUTION");
        assert_eq!(value["hand_distance_cm"], 22.3);
        assert_eq!(value["robot_paused"], true);
        assert_eq!(value["progress"], 42.0);
        assert_eq!(value["in_workspace"], true);
        assert_eq!(value["is_slowdown"], true);
        assert_eq!(value["calibration"]["resolution"], "1280x720");
        assert_eq!(value["calibration"]["fx"], 900.0);
        assert_eq!(value["aruco_marker_id"], 3);
        assert_eq!(value["aruco_detected"], 4);
        assert_eq!(value["workspace_defined"], true);
        assert_eq!(value["timestamp"].as_str().unwrap().len(), 12);

        assert_eq!(
            snapshot.console_line(),
            "[CAUTION] hand 22.3 cm | progress 42.0% | PAUSED | zone: in (slowdown)"
        );
    }
}
