//! Per-frame safety facts derived from detector output.

use sensor_ingest::{Detection, DetectionLabel, Frame, Pixel};

use crate::{
    arbiter::SafetyArbiter,
    calibration::{CalibrationModel, valid_depth},
    workspace::WorkspaceZone,
};

/// Distance published while no hand is in view.
pub const NO_HAND_DISTANCE_M: f64 = 999.0;
/// Tool detections below this confidence are ignored.
pub const MIN_TOOL_CONFIDENCE: f32 = 0.2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetyObservation {
    pub hand_detected: bool,
    /// Minimum tool-to-fingertip distance, metres.
    pub distance_m: f64,
    pub nearest_keypoint: Option<Pixel>,
    pub hand_in_zone: bool,
    pub slowdown: bool,
}

impl SafetyObservation {
    pub fn no_hand() -> Self {
        Self {
            hand_detected: false,
            distance_m: NO_HAND_DISTANCE_M,
            nearest_keypoint: None,
            hand_in_zone: false,
            slowdown: false,
        }
    }
}

impl Default for SafetyObservation {
    fn default() -> Self {
        Self::no_hand()
    }
}

/// Highest-confidence tool tip above [`MIN_TOOL_CONFIDENCE`].
pub fn select_tool(detections: &[Detection]) -> Option<Pixel> {
    detections
        .iter()
        .filter(|d| d.label == DetectionLabel::ToolTip && d.confidence >= MIN_TOOL_CONFIDENCE)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|d| d.region.centroid())
}

/// Fold hand landmarks into one observation.
///
/// Every in-frame fingertip is a distance candidate; palm centres decide zone
/// membership. Depths outside the sensor's trusted window fall back to the
/// calibration's working depth.
pub fn assess_hands(
    frame: &Frame,
    tool: Pixel,
    hands: &[Detection],
    calibration: &CalibrationModel,
    mut zone: Option<&mut WorkspaceZone>,
    arbiter: &SafetyArbiter,
) -> SafetyObservation {
    let tool_depth = valid_depth(frame.depth_at(tool.u, tool.v));
    let mut nearest: Option<(f64, Pixel)> = None;
    let mut in_zone = false;

    for detection in hands {
        let at = detection.region.centroid();
        match detection.label {
            DetectionLabel::Fingertip if frame.contains(at.u, at.v) => {
                let hand_depth = valid_depth(frame.depth_at(at.u, at.v));
                let distance = calibration.distance_3d(at, tool, hand_depth, tool_depth);
                if nearest.is_none_or(|(best, _)| distance < best) {
                    nearest = Some((distance, at));
                }
            }
            DetectionLabel::Palm => {
                if let Some(zone) = zone.as_deref_mut() {
                    if zone.is_defined() && zone.check_hand(at.u, at.v) {
                        in_zone = true;
                    }
                }
            }
            _ => {}
        }
    }

    match nearest {
        Some((distance_m, keypoint)) => SafetyObservation {
            hand_detected: true,
            distance_m,
            nearest_keypoint: Some(keypoint),
            hand_in_zone: in_zone,
            slowdown: arbiter.slowdown_for(in_zone),
        },
        None => SafetyObservation::no_hand(),
    }
}

#[cfg(test)]
mod tests {
    use sensor_ingest::{DepthMap, FrameFormat, Intrinsics};

    use super::*;
    use crate::{
        arbiter::{SafetyState, SafetyThresholds, SlowdownPolicy},
        calibration::CalibrationDefaults,
    };

    fn frame(depth: Option<DepthMap>) -> Frame {
        Frame {
            data: Vec::new(),
            width: 1280,
            height: 720,
            timestamp_ms: 0,
            sequence: 1,
            format: FrameFormat::Bgr8,
            depth,
        }
    }

    fn model() -> CalibrationModel {
        let mut model = CalibrationModel::new(CalibrationDefaults::default());
        model.calibrate_from_driver(Ok(Intrinsics {
            width: 1280,
            height: 720,
            fx: 900.0,
            fy: 900.0,
            ppx: 640.0,
            ppy: 360.0,
            coeffs: [0.0; 5],
        }));
        model
    }

    fn tip(u: f64, v: f64) -> Detection {
        Detection::point(DetectionLabel::Fingertip, 0, Pixel::new(u, v), 0.9)
    }

    #[test]
    fn picks_most_confident_tool() {
        let detections = vec![
            Detection::point(DetectionLabel::ToolTip, 0, Pixel::new(1.0, 1.0), 0.5),
            Detection::point(DetectionLabel::ToolTip, 1, Pixel::new(2.0, 2.0), 0.8),
            Detection::point(DetectionLabel::ToolTip, 2, Pixel::new(3.0, 3.0), 0.1),
        ];
        assert_eq!(select_tool(&detections), Some(Pixel::new(2.0, 2.0)));
        assert_eq!(select_tool(&detections[2..]), None);
    }

    #[test]
    fn nearest_fingertip_wins_and_out_of_frame_is_ignored() {
        let arbiter = SafetyArbiter::default();
        let tool = Pixel::new(640.0, 360.0);
        let hands = vec![tip(640.0 + 450.0, 360.0), tip(640.0 + 300.0, 360.0), tip(-5.0, 360.0)];
        let obs = assess_hands(
            &frame(Some(DepthMap::uniform(1280, 720, 0.6))),
            tool,
            &hands,
            &model(),
            None,
            &arbiter,
        );
        assert!(obs.hand_detected);
        assert_eq!(obs.nearest_keypoint, Some(Pixel::new(940.0, 360.0)));
        assert!((obs.distance_m - 0.2).abs() < 1e-6);
    }

    #[test]
    fn no_fingertips_means_no_hand() {
        let obs = assess_hands(
            &frame(None),
            Pixel::new(0.0, 0.0),
            &[],
            &model(),
            None,
            &SafetyArbiter::default(),
        );
        assert_eq!(obs, SafetyObservation::no_hand());
    }

    #[test]
    fn palm_in_zone_sets_slowdown_independent_of_distance() {
        let tool = Pixel::new(640.0, 360.0);
        let palm_inside = Detection::point(DetectionLabel::Palm, 0, Pixel::new(900.0, 360.0), 0.9);
        let mut zone = WorkspaceZone::new(0);
        zone.update(
            &[(800.0, 200.0), (1000.0, 200.0), (1000.0, 500.0), (800.0, 500.0)]
                .iter()
                .map(|&(u, v)| Detection::point(DetectionLabel::Marker(0), 0, Pixel::new(u, v), 1.0))
                .collect::<Vec<_>>(),
        );

        let arbiter = SafetyArbiter::default();
        let far = assess_hands(
            &frame(None),
            tool,
            &[tip(1200.0, 360.0), palm_inside.clone()],
            &model(),
            Some(&mut zone),
            &arbiter,
        );
        assert_eq!(arbiter.state(&far), SafetyState::Safe);
        assert!(far.hand_in_zone && far.slowdown);

        let no_slowdown =
            SafetyArbiter::new(SafetyThresholds::default(), SlowdownPolicy::disabled());
        let obs = assess_hands(
            &frame(None),
            tool,
            &[tip(700.0, 360.0), palm_inside],
            &model(),
            Some(&mut zone),
            &no_slowdown,
        );
        assert_eq!(no_slowdown.state(&obs), SafetyState::Danger);
        assert!(obs.hand_in_zone);
        assert!(!obs.slowdown);
    }
}
