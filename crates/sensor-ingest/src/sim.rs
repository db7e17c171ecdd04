//! Simulated collaborators used when no hardware is attached.
//!
//! The scene is scripted from the frame sequence number so every run is
//! reproducible: a hand sweeps towards and away from a fixed tool tip, four
//! markers frame the workspace, and the marker and tool detectors miss the
//! occasional frame.

use std::{
    f64::consts::TAU,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{debug, info};

use crate::{
    camera::CameraDriver,
    detect::{Detection, DetectionLabel, Detector, Pixel, PixelRegion},
    motion::{Gripper, MotionDriver, MotionOutcome, MotionTarget, Pose},
    types::{DepthMap, DriverError, Frame, FrameFormat, Intrinsics},
};

pub const SIM_WIDTH: u32 = 1280;
pub const SIM_HEIGHT: u32 = 720;
pub const SIM_FOCAL_PX: f64 = 900.0;
pub const SIM_DEPTH_M: f32 = 0.6;
pub const SIM_TOOL_PIXEL: Pixel = Pixel::new(640.0, 400.0);

/// Frames per approach/withdraw cycle of the scripted hand.
const HAND_CYCLE_FRAMES: u64 = 300;
const HAND_NEAR_M: f64 = 0.10;
const HAND_FAR_M: f64 = 0.45;
/// Fingertip offsets from the palm centre; the first points at the tool.
const FINGERTIP_OFFSETS: [(f64, f64); 5] = [
    (-45.0, 0.0),
    (-40.0, -30.0),
    (-40.0, 30.0),
    (-30.0, -50.0),
    (-20.0, 50.0),
];
const WORKSPACE_CORNERS: [Pixel; 4] = [
    Pixel::new(300.0, 200.0),
    Pixel::new(1000.0, 200.0),
    Pixel::new(1000.0, 650.0),
    Pixel::new(300.0, 650.0),
];
const MARKER_HALF_SIZE: f64 = 20.0;

/// Camera producing blank colour frames with a uniform depth map.
pub struct SimCamera {
    intrinsics_available: bool,
    frame_interval: Duration,
    sequence: u64,
    depth: DepthMap,
    last_frame: Option<Instant>,
}

impl SimCamera {
    pub fn new(fps: u32, intrinsics_available: bool) -> Self {
        Self {
            intrinsics_available,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            sequence: 0,
            depth: DepthMap::uniform(SIM_WIDTH, SIM_HEIGHT, SIM_DEPTH_M),
            last_frame: None,
        }
    }
}

impl CameraDriver for SimCamera {
    fn name(&self) -> &str {
        "sim-camera"
    }

    fn intrinsics(&self) -> Result<Intrinsics, DriverError> {
        if !self.intrinsics_available {
            return Err(DriverError::Unavailable {
                driver: "sim-camera intrinsics".into(),
            });
        }
        Ok(Intrinsics {
            width: SIM_WIDTH,
            height: SIM_HEIGHT,
            fx: SIM_FOCAL_PX,
            fy: SIM_FOCAL_PX,
            ppx: SIM_WIDTH as f64 / 2.0,
            ppy: SIM_HEIGHT as f64 / 2.0,
            coeffs: [0.0; 5],
        })
    }

    fn next_frame(&mut self) -> Result<Frame, DriverError> {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
        self.sequence += 1;
        Ok(Frame {
            data: Vec::new(),
            width: SIM_WIDTH,
            height: SIM_HEIGHT,
            timestamp_ms: Utc::now().timestamp_millis(),
            sequence: self.sequence,
            format: FrameFormat::Bgr8,
            depth: Some(self.depth.clone()),
        })
    }
}

/// Tool-tip detector reporting a fixed pixel, missing every `miss_every`th frame.
pub struct SimToolDetector {
    miss_every: u64,
}

impl SimToolDetector {
    pub fn new(miss_every: u64) -> Self {
        Self { miss_every }
    }
}

impl Detector for SimToolDetector {
    fn name(&self) -> &str {
        "sim-tool"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DriverError> {
        if self.miss_every > 0 && frame.sequence % self.miss_every == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Detection::point(
            DetectionLabel::ToolTip,
            0,
            SIM_TOOL_PIXEL,
            0.9,
        )])
    }
}

/// Hand tracker whose single hand sweeps along the tool's row.
#[derive(Default)]
pub struct SimHandTracker;

impl SimHandTracker {
    /// Scripted tool-to-nearest-fingertip distance in metres, `None` while the
    /// hand is out of view.
    pub fn scripted_distance(sequence: u64) -> Option<f64> {
        let phase = (sequence % HAND_CYCLE_FRAMES) as f64 / HAND_CYCLE_FRAMES as f64;
        if phase >= 0.75 {
            return None;
        }
        let swing = (1.0 + (TAU * phase / 0.75).cos()) / 2.0;
        Some(HAND_NEAR_M + (HAND_FAR_M - HAND_NEAR_M) * swing)
    }
}

impl Detector for SimHandTracker {
    fn name(&self) -> &str {
        "sim-hands"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DriverError> {
        let Some(distance_m) = Self::scripted_distance(frame.sequence) else {
            return Ok(Vec::new());
        };
        let offset_px = distance_m * SIM_FOCAL_PX / SIM_DEPTH_M as f64;
        let palm = Pixel::new(
            SIM_TOOL_PIXEL.u + offset_px - FINGERTIP_OFFSETS[0].0,
            SIM_TOOL_PIXEL.v,
        );
        let mut detections: Vec<Detection> = FINGERTIP_OFFSETS
            .iter()
            .map(|(du, dv)| {
                Detection::point(
                    DetectionLabel::Fingertip,
                    0,
                    Pixel::new(palm.u + du, palm.v + dv),
                    0.8,
                )
            })
            .collect();
        detections.push(Detection::point(DetectionLabel::Palm, 0, palm, 0.8));
        Ok(detections)
    }
}

/// Fiducial detector seeing four same-id markers at the workspace corners.
pub struct SimMarkerDetector {
    marker_id: i32,
    under_detect_every: u64,
}

impl SimMarkerDetector {
    pub fn new(marker_id: i32, under_detect_every: u64) -> Self {
        Self {
            marker_id,
            under_detect_every,
        }
    }
}

impl Detector for SimMarkerDetector {
    fn name(&self) -> &str {
        "sim-markers"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DriverError> {
        let visible = if self.under_detect_every > 0 && frame.sequence % self.under_detect_every == 0
        {
            3
        } else {
            4
        };
        Ok(WORKSPACE_CORNERS
            .iter()
            .take(visible)
            .map(|c| Detection {
                label: DetectionLabel::Marker(self.marker_id),
                instance: 0,
                region: PixelRegion::Quad([
                    Pixel::new(c.u - MARKER_HALF_SIZE, c.v - MARKER_HALF_SIZE),
                    Pixel::new(c.u + MARKER_HALF_SIZE, c.v - MARKER_HALF_SIZE),
                    Pixel::new(c.u + MARKER_HALF_SIZE, c.v + MARKER_HALF_SIZE),
                    Pixel::new(c.u - MARKER_HALF_SIZE, c.v + MARKER_HALF_SIZE),
                ]),
                confidence: 1.0,
            })
            .collect())
    }
}

const MOTION_SLICE: Duration = Duration::from_millis(5);

/// Arm that "moves" by sleeping for distance / velocity, honouring halts.
pub struct SimMotionDriver {
    time_scale: f64,
    halt: AtomicBool,
    pose: Mutex<Pose>,
    joints: Mutex<[f64; 6]>,
}

impl SimMotionDriver {
    /// `time_scale` multiplies every simulated move duration.
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale,
            halt: AtomicBool::new(false),
            pose: Mutex::new(Pose::default()),
            joints: Mutex::new([0.0; 6]),
        }
    }

    pub fn pose(&self) -> Pose {
        *self.pose.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn travel(&self, target: &MotionTarget) -> f64 {
        match target {
            MotionTarget::Linear(pose) => self.pose().translation_to(pose),
            MotionTarget::Joints(goal) => {
                let joints = *self.joints.lock().unwrap_or_else(PoisonError::into_inner);
                joints
                    .iter()
                    .zip(goal.iter())
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max)
            }
        }
    }
}

impl MotionDriver for SimMotionDriver {
    fn name(&self) -> &str {
        "sim-arm"
    }

    fn move_to(
        &self,
        target: &MotionTarget,
        velocity: f64,
        _acceleration: f64,
    ) -> Result<MotionOutcome, DriverError> {
        if !(velocity.is_finite() && velocity > 0.0) {
            return Err(DriverError::Motion {
                reason: format!("invalid velocity {velocity}"),
            });
        }
        self.halt.store(false, Ordering::SeqCst);
        let duration = Duration::from_secs_f64(self.travel(target) / velocity * self.time_scale);
        let started = Instant::now();
        while started.elapsed() < duration {
            if self.halt.load(Ordering::SeqCst) {
                debug!("sim-arm halted after {:?}", started.elapsed());
                return Ok(MotionOutcome::Halted);
            }
            thread::sleep(MOTION_SLICE.min(duration.saturating_sub(started.elapsed())));
        }
        match target {
            MotionTarget::Linear(pose) => {
                *self.pose.lock().unwrap_or_else(PoisonError::into_inner) = *pose;
            }
            MotionTarget::Joints(goal) => {
                *self.joints.lock().unwrap_or_else(PoisonError::into_inner) = *goal;
            }
        }
        Ok(MotionOutcome::Completed)
    }

    fn halt_current_motion(&self) -> Result<(), DriverError> {
        self.halt.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct SimGripper {
    position: Option<u32>,
}

impl Gripper for SimGripper {
    fn initialize(&mut self) -> Result<(), DriverError> {
        info!("sim-gripper initialised");
        Ok(())
    }

    fn move_to(&mut self, position: u32) -> Result<(), DriverError> {
        debug!("sim-gripper stroke {:?} -> {position}", self.position);
        self.position = Some(position);
        Ok(())
    }

    fn terminate(&mut self) {
        self.position = None;
    }
}
