//! Boundary to the external collaborators of the safety core: the camera,
//! the perception models and the robot arm.
//!
//! Only the interfaces live here, plus simulated implementations in [`sim`]
//! that stand in for hardware.

mod camera;
mod detect;
mod motion;
pub mod sim;
mod types;

pub use camera::{CameraDriver, spawn_camera_reader};
pub use detect::{Detection, DetectionLabel, Detector, Pixel, PixelRegion};
pub use motion::{Gripper, MotionDriver, MotionOutcome, MotionTarget, Pose};
pub use types::{DepthMap, DriverError, Frame, FrameFormat, Intrinsics};
