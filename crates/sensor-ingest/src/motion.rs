//! Robot motion and gripper driver boundary.

use crate::types::DriverError;

/// Cartesian tool pose: position in millimetres, orientation in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            x,
            y,
            z,
            rx,
            ry,
            rz,
        }
    }

    pub fn translation_to(&self, other: &Pose) -> f64 {
        let (dx, dy, dz) = (other.x - self.x, other.y - self.y, other.z - self.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotionTarget {
    /// Joint-space move, angles in degrees.
    Joints([f64; 6]),
    /// Linear Cartesian move.
    Linear(Pose),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionOutcome {
    Completed,
    /// Stopped early by `halt_current_motion`.
    Halted,
}

/// Robot arm driver.
///
/// `move_to` blocks until the primitive completes or is halted. `halt_current_motion`
/// is called from another thread while a move is in flight, so drivers are `Sync`.
pub trait MotionDriver: Send + Sync {
    fn name(&self) -> &str;

    fn move_to(
        &self,
        target: &MotionTarget,
        velocity: f64,
        acceleration: f64,
    ) -> Result<MotionOutcome, DriverError>;

    fn halt_current_motion(&self) -> Result<(), DriverError>;
}

/// Optional end-effector. Presence is decided once from configuration.
pub trait Gripper: Send {
    fn initialize(&mut self) -> Result<(), DriverError>;

    /// Move the jaws to a raw stroke position.
    fn move_to(&mut self, position: u32) -> Result<(), DriverError>;

    fn terminate(&mut self);
}
