//! Hand-proximity safety arbitration.
//!
//! Perception turns detector output into a [`SafetyObservation`] using the
//! [`CalibrationModel`] and the [`WorkspaceZone`], and publishes it into the
//! [`CoordinationBus`]. Motion reads the bus through a [`MotionGate`] before
//! every primitive; observers build a [`StatusSnapshot`] from the same cells.

pub mod arbiter;
pub mod bus;
pub mod calibration;
mod error;
pub mod events;
pub mod gate;
pub mod observation;
pub mod status;
pub mod workspace;

pub use arbiter::{
    GateDecision, HysteresisGate, SafetyArbiter, SafetyState, SafetyThresholds, SlowdownPolicy,
};
pub use bus::{
    CoordinationBus, MotionWriter, PerceptionWriter, ReadySignal, SharedRegion, StopReason,
    StopSignal,
};
pub use calibration::{CalibrationDefaults, CalibrationModel, CalibrationSummary, Point3};
pub use error::{BusError, ConfigError};
pub use events::{EventEntry, EventKind, EventLog};
pub use gate::{GateOutcome, MotionGate};
pub use observation::{SafetyObservation, assess_hands, select_tool};
pub use status::StatusSnapshot;
pub use workspace::WorkspaceZone;
