//! Hand-proximity safety supervisor.
//!
//! Three workers share one [`safety_core::CoordinationBus`]:
//!
//! * perception turns camera frames into safety observations,
//! * motion runs the job one gated primitive at a time,
//! * status samples the bus and feeds the monitor transports.
//!
//! [`run`] wires them together and owns the session lifecycle.

mod config;
mod hub;
mod motion;
mod perception;
mod server;
mod socket;
mod status;
mod supervisor;
mod telemetry;

pub use config::{RunArgs, SafetyConfig};
pub use supervisor::run;
