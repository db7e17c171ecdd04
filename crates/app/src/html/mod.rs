//! Embedded static HTML served by the monitor web UI.
//!
//! Kept as `&'static str` so the page ships inside the binary without
//! filesystem lookups.

pub mod monitor;
