//! Configuration parsing for the safety supervisor.
//!
//! This module owns translation of CLI arguments into a `SafetyConfig` struct
//! which the workers use without re-parsing flags.

use std::{net::IpAddr, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Args;
use safety_core::{
    CalibrationDefaults, SafetyArbiter, SafetyThresholds, SlowdownPolicy,
    arbiter::{DEFAULT_CLEAR_DISTANCE_M, DEFAULT_DANGER_DISTANCE_M, DEFAULT_SLOWDOWN_FACTOR},
    calibration::{DEFAULT_FOV_DEG, DEFAULT_HEIGHT, DEFAULT_WIDTH, DEFAULT_WORKING_DEPTH_M},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// How the perception worker obtains camera intrinsics.
pub enum CalibrationMode {
    /// Ask the camera driver, synthesizing from the field of view on failure.
    Driver,
    /// Skip the driver and synthesize from the field of view.
    Synthesized,
    /// Stay uncalibrated; distances use the pixel-ratio estimate.
    PixelRatio,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every worker.
pub struct SafetyConfig {
    /// Distance classification and slowdown policy.
    pub arbiter: SafetyArbiter,
    /// Interval of the motion gate's safety poll.
    pub poll_interval: Duration,
    /// Interval between status broadcasts.
    pub status_interval: Duration,
    /// Upper bound on the wait for the first warmed-up frame.
    pub camera_ready_timeout: Duration,
    /// Time workers get to exit after a stop request.
    pub grace_period: Duration,
    /// Fiducial identity of the four workspace markers.
    pub marker_id: i32,
    pub aruco_enabled: bool,
    pub calibration_mode: CalibrationMode,
    pub calibration_defaults: CalibrationDefaults,
    pub gripper_enabled: bool,
    /// Simulated camera frame rate.
    pub camera_fps: u32,
    /// Multiplier applied to simulated move durations.
    pub motion_time_scale: f64,
    pub transport: TransportOptions,
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug)]
/// External observer endpoints.
pub struct TransportOptions {
    pub bind: IpAddr,
    pub web_port: u16,
    /// `None` disables the TCP command socket.
    pub socket_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing worker spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Halt when a hand is closer than this, metres.
    #[arg(long = "danger-distance", value_name = "M", default_value_t = DEFAULT_DANGER_DISTANCE_M)]
    pub danger_distance: f64,
    /// Resume once the hand is at least this far, metres.
    #[arg(long = "clear-distance", value_name = "M", default_value_t = DEFAULT_CLEAR_DISTANCE_M)]
    pub clear_distance: f64,
    /// Safety poll interval while motion is gated.
    #[arg(long = "poll-interval-ms", value_name = "MS", default_value_t = 10)]
    pub poll_interval_ms: u64,
    /// Status broadcast interval.
    #[arg(long = "status-interval-ms", value_name = "MS", default_value_t = 100)]
    pub status_interval_ms: u64,
    /// Give up when the camera is not ready within this many seconds.
    #[arg(long = "camera-ready-timeout-secs", value_name = "SECS", default_value_t = 30)]
    pub camera_ready_timeout_secs: u64,
    /// Time workers get to exit after a stop request.
    #[arg(long = "grace-period-secs", value_name = "SECS", default_value_t = 5)]
    pub grace_period_secs: u64,
    /// Fiducial identity of the workspace markers.
    #[arg(long = "marker-id", value_name = "ID", default_value_t = 0)]
    pub marker_id: i32,
    /// Disable the marker-based workspace zone.
    #[arg(long = "no-aruco", action = clap::ArgAction::SetTrue)]
    pub no_aruco: bool,
    /// Do not query the driver; synthesize intrinsics from the field of view.
    #[arg(long = "no-calibration", action = clap::ArgAction::SetTrue)]
    pub no_calibration: bool,
    /// Stay uncalibrated and estimate distances from pixel spacing.
    #[arg(long = "pixel-ratio-only", action = clap::ArgAction::SetTrue, conflicts_with = "no_calibration")]
    pub pixel_ratio_only: bool,
    /// Keep full speed while a hand is inside the workspace zone.
    #[arg(long = "no-slowdown", action = clap::ArgAction::SetTrue)]
    pub no_slowdown: bool,
    /// Velocity multiplier applied inside the workspace zone.
    #[arg(long = "slowdown-factor", value_name = "FACTOR", default_value_t = DEFAULT_SLOWDOWN_FACTOR)]
    pub slowdown_factor: f64,
    /// Horizontal field of view used when synthesizing intrinsics, degrees.
    #[arg(long = "fov", value_name = "DEG", default_value_t = DEFAULT_FOV_DEG)]
    pub fov: f64,
    /// Capture width used when synthesizing intrinsics.
    #[arg(long = "width", value_name = "PX", default_value_t = DEFAULT_WIDTH)]
    pub width: u32,
    /// Capture height used when synthesizing intrinsics.
    #[arg(long = "height", value_name = "PX", default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,
    /// Depth assumed when no measurement is available, metres.
    #[arg(long = "working-depth", value_name = "M", default_value_t = DEFAULT_WORKING_DEPTH_M)]
    pub working_depth: f64,
    /// Simulated camera frame rate.
    #[arg(long = "camera-fps", value_name = "FPS", default_value_t = 30)]
    pub camera_fps: u32,
    /// Multiplier applied to simulated move durations.
    #[arg(long = "motion-time-scale", value_name = "SCALE", default_value_t = 1.0)]
    pub motion_time_scale: f64,
    /// Address the HTTP and TCP listeners bind to.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// HTTP monitor port.
    #[arg(long = "web-port", value_name = "PORT", default_value_t = 8080)]
    pub web_port: u16,
    /// TCP command socket port.
    #[arg(long = "socket-port", value_name = "PORT", default_value_t = 9999)]
    pub socket_port: u16,
    /// Disable the TCP command socket.
    #[arg(long = "no-socket", action = clap::ArgAction::SetTrue)]
    pub no_socket: bool,
    /// Run without a gripper.
    #[arg(long = "no-gripper", action = clap::ArgAction::SetTrue)]
    pub no_gripper: bool,
    /// Enable verbose logging (per-frame detections).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<RunArgs> for SafetyConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self> {
        let thresholds = SafetyThresholds::new(args.danger_distance, args.clear_distance)?;
        let slowdown = SlowdownPolicy::new(!args.no_slowdown, args.slowdown_factor)?;

        if args.poll_interval_ms == 0 {
            bail!("--poll-interval-ms must be at least 1");
        }
        if args.status_interval_ms == 0 {
            bail!("--status-interval-ms must be at least 1");
        }
        if args.camera_ready_timeout_secs == 0 {
            bail!("--camera-ready-timeout-secs must be at least 1");
        }
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }
        if !(args.fov.is_finite() && args.fov > 0.0 && args.fov < 180.0) {
            bail!("--fov must lie in (0, 180) degrees");
        }
        if !(args.working_depth.is_finite() && args.working_depth > 0.0) {
            bail!("--working-depth must be a positive distance");
        }
        if args.camera_fps == 0 {
            bail!("--camera-fps must be at least 1");
        }
        if !(args.motion_time_scale.is_finite() && args.motion_time_scale > 0.0) {
            bail!("--motion-time-scale must be positive");
        }

        let socket_port = (!args.no_socket).then_some(args.socket_port);
        if socket_port == Some(args.web_port) {
            bail!("--web-port and --socket-port must differ");
        }

        let calibration_mode = if args.pixel_ratio_only {
            CalibrationMode::PixelRatio
        } else if args.no_calibration {
            CalibrationMode::Synthesized
        } else {
            CalibrationMode::Driver
        };

        Ok(Self {
            arbiter: SafetyArbiter::new(thresholds, slowdown),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            status_interval: Duration::from_millis(args.status_interval_ms),
            camera_ready_timeout: Duration::from_secs(args.camera_ready_timeout_secs),
            grace_period: Duration::from_secs(args.grace_period_secs),
            marker_id: args.marker_id,
            aruco_enabled: !args.no_aruco,
            calibration_mode,
            calibration_defaults: CalibrationDefaults {
                width: args.width,
                height: args.height,
                fov_deg: args.fov,
                working_depth_m: args.working_depth,
            },
            gripper_enabled: !args.no_gripper,
            camera_fps: args.camera_fps,
            motion_time_scale: args.motion_time_scale,
            transport: TransportOptions {
                bind: args.bind,
                web_port: args.web_port,
                socket_port,
            },
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(flags: &[&str]) -> Result<SafetyConfig> {
        let harness = Harness::try_parse_from(std::iter::once("handguard").chain(flags.iter().copied()))?;
        SafetyConfig::try_from(harness.args)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.arbiter.thresholds().danger_m(), 0.20);
        assert_eq!(config.arbiter.thresholds().clear_m(), 0.25);
        assert!(config.arbiter.slowdown().enabled());
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.status_interval, Duration::from_millis(100));
        assert_eq!(config.camera_ready_timeout, Duration::from_secs(30));
        assert_eq!(config.calibration_mode, CalibrationMode::Driver);
        assert_eq!(config.transport.web_port, 8080);
        assert_eq!(config.transport.socket_port, Some(9999));
        assert!(config.gripper_enabled);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = parse(&["--danger-distance", "0.3", "--clear-distance", "0.2"]).unwrap_err();
        assert!(err.to_string().contains("must be below"));
    }

    #[test]
    fn rejects_clashing_ports_only_when_socket_enabled() {
        assert!(parse(&["--socket-port", "8080"]).is_err());
        let config = parse(&["--socket-port", "8080", "--no-socket"]).unwrap();
        assert_eq!(config.transport.socket_port, None);
    }

    #[test]
    fn calibration_flags_select_mode() {
        assert_eq!(
            parse(&["--no-calibration"]).unwrap().calibration_mode,
            CalibrationMode::Synthesized
        );
        assert_eq!(
            parse(&["--pixel-ratio-only"]).unwrap().calibration_mode,
            CalibrationMode::PixelRatio
        );
        assert!(parse(&["--pixel-ratio-only", "--no-calibration"]).is_err());
    }

    #[test]
    fn no_slowdown_keeps_factor_validation() {
        let config = parse(&["--no-slowdown"]).unwrap();
        assert!(!config.arbiter.slowdown().enabled());
        assert!(parse(&["--slowdown-factor", "1.5"]).is_err());
    }
}
