//! Session supervisor tying together perception, motion, status and the
//! monitor transports.
//!
//! Startup is ordered: perception must report a warmed-up camera before the
//! motion and status workers start. The session ends on the first stop
//! request, whichever worker or transport raised it, and every worker then
//! gets a bounded grace period to exit.

use std::{
    sync::{Arc, Once},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use safety_core::{BusError, CoordinationBus, EventKind, MotionGate, StopReason};
use sensor_ingest::{
    Gripper,
    sim::{SimCamera, SimGripper, SimHandTracker, SimMarkerDetector, SimMotionDriver, SimToolDetector},
};
use tracing::{error, info, warn};

use crate::safety::{
    SafetyConfig,
    hub::StatusHub,
    motion::{HelixJob, JobOutcome, MotionWorker, spawn_motion_worker},
    perception::{Detectors, PerceptionWorker, spawn_perception_worker},
    server::spawn_monitor_server,
    socket::CommandContext,
    status::{StatusWorker, spawn_status_worker},
    telemetry,
};

const SUPERVISOR_TICK: Duration = Duration::from_millis(100);
const READY_POLL: Duration = Duration::from_millis(100);
const GRACE_POLL: Duration = Duration::from_millis(20);
/// The simulated tool detector misses one frame in this many.
const SIM_TOOL_MISS_EVERY: u64 = 50;
/// The simulated marker detector sees only three markers one frame in this many.
const SIM_MARKER_UNDER_DETECT_EVERY: u64 = 15;

/// Run one supervised session until the job completes or a stop is requested.
pub fn run(config: SafetyConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry = telemetry::enter_runtime(&config.telemetry, config.verbose);
    if telemetry::init_metrics_recorder().is_none() {
        warn!("Prometheus recorder unavailable; /metrics will be empty");
    }

    let bus = CoordinationBus::new();
    let handler_stop = bus.stop_handle();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_stop.request(StopReason::Signal);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    info!(
        danger_m = config.arbiter.thresholds().danger_m(),
        clear_m = config.arbiter.thresholds().clear_m(),
        slowdown = config.arbiter.slowdown().enabled(),
        "safety session starting"
    );
    bus.events().record(EventKind::Info, "Safety session starting");

    let result = supervise(&config, &bus);
    let reason = bus.stop().reason().map_or("none", StopReason::label);
    match &result {
        Ok(()) => info!("safety session ended (reason: {reason})"),
        Err(err) => error!("safety session failed (reason: {reason}): {err:#}"),
    }
    result
}

fn supervise(config: &SafetyConfig, bus: &CoordinationBus) -> Result<()> {
    let perception = spawn_perception_worker(PerceptionWorker {
        bus: bus.clone(),
        writer: bus.take_perception_writer()?,
        camera: Box::new(SimCamera::new(config.camera_fps, true)),
        detectors: Detectors {
            tool: Box::new(SimToolDetector::new(SIM_TOOL_MISS_EVERY)),
            hands: Box::new(SimHandTracker),
            markers: config.aruco_enabled.then(|| {
                Box::new(SimMarkerDetector::new(
                    config.marker_id,
                    SIM_MARKER_UNDER_DETECT_EVERY,
                )) as Box<dyn sensor_ingest::Detector>
            }),
        },
        arbiter: config.arbiter,
        calibration_mode: config.calibration_mode,
        calibration_defaults: config.calibration_defaults,
        marker_id: config.marker_id,
        verbose: config.verbose,
    })
    .context("Failed to spawn perception worker")?;

    match bus
        .camera_ready()
        .wait_unless_stopped(config.camera_ready_timeout, bus.stop(), READY_POLL)
    {
        Ok(()) => info!("camera ready"),
        Err(BusError::Stopped) => {
            info!("stop requested before the camera became ready");
            return finish_perception(join_with_grace("perception", perception, config.grace_period));
        }
        Err(err) => {
            bus.stop().request(StopReason::StartupTimeout);
            bus.events()
                .record(EventKind::Error, format!("Startup failed: {err}"));
            let joined = join_with_grace("perception", perception, config.grace_period);
            if let Err(perception_err) = finish_perception(joined) {
                warn!("perception worker during aborted startup: {perception_err:#}");
            }
            bail!("Startup aborted: {err}");
        }
    }

    let hub = Arc::new(StatusHub::new());
    let status = spawn_status_worker(StatusWorker {
        bus: bus.clone(),
        hub: hub.clone(),
        thresholds: *config.arbiter.thresholds(),
        marker_id: config.marker_id,
        resolution: (
            config.calibration_defaults.width,
            config.calibration_defaults.height,
        ),
        interval: config.status_interval,
    })
    .context("Failed to spawn status worker")?;

    let gripper = config
        .gripper_enabled
        .then(|| Box::new(SimGripper::default()) as Box<dyn Gripper>);
    let motion = spawn_motion_worker(MotionWorker {
        gate: MotionGate::new(
            bus.clone(),
            bus.take_motion_writer()?,
            config.arbiter,
            config.poll_interval,
        ),
        arm: Arc::new(SimMotionDriver::new(config.motion_time_scale)),
        gripper,
        job: HelixJob::default(),
        camera_ready_timeout: config.camera_ready_timeout,
    })
    .context("Failed to spawn motion worker")?;

    let server = match spawn_monitor_server(
        &config.transport,
        CommandContext {
            hub,
            events: bus.events_handle(),
            stop: bus.stop_handle(),
        },
    ) {
        Ok(server) => Some(server),
        Err(err) => {
            error!("monitor server unavailable: {err:#}");
            bus.events()
                .record(EventKind::Error, format!("Monitor server unavailable: {err}"));
            None
        }
    };

    while !bus.stop().is_requested() {
        // Workers raise their own stop on a normal exit; these catch panics.
        if motion.is_finished() {
            bus.stop().request(StopReason::WorkerExited("motion"));
        } else if perception.is_finished() {
            bus.stop().request(StopReason::WorkerExited("perception"));
        } else if status.is_finished() {
            bus.stop().request(StopReason::WorkerExited("status"));
        }
        thread::sleep(SUPERVISOR_TICK);
    }
    if let Some(reason) = bus.stop().reason() {
        info!("stop requested: {}", reason.label());
    }

    let motion_result = join_with_grace("motion", motion, config.grace_period);
    let perception_result = join_with_grace("perception", perception, config.grace_period);
    if join_with_grace("status", status, config.grace_period) == Some(Err(())) {
        error!("status worker panicked");
    }
    if let Some(server) = server {
        server.stop();
    }

    let motion_result = match motion_result {
        Some(Ok(Ok(outcome))) => {
            if outcome == JobOutcome::Completed {
                info!("motion job completed");
            }
            Ok(())
        }
        Some(Ok(Err(err))) => Err(err.context("Motion worker failed")),
        Some(Err(())) => Err(anyhow!("motion worker panicked")),
        None => Ok(()),
    };
    let perception_result = finish_perception(perception_result);
    motion_result.and(perception_result)
}

type Joined<T> = Option<Result<T, ()>>;

/// Wait up to `grace` for a worker; one still running afterwards is detached.
fn join_with_grace<T>(name: &str, handle: thread::JoinHandle<T>, grace: Duration) -> Joined<T> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} worker still running after {grace:?}; detaching it");
            return None;
        }
        thread::sleep(GRACE_POLL);
    }
    Some(handle.join().map_err(|_| ()))
}

fn finish_perception(joined: Joined<Result<()>>) -> Result<()> {
    match joined {
        Some(Ok(result)) => result.context("Perception worker failed"),
        Some(Err(())) => Err(anyhow!("perception worker panicked")),
        None => Ok(()),
    }
}
