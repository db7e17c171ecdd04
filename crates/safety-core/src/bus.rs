//! Coordination bus shared by the perception, motion and status workers.
//!
//! The [`SharedRegion`] is a set of independent atomic cells. There is no lock
//! over the region: each cell is written by exactly one worker and read by any,
//! and readers accept that neighbouring cells may come from different frames.
//! Write access is handed out as owned writer handles ([`PerceptionWriter`],
//! [`MotionWriter`]) that can be taken once per bus, so a second writer for a
//! cell cannot exist.
//!
//! Two signals complete the bus: the one-shot camera-ready latch and the
//! cooperative stop request.

use std::{
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use sensor_ingest::Pixel;
use tracing::{info, warn};

use crate::{
    calibration::CalibrationSummary,
    error::BusError,
    events::EventLog,
    observation::{NO_HAND_DISTANCE_M, SafetyObservation},
};

/// Default tool pixel before the first detection.
pub const INITIAL_TOOL_PIXEL: Pixel = Pixel::new(640.0, 400.0);

/// `f64` cell stored as its bit pattern.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

#[derive(Debug)]
pub struct SharedRegion {
    // perception
    hand_detected: AtomicBool,
    hand_distance_m: AtomicF64,
    nearest_u: AtomicF64,
    nearest_v: AtomicF64,
    tool_u: AtomicF64,
    tool_v: AtomicF64,
    tool_detected: AtomicBool,
    hand_in_zone: AtomicBool,
    slowdown_active: AtomicBool,
    calib_fx: AtomicF64,
    calib_fy: AtomicF64,
    calib_cx: AtomicF64,
    calib_cy: AtomicF64,
    calib_width: AtomicU32,
    calib_height: AtomicU32,
    calib_ok: AtomicBool,
    marker_count: AtomicU32,
    zone_defined: AtomicBool,
    last_frame_ms: AtomicI64,
    // motion
    robot_paused: AtomicBool,
    progress_percent: AtomicF64,
}

impl Default for SharedRegion {
    fn default() -> Self {
        Self {
            hand_detected: AtomicBool::new(false),
            hand_distance_m: AtomicF64::new(NO_HAND_DISTANCE_M),
            nearest_u: AtomicF64::new(f64::NAN),
            nearest_v: AtomicF64::new(f64::NAN),
            tool_u: AtomicF64::new(INITIAL_TOOL_PIXEL.u),
            tool_v: AtomicF64::new(INITIAL_TOOL_PIXEL.v),
            tool_detected: AtomicBool::new(false),
            hand_in_zone: AtomicBool::new(false),
            slowdown_active: AtomicBool::new(false),
            calib_fx: AtomicF64::new(0.0),
            calib_fy: AtomicF64::new(0.0),
            calib_cx: AtomicF64::new(0.0),
            calib_cy: AtomicF64::new(0.0),
            calib_width: AtomicU32::new(0),
            calib_height: AtomicU32::new(0),
            calib_ok: AtomicBool::new(false),
            marker_count: AtomicU32::new(0),
            zone_defined: AtomicBool::new(false),
            last_frame_ms: AtomicI64::new(0),
            robot_paused: AtomicBool::new(false),
            progress_percent: AtomicF64::new(0.0),
        }
    }
}

impl SharedRegion {
    pub fn observation(&self) -> SafetyObservation {
        let hand_detected = self.hand_detected.load(Ordering::Acquire);
        let (u, v) = (self.nearest_u.load(), self.nearest_v.load());
        SafetyObservation {
            hand_detected,
            distance_m: self.hand_distance_m.load(),
            nearest_keypoint: (hand_detected && u.is_finite() && v.is_finite())
                .then_some(Pixel::new(u, v)),
            hand_in_zone: self.hand_in_zone.load(Ordering::Relaxed),
            slowdown: self.slowdown_active.load(Ordering::Relaxed),
        }
    }

    /// Last known tool pixel and whether the latest frame detected it.
    pub fn tool(&self) -> (Pixel, bool) {
        (
            Pixel::new(self.tool_u.load(), self.tool_v.load()),
            self.tool_detected.load(Ordering::Relaxed),
        )
    }

    pub fn calibration(&self) -> CalibrationSummary {
        CalibrationSummary {
            fx: self.calib_fx.load(),
            fy: self.calib_fy.load(),
            cx: self.calib_cx.load(),
            cy: self.calib_cy.load(),
            width: self.calib_width.load(Ordering::Relaxed),
            height: self.calib_height.load(Ordering::Relaxed),
            is_calibrated: self.calib_ok.load(Ordering::Acquire),
        }
    }

    pub fn marker_count(&self) -> u32 {
        self.marker_count.load(Ordering::Relaxed)
    }

    pub fn zone_defined(&self) -> bool {
        self.zone_defined.load(Ordering::Relaxed)
    }

    pub fn last_frame_ms(&self) -> i64 {
        self.last_frame_ms.load(Ordering::Relaxed)
    }

    pub fn robot_paused(&self) -> bool {
        self.robot_paused.load(Ordering::Relaxed)
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress_percent.load()
    }
}

/// Write access to the perception-owned cells.
#[derive(Debug)]
pub struct PerceptionWriter {
    region: Arc<SharedRegion>,
}

impl PerceptionWriter {
    pub fn publish_observation(&self, obs: &SafetyObservation) {
        let r = &self.region;
        let keypoint = obs
            .nearest_keypoint
            .unwrap_or(Pixel::new(f64::NAN, f64::NAN));
        if obs.hand_detected {
            // Distance lands before the flag so a reader never pairs a fresh
            // detection with the no-hand sentinel.
            r.hand_distance_m.store(obs.distance_m);
            r.nearest_u.store(keypoint.u);
            r.nearest_v.store(keypoint.v);
            r.hand_detected.store(true, Ordering::Release);
        } else {
            r.hand_detected.store(false, Ordering::Release);
            r.hand_distance_m.store(obs.distance_m);
            r.nearest_u.store(keypoint.u);
            r.nearest_v.store(keypoint.v);
        }
        r.hand_in_zone.store(obs.hand_in_zone, Ordering::Relaxed);
        r.slowdown_active.store(obs.slowdown, Ordering::Relaxed);
    }

    /// A missed detection keeps the previous position and only drops the flag.
    pub fn publish_tool(&self, tool: Option<Pixel>) {
        match tool {
            Some(pixel) => {
                self.region.tool_u.store(pixel.u);
                self.region.tool_v.store(pixel.v);
                self.region.tool_detected.store(true, Ordering::Relaxed);
            }
            None => self.region.tool_detected.store(false, Ordering::Relaxed),
        }
    }

    pub fn publish_calibration(&self, summary: &CalibrationSummary) {
        let r = &self.region;
        r.calib_fx.store(summary.fx);
        r.calib_fy.store(summary.fy);
        r.calib_cx.store(summary.cx);
        r.calib_cy.store(summary.cy);
        r.calib_width.store(summary.width, Ordering::Relaxed);
        r.calib_height.store(summary.height, Ordering::Relaxed);
        r.calib_ok.store(summary.is_calibrated, Ordering::Release);
    }

    pub fn publish_zone(&self, marker_count: usize, defined: bool) {
        self.region
            .marker_count
            .store(marker_count.min(u32::MAX as usize) as u32, Ordering::Relaxed);
        self.region.zone_defined.store(defined, Ordering::Relaxed);
    }

    pub fn mark_frame(&self, timestamp_ms: i64) {
        self.region
            .last_frame_ms
            .store(timestamp_ms, Ordering::Relaxed);
    }
}

/// Write access to the motion-owned cells.
#[derive(Debug)]
pub struct MotionWriter {
    region: Arc<SharedRegion>,
}

impl MotionWriter {
    pub fn set_paused(&self, paused: bool) {
        self.region.robot_paused.store(paused, Ordering::Relaxed);
    }

    pub fn set_progress(&self, percent: f64) {
        self.region.progress_percent.store(percent.clamp(0.0, 100.0));
    }
}

/// One-shot latch: set once, awaited with a bound.
#[derive(Debug, Default)]
pub struct ReadySignal {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl ReadySignal {
    /// Returns `true` for the call that actually set the latch.
    pub fn set(&self) -> bool {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        if *ready {
            return false;
        }
        *ready = true;
        self.cond.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), BusError> {
        let guard = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard {
            Ok(())
        } else {
            Err(BusError::CameraReadyTimeout(timeout))
        }
    }

    /// Wait in `slice` steps so a stop request cuts the wait short.
    pub fn wait_unless_stopped(
        &self,
        timeout: Duration,
        stop: &StopSignal,
        slice: Duration,
    ) -> Result<(), BusError> {
        let deadline = Instant::now() + timeout;
        loop {
            if stop.is_requested() {
                return Err(BusError::Stopped);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BusError::CameraReadyTimeout(timeout));
            }
            if self.wait_timeout(remaining.min(slice)).is_ok() {
                return Ok(());
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT / SIGTERM.
    Signal,
    /// Operator STOP command.
    EmergencyStop,
    JobComplete,
    WorkerExited(&'static str),
    StartupTimeout,
}

impl StopReason {
    pub fn label(self) -> &'static str {
        match self {
            StopReason::Signal => "termination signal",
            StopReason::EmergencyStop => "emergency stop",
            StopReason::JobComplete => "job complete",
            StopReason::WorkerExited(worker) => worker,
            StopReason::StartupTimeout => "startup timeout",
        }
    }
}

/// Cooperative stop flag. The first reason recorded wins.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    reason: Mutex<Option<StopReason>>,
}

impl StopSignal {
    pub fn request(&self, reason: StopReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("stop requested: {}", reason.label());
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the workers share. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct CoordinationBus {
    region: Arc<SharedRegion>,
    perception_taken: Arc<AtomicBool>,
    motion_taken: Arc<AtomicBool>,
    camera_ready: Arc<ReadySignal>,
    stop: Arc<StopSignal>,
    events: Arc<EventLog>,
}

impl CoordinationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn camera_ready(&self) -> &ReadySignal {
        &self.camera_ready
    }

    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    pub fn stop_handle(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_handle(&self) -> Arc<EventLog> {
        self.events.clone()
    }

    pub fn take_perception_writer(&self) -> Result<PerceptionWriter, BusError> {
        if self.perception_taken.swap(true, Ordering::SeqCst) {
            warn!("second perception writer requested");
            return Err(BusError::WriterTaken("perception"));
        }
        Ok(PerceptionWriter {
            region: self.region.clone(),
        })
    }

    pub fn take_motion_writer(&self) -> Result<MotionWriter, BusError> {
        if self.motion_taken.swap(true, Ordering::SeqCst) {
            warn!("second motion writer requested");
            return Err(BusError::WriterTaken("motion"));
        }
        Ok(MotionWriter {
            region: self.region.clone(),
        })
    }
}
