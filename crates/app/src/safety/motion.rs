//! Motion worker: runs the drawing job one gated primitive at a time.
//!
//! Every primitive passes the [`MotionGate`] before it starts, and a guard
//! thread watches the bus while it is in flight, halting the arm as soon as a
//! hand comes within the danger distance. A halted primitive is re-gated and
//! retried from the arm's current position.

use std::{
    f64::consts::TAU,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use safety_core::{BusError, CoordinationBus, EventKind, GateOutcome, MotionGate, StopReason};
use sensor_ingest::{DriverError, Gripper, MotionDriver, MotionOutcome, MotionTarget, Pose};
use tracing::{error, info, warn};

use crate::safety::telemetry;

pub(crate) const HOME_JOINTS: [f64; 6] = [0.0, 0.0, 90.0, 90.0, 90.0, 0.0];
pub(crate) const START_POSE: Pose = Pose::new(350.0, -100.0, 45.0, 86.0, 93.0, 89.0);
const MOVE_VELOCITY: f64 = 50.0;
const DRAW_VELOCITY: f64 = 20.0;
const ACCELERATION: f64 = 50.0;
const GRIPPER_CLOSE: u32 = 643;
const GRIPPER_OPEN: u32 = 633;
const GRIPPER_SETTLE: Duration = Duration::from_millis(500);
const READY_POLL: Duration = Duration::from_millis(100);

/// Helix traced around the start pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct HelixJob {
    pub(crate) start: Pose,
    /// Millimetres.
    pub(crate) radius: f64,
    pub(crate) turns: u32,
    pub(crate) points_per_turn: u32,
    /// Millimetres of rise per full turn.
    pub(crate) z_per_turn: f64,
}

impl Default for HelixJob {
    fn default() -> Self {
        Self {
            start: START_POSE,
            radius: 25.0,
            turns: 5,
            points_per_turn: 60,
            z_per_turn: 1.2,
        }
    }
}

impl HelixJob {
    /// First point on the circle, reached at move velocity.
    pub(crate) fn approach(&self) -> Pose {
        Pose {
            x: self.start.x + self.radius,
            ..self.start
        }
    }

    pub(crate) fn waypoints(&self) -> Vec<Pose> {
        let points = self.points_per_turn.max(1);
        let total = self.turns * points;
        let angle_step = TAU / points as f64;
        let z_step = self.z_per_turn / points as f64;
        (1..=total)
            .map(|i| {
                let angle = angle_step * i as f64;
                Pose {
                    x: self.start.x + self.radius * angle.cos(),
                    y: self.start.y + self.radius * angle.sin(),
                    z: self.start.z + z_step * i as f64,
                    ..self.start
                }
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Completed,
    Stopped,
}

pub(crate) struct MotionWorker {
    pub(crate) gate: MotionGate,
    pub(crate) arm: Arc<dyn MotionDriver>,
    pub(crate) gripper: Option<Box<dyn Gripper>>,
    pub(crate) job: HelixJob,
    pub(crate) camera_ready_timeout: Duration,
}

pub(crate) fn spawn_motion_worker(
    worker: MotionWorker,
) -> io::Result<thread::JoinHandle<Result<JobOutcome>>> {
    telemetry::spawn_thread("motion", move || worker.run())
}

impl MotionWorker {
    fn bus(&self) -> &CoordinationBus {
        self.gate.bus()
    }

    fn run(mut self) -> Result<JobOutcome> {
        let bus = self.bus().clone();
        match bus
            .camera_ready()
            .wait_unless_stopped(self.camera_ready_timeout, bus.stop(), READY_POLL)
        {
            Ok(()) => info!("camera ready, starting {} job", self.arm.name()),
            Err(BusError::Stopped) => return Ok(JobOutcome::Stopped),
            Err(err) => return Err(err).context("Motion worker gave up waiting for the camera"),
        }

        self.init_gripper();
        let outcome = self.execute();
        if let Err(err) = &outcome {
            error!("motion job failed: {err:#}");
            bus.events()
                .record(EventKind::Error, format!("Motion fault: {err:#}"));
        }

        self.return_home();
        if let Some(gripper) = self.gripper.as_mut() {
            gripper.terminate();
        }
        match &outcome {
            Ok(JobOutcome::Completed) => bus.stop().request(StopReason::JobComplete),
            Ok(JobOutcome::Stopped) => {}
            Err(_) => bus.stop().request(StopReason::WorkerExited("motion")),
        }
        info!("motion worker stopped");
        outcome
    }

    fn init_gripper(&mut self) {
        if let Some(mut gripper) = self.gripper.take() {
            match gripper.initialize() {
                Ok(()) => {
                    self.settle();
                    self.gripper = Some(gripper);
                }
                Err(err) => {
                    warn!("gripper initialisation failed, continuing without it: {err}");
                    self.bus()
                        .events()
                        .record(EventKind::Warning, format!("Gripper disabled: {err}"));
                }
            }
        }
    }

    fn execute(&mut self) -> Result<JobOutcome> {
        let job = self.job;
        let steps = [
            (MotionTarget::Joints(HOME_JOINTS), MOVE_VELOCITY),
            (MotionTarget::Linear(job.start), MOVE_VELOCITY),
        ];
        for (target, velocity) in steps {
            if self.guarded_move(&target, velocity)? == JobOutcome::Stopped {
                return Ok(JobOutcome::Stopped);
            }
        }

        self.gripper_to(GRIPPER_CLOSE);
        if self.guarded_move(&MotionTarget::Linear(job.approach()), MOVE_VELOCITY)?
            == JobOutcome::Stopped
        {
            return Ok(JobOutcome::Stopped);
        }

        let waypoints = job.waypoints();
        let total = waypoints.len();
        for (i, pose) in waypoints.into_iter().enumerate() {
            if self.bus().stop().is_requested() {
                return Ok(JobOutcome::Stopped);
            }
            let progress = (i + 1) as f64 / total as f64 * 100.0;
            self.gate.writer().set_progress(progress);
            let _span = tracing::info_span!("motion.segment", index = i, progress).entered();
            if self.guarded_move(&MotionTarget::Linear(pose), DRAW_VELOCITY)? == JobOutcome::Stopped
            {
                return Ok(JobOutcome::Stopped);
            }
        }

        self.gripper_to(GRIPPER_OPEN);
        info!("helix job complete ({total} segments)");
        self.bus()
            .events()
            .record(EventKind::Info, "Motion job complete");
        Ok(JobOutcome::Completed)
    }

    /// Gate, move, and retry after an in-flight halt until the primitive
    /// completes or a stop is requested.
    fn guarded_move(&mut self, target: &MotionTarget, velocity: f64) -> Result<JobOutcome> {
        loop {
            let arm = self.arm.clone();
            let scale = match self.gate.acquire(|| arm.halt_current_motion()) {
                GateOutcome::Proceed {
                    velocity_scale,
                    paused_for,
                } => {
                    if paused_for.is_some() {
                        metrics::counter!(telemetry::MOTION_PAUSES).increment(1);
                    }
                    velocity_scale
                }
                GateOutcome::Stopped => return Ok(JobOutcome::Stopped),
            };

            let outcome = self
                .move_watched(target, velocity * scale, true)
                .with_context(|| format!("{} failed to reach {target:?}", self.arm.name()))?;
            if outcome == MotionOutcome::Completed {
                return Ok(JobOutcome::Completed);
            }
            if !self.bus().stop().is_requested() {
                self.gate.record_halt();
            }
        }
    }

    /// Issue one primitive while a scoped guard thread halts it whenever the
    /// latest observation is unsafe (or, with `halt_on_stop`, once a stop is
    /// requested).
    fn move_watched(
        &self,
        target: &MotionTarget,
        velocity: f64,
        halt_on_stop: bool,
    ) -> Result<MotionOutcome, DriverError> {
        let done = AtomicBool::new(false);
        let arm = self.arm.as_ref();
        let bus = self.bus();
        let arbiter = self.gate.arbiter();
        let poll = self.gate.poll_interval();
        let dispatch = tracing::dispatcher::get_default(|current| current.clone());

        thread::scope(|scope| {
            let done = &done;
            scope.spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    let mut halted = false;
                    while !done.load(Ordering::SeqCst) {
                        let stop = halt_on_stop && bus.stop().is_requested();
                        if stop || !arbiter.is_safe(&bus.region().observation()) {
                            // Re-issued every poll: a halt that lands before the
                            // driver starts the move would otherwise be lost.
                            match arm.halt_current_motion() {
                                Ok(()) if !halted => {
                                    warn!(stop, "halting in-flight motion");
                                    halted = true;
                                }
                                Ok(()) => {}
                                Err(err) => {
                                    error!("in-flight halt failed: {err}");
                                    bus.events()
                                        .record(EventKind::Error, format!("Halt failed: {err}"));
                                }
                            }
                        }
                        thread::sleep(poll);
                    }
                })
            });
            let result = arm.move_to(target, velocity, ACCELERATION);
            done.store(true, Ordering::SeqCst);
            result
        })
    }

    /// Home after the job. After a stop the arm only moves if the latest
    /// observation is safe, and the guard still halts it on danger.
    fn return_home(&mut self) {
        if self.bus().stop().is_requested() && !self.gate.is_safe_now() {
            warn!("stop requested with a hand in the danger zone; not homing");
            self.bus()
                .events()
                .record(EventKind::Warning, "Homing skipped, hand too close");
            return;
        }
        let home = MotionTarget::Joints(HOME_JOINTS);
        match self.move_watched(&home, MOVE_VELOCITY, false) {
            Ok(MotionOutcome::Completed) => info!("arm homed"),
            Ok(MotionOutcome::Halted) => {
                warn!("homing halted by the safety guard");
                self.gate.record_halt();
                self.bus()
                    .events()
                    .record(EventKind::Warning, "Homing halted, hand too close");
            }
            Err(err) => {
                error!("homing failed: {err}");
                self.bus()
                    .events()
                    .record(EventKind::Error, format!("Homing failed: {err}"));
            }
        }
        self.gate.writer().set_paused(self.gate.is_paused());
    }

    fn gripper_to(&mut self, position: u32) {
        let Some(gripper) = self.gripper.as_mut() else {
            return;
        };
        match gripper.move_to(position) {
            Ok(()) => self.settle(),
            Err(err) => {
                warn!("gripper move to {position} failed: {err}");
                self.gate
                    .bus()
                    .events()
                    .record(EventKind::Warning, format!("Gripper fault: {err}"));
            }
        }
    }

    /// Wait out the gripper stroke, returning early on a stop.
    fn settle(&self) {
        let deadline = Instant::now() + GRIPPER_SETTLE;
        let stop = self.bus().stop();
        while !stop.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.gate.poll_interval().min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicUsize};

    use pretty_assertions::assert_eq;
    use safety_core::{PerceptionWriter, SafetyArbiter, SafetyObservation};
    use sensor_ingest::{
        Pixel,
        sim::{SimGripper, SimMotionDriver},
    };

    use super::*;

    fn small_job() -> HelixJob {
        HelixJob {
            turns: 1,
            points_per_turn: 4,
            ..HelixJob::default()
        }
    }

    fn worker(bus: &CoordinationBus, arm: Arc<dyn MotionDriver>) -> MotionWorker {
        MotionWorker {
            gate: MotionGate::new(
                bus.clone(),
                bus.take_motion_writer().unwrap(),
                SafetyArbiter::default(),
                Duration::from_millis(1),
            ),
            arm,
            gripper: None,
            job: small_job(),
            camera_ready_timeout: Duration::from_secs(1),
        }
    }

    fn hand_at(distance_m: f64) -> SafetyObservation {
        SafetyObservation {
            hand_detected: true,
            distance_m,
            nearest_keypoint: Some(Pixel::new(1.0, 1.0)),
            hand_in_zone: false,
            slowdown: false,
        }
    }

    struct RecordingArm {
        targets: Mutex<Vec<MotionTarget>>,
        fail_after: usize,
    }

    impl MotionDriver for RecordingArm {
        fn name(&self) -> &str {
            "recording-arm"
        }

        fn move_to(
            &self,
            target: &MotionTarget,
            _velocity: f64,
            _acceleration: f64,
        ) -> Result<MotionOutcome, DriverError> {
            let mut targets = self.targets.lock().unwrap();
            targets.push(*target);
            if targets.len() > self.fail_after && !matches!(target, MotionTarget::Joints(_)) {
                return Err(DriverError::Motion {
                    reason: "joint limit".into(),
                });
            }
            Ok(MotionOutcome::Completed)
        }

        fn halt_current_motion(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[test]
    fn helix_rises_one_pitch_per_turn() {
        let job = HelixJob::default();
        let points = job.waypoints();
        assert_eq!(points.len(), 300);
        let last = points[points.len() - 1];
        assert!((last.z - (job.start.z + 5.0 * 1.2)).abs() < 1e-9);
        assert!((last.x - job.approach().x).abs() < 1e-9);
        assert!((last.y - job.start.y).abs() < 1e-9);
        for p in &points {
            let r = (p.x - job.start.x).hypot(p.y - job.start.y);
            assert!((r - 25.0).abs() < 1e-9);
        }
    }

    #[test]
    fn completes_job_and_reports_progress() {
        let bus = CoordinationBus::new();
        bus.camera_ready().set();
        let arm = Arc::new(SimMotionDriver::new(0.0001));
        let outcome = spawn_motion_worker(worker(&bus, arm))
            .unwrap()
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(bus.region().progress_percent(), 100.0);
        assert!(!bus.region().robot_paused());
    }

    #[test]
    fn motion_fault_homes_before_failing() {
        let bus = CoordinationBus::new();
        bus.camera_ready().set();
        let arm = Arc::new(RecordingArm {
            targets: Mutex::new(Vec::new()),
            fail_after: 3,
        });
        let result = spawn_motion_worker(worker(&bus, arm.clone()))
            .unwrap()
            .join()
            .unwrap();
        assert!(result.is_err());
        let targets = arm.targets.lock().unwrap();
        assert_eq!(targets.last(), Some(&MotionTarget::Joints(HOME_JOINTS)));
        assert!(
            bus.events()
                .recent(10)
                .iter()
                .any(|e| e.kind == EventKind::Error)
        );
    }

    #[test]
    fn camera_timeout_is_an_error() {
        let bus = CoordinationBus::new();
        let mut w = worker(&bus, Arc::new(SimMotionDriver::new(0.0001)));
        w.camera_ready_timeout = Duration::from_millis(20);
        let result = spawn_motion_worker(w).unwrap().join().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn hand_in_danger_holds_the_job_until_stop() {
        let bus = CoordinationBus::new();
        bus.camera_ready().set();
        bus.take_perception_writer()
            .unwrap()
            .publish_observation(&hand_at(0.05));
        let arm = Arc::new(RecordingArm {
            targets: Mutex::new(Vec::new()),
            fail_after: usize::MAX,
        });
        let handle = spawn_motion_worker(worker(&bus, arm.clone())).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(bus.region().robot_paused());
        assert!(arm.targets.lock().unwrap().is_empty());

        bus.stop().request(StopReason::EmergencyStop);
        assert_eq!(handle.join().unwrap().unwrap(), JobOutcome::Stopped);
        // Not homed: the hand is still in the danger zone.
        assert!(arm.targets.lock().unwrap().is_empty());
    }

    /// Arm whose first move is interrupted by a hand that then settles
    /// between the danger and clear distances.
    struct BreachingArm {
        hand: Mutex<PerceptionWriter>,
        halted: AtomicBool,
        calls: AtomicUsize,
    }

    impl MotionDriver for BreachingArm {
        fn name(&self) -> &str {
            "breaching-arm"
        }

        fn move_to(
            &self,
            _target: &MotionTarget,
            _velocity: f64,
            _acceleration: f64,
        ) -> Result<MotionOutcome, DriverError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Ok(MotionOutcome::Completed);
            }
            let hand = self.hand.lock().unwrap();
            hand.publish_observation(&hand_at(0.10));
            let deadline = Instant::now() + Duration::from_secs(2);
            while !self.halted.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            hand.publish_observation(&hand_at(0.21));
            Ok(MotionOutcome::Halted)
        }

        fn halt_current_motion(&self) -> Result<(), DriverError> {
            self.halted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn in_flight_halt_waits_for_clear_distance() {
        let bus = CoordinationBus::new();
        bus.camera_ready().set();
        let arm = Arc::new(BreachingArm {
            hand: Mutex::new(bus.take_perception_writer().unwrap()),
            halted: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let handle = spawn_motion_worker(worker(&bus, arm.clone())).unwrap();
        thread::sleep(Duration::from_millis(100));
        // 0.21 m is outside the danger zone but short of the clear distance.
        assert_eq!(arm.calls.load(Ordering::SeqCst), 1);
        assert!(bus.region().robot_paused());

        arm.hand.lock().unwrap().publish_observation(&hand_at(0.26));
        assert_eq!(handle.join().unwrap().unwrap(), JobOutcome::Completed);
        assert!(arm.calls.load(Ordering::SeqCst) > 1);
        assert!(!bus.region().robot_paused());
    }

    #[test]
    fn homing_keeps_pause_while_hand_is_near() {
        let bus = CoordinationBus::new();
        bus.camera_ready().set();
        let hand = bus.take_perception_writer().unwrap();
        hand.publish_observation(&hand_at(0.10));
        let arm = Arc::new(RecordingArm {
            targets: Mutex::new(Vec::new()),
            fail_after: usize::MAX,
        });
        let handle = spawn_motion_worker(worker(&bus, arm.clone())).unwrap();
        thread::sleep(Duration::from_millis(50));
        hand.publish_observation(&hand_at(0.21));
        bus.stop().request(StopReason::EmergencyStop);

        assert_eq!(handle.join().unwrap().unwrap(), JobOutcome::Stopped);
        assert_eq!(
            arm.targets.lock().unwrap().last(),
            Some(&MotionTarget::Joints(HOME_JOINTS))
        );
        assert!(bus.region().robot_paused());
    }

    #[test]
    fn gripper_settle_returns_on_stop() {
        let bus = CoordinationBus::new();
        let mut w = worker(&bus, Arc::new(SimMotionDriver::new(0.0001)));
        w.gripper = Some(Box::new(SimGripper::default()));
        bus.stop().request(StopReason::EmergencyStop);

        let started = Instant::now();
        w.init_gripper();
        w.gripper_to(GRIPPER_CLOSE);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(w.gripper.is_some());
    }
}
