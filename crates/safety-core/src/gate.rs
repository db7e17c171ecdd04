//! Blocking admission check run before every motion primitive.

use std::{
    thread,
    time::{Duration, Instant},
};

use sensor_ingest::DriverError;
use tracing::{error, info, warn};

use crate::{
    arbiter::{GateDecision, HysteresisGate, SafetyArbiter},
    bus::{CoordinationBus, MotionWriter},
    events::EventKind,
    observation::SafetyObservation,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GateOutcome {
    Proceed {
        velocity_scale: f64,
        /// Set when the call had to wait for the hand to clear.
        paused_for: Option<Duration>,
    },
    Stopped,
}

/// Owns the motion-side cells and the pause memory.
pub struct MotionGate {
    bus: CoordinationBus,
    writer: MotionWriter,
    arbiter: SafetyArbiter,
    hysteresis: HysteresisGate,
    poll_interval: Duration,
}

impl MotionGate {
    pub fn new(
        bus: CoordinationBus,
        writer: MotionWriter,
        arbiter: SafetyArbiter,
        poll_interval: Duration,
    ) -> Self {
        Self {
            bus,
            writer,
            arbiter,
            hysteresis: HysteresisGate::default(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn arbiter(&self) -> &SafetyArbiter {
        &self.arbiter
    }

    pub fn writer(&self) -> &MotionWriter {
        &self.writer
    }

    pub fn bus(&self) -> &CoordinationBus {
        &self.bus
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_paused(&self) -> bool {
        self.hysteresis.is_paused()
    }

    pub fn observation(&self) -> SafetyObservation {
        self.bus.region().observation()
    }

    /// Whether the latest observation allows motion to continue.
    pub fn is_safe_now(&self) -> bool {
        self.arbiter.is_safe(&self.observation())
    }

    /// Block until the next primitive may start.
    ///
    /// An unsafe observation calls `halt` once (a failed halt is logged and
    /// the gate still pauses), then polls every `poll_interval` until the hand
    /// is past the clear distance. Returns [`GateOutcome::Stopped`] as soon as
    /// a stop is requested.
    pub fn acquire<H>(&mut self, mut halt: H) -> GateOutcome
    where
        H: FnMut() -> Result<(), DriverError>,
    {
        let mut paused_at: Option<Instant> = None;
        loop {
            if self.bus.stop().is_requested() {
                return GateOutcome::Stopped;
            }

            let obs = self.bus.region().observation();
            match self.hysteresis.evaluate(&self.arbiter, &obs) {
                GateDecision::Proceed => {
                    return GateOutcome::Proceed {
                        velocity_scale: self.arbiter.velocity_scale(&obs),
                        paused_for: paused_at.map(|at| at.elapsed()),
                    };
                }
                GateDecision::Resume => {
                    self.writer.set_paused(false);
                    let waited = paused_at.map(|at| at.elapsed());
                    info!(
                        distance_m = obs.distance_m,
                        waited_ms = waited.map(|w| w.as_millis() as u64),
                        "hand cleared, resuming"
                    );
                    self.bus.events().record(
                        EventKind::Resume,
                        if obs.hand_detected {
                            format!("Resumed, hand at {:.1} cm", obs.distance_m * 100.0)
                        } else {
                            "Resumed, no hand in view".to_string()
                        },
                    );
                    return GateOutcome::Proceed {
                        velocity_scale: self.arbiter.velocity_scale(&obs),
                        paused_for: waited,
                    };
                }
                GateDecision::Halt => {
                    paused_at.get_or_insert_with(Instant::now);
                    self.pause(&obs, &mut halt);
                }
                GateDecision::Hold => {
                    paused_at.get_or_insert_with(Instant::now);
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Commit a halt issued outside [`acquire`](Self::acquire), so the next
    /// acquire waits for the clear distance.
    pub fn record_halt(&mut self) {
        if self.hysteresis.force_pause() {
            let obs = self.observation();
            warn!(distance_m = obs.distance_m, "motion halted in flight");
            self.mark_paused(&obs);
        }
    }

    fn pause<H>(&mut self, obs: &SafetyObservation, halt: &mut H)
    where
        H: FnMut() -> Result<(), DriverError>,
    {
        warn!(distance_m = obs.distance_m, "hand in danger zone, halting");
        if let Err(err) = halt() {
            error!(error = %err, "halt request failed");
            self.bus
                .events()
                .record(EventKind::Error, format!("Halt failed: {err}"));
        }
        self.mark_paused(obs);
    }

    fn mark_paused(&self, obs: &SafetyObservation) {
        self.writer.set_paused(true);
        self.bus.events().record(
            EventKind::Danger,
            format!("Paused, hand at {:.1} cm", obs.distance_m * 100.0),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use sensor_ingest::Pixel;

    use super::*;
    use crate::bus::StopReason;

    fn hand_at(distance_m: f64) -> SafetyObservation {
        SafetyObservation {
            hand_detected: true,
            distance_m,
            nearest_keypoint: Some(Pixel::new(1.0, 1.0)),
            hand_in_zone: false,
            slowdown: false,
        }
    }

    fn gate(bus: &CoordinationBus) -> MotionGate {
        MotionGate::new(
            bus.clone(),
            bus.take_motion_writer().unwrap(),
            SafetyArbiter::default(),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn proceeds_immediately_without_hand() {
        let bus = CoordinationBus::new();
        let mut gate = gate(&bus);
        let outcome = gate.acquire(|| panic!("no halt expected"));
        assert_eq!(
            outcome,
            GateOutcome::Proceed {
                velocity_scale: 1.0,
                paused_for: None
            }
        );
    }

    #[test]
    fn slowdown_scales_velocity() {
        let bus = CoordinationBus::new();
        let writer = bus.take_perception_writer().unwrap();
        writer.publish_observation(&SafetyObservation {
            hand_in_zone: true,
            slowdown: true,
            ..hand_at(0.8)
        });
        let mut gate = gate(&bus);
        match gate.acquire(|| Ok(())) {
            GateOutcome::Proceed { velocity_scale, .. } => assert_eq!(velocity_scale, 0.7),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stop_releases_a_paused_gate() {
        let bus = CoordinationBus::new();
        bus.take_perception_writer()
            .unwrap()
            .publish_observation(&hand_at(0.05));
        let halts = Arc::new(AtomicUsize::new(0));
        let stopper = bus.clone();
        let waiter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop().request(StopReason::EmergencyStop);
        });
        let mut gate = gate(&bus);
        let counter = halts.clone();
        let outcome = gate.acquire(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::Motion {
                reason: "controller offline".into(),
            })
        });
        waiter.join().unwrap();
        assert_eq!(outcome, GateOutcome::Stopped);
        assert_eq!(halts.load(Ordering::SeqCst), 1);
        assert!(bus.region().robot_paused());
        assert!(
            bus.events()
                .recent(10)
                .iter()
                .any(|e| e.kind == EventKind::Error)
        );
    }

    #[test]
    fn recorded_halt_holds_until_clear() {
        let bus = CoordinationBus::new();
        let hand = bus.take_perception_writer().unwrap();
        hand.publish_observation(&hand_at(0.21));
        let mut gate = gate(&bus);

        gate.record_halt();
        assert!(gate.is_paused());
        assert!(bus.region().robot_paused());
        // A second record while paused adds no event.
        gate.record_halt();
        let danger = |bus: &CoordinationBus| {
            bus.events()
                .recent(10)
                .iter()
                .filter(|e| e.kind == EventKind::Danger)
                .count()
        };
        assert_eq!(danger(&bus), 1);

        let clearer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            hand.publish_observation(&hand_at(0.26));
        });
        match gate.acquire(|| panic!("no halt expected")) {
            GateOutcome::Proceed { paused_for, .. } => {
                assert!(paused_for.unwrap() >= Duration::from_millis(20));
            }
            other => panic!("unexpected {other:?}"),
        }
        clearer.join().unwrap();
        assert!(!gate.is_paused());
        assert!(!bus.region().robot_paused());
    }
}
