//! Distance classification and the two-threshold pause/resume state machine.
//!
//! A hand closer than the danger distance halts the arm. Resuming requires the
//! hand to back off past the larger clear distance; a single threshold would
//! flap between halt and resume while the hand hovers at the boundary.

use serde::Serialize;

use crate::{error::ConfigError, observation::SafetyObservation};

pub const DEFAULT_DANGER_DISTANCE_M: f64 = 0.20;
pub const DEFAULT_CLEAR_DISTANCE_M: f64 = 0.25;
pub const DEFAULT_SLOWDOWN_FACTOR: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyState {
    Safe,
    Caution,
    Danger,
}

impl SafetyState {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyState::Safe => "SAFE",
            SafetyState::Caution => "CAUTION",
            SafetyState::Danger => "DANGER",
        }
    }

    /// Numeric level exported as a gauge.
    pub fn level(self) -> f64 {
        match self {
            SafetyState::Safe => 0.0,
            SafetyState::Caution => 1.0,
            SafetyState::Danger => 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetyThresholds {
    danger_m: f64,
    clear_m: f64,
}

impl SafetyThresholds {
    pub fn new(danger_m: f64, clear_m: f64) -> Result<Self, ConfigError> {
        if !(danger_m.is_finite() && clear_m.is_finite() && danger_m > 0.0 && clear_m > 0.0) {
            return Err(ConfigError::NonPositiveDistance { danger_m, clear_m });
        }
        if danger_m >= clear_m {
            return Err(ConfigError::ThresholdOrder { danger_m, clear_m });
        }
        Ok(Self { danger_m, clear_m })
    }

    pub fn danger_m(&self) -> f64 {
        self.danger_m
    }

    pub fn clear_m(&self) -> f64 {
        self.clear_m
    }

    /// `d < danger` is DANGER, `danger <= d < clear` is CAUTION, otherwise SAFE.
    pub fn classify(&self, distance_m: f64) -> SafetyState {
        if distance_m < self.danger_m {
            SafetyState::Danger
        } else if distance_m < self.clear_m {
            SafetyState::Caution
        } else {
            SafetyState::Safe
        }
    }
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            danger_m: DEFAULT_DANGER_DISTANCE_M,
            clear_m: DEFAULT_CLEAR_DISTANCE_M,
        }
    }
}

/// Velocity scaling applied while a hand is inside the workspace zone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlowdownPolicy {
    enabled: bool,
    factor: f64,
}

impl SlowdownPolicy {
    pub fn new(enabled: bool, factor: f64) -> Result<Self, ConfigError> {
        if !(factor.is_finite() && factor > 0.0 && factor <= 1.0) {
            return Err(ConfigError::SlowdownFactor(factor));
        }
        Ok(Self { enabled, factor })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            factor: 1.0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for SlowdownPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: DEFAULT_SLOWDOWN_FACTOR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SafetyArbiter {
    thresholds: SafetyThresholds,
    slowdown: SlowdownPolicy,
}

impl SafetyArbiter {
    pub fn new(thresholds: SafetyThresholds, slowdown: SlowdownPolicy) -> Self {
        Self {
            thresholds,
            slowdown,
        }
    }

    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    pub fn slowdown(&self) -> &SlowdownPolicy {
        &self.slowdown
    }

    /// No hand in view counts as SAFE.
    pub fn state(&self, obs: &SafetyObservation) -> SafetyState {
        if obs.hand_detected {
            self.thresholds.classify(obs.distance_m)
        } else {
            SafetyState::Safe
        }
    }

    /// Whether a new motion primitive may start.
    pub fn is_safe(&self, obs: &SafetyObservation) -> bool {
        !obs.hand_detected || obs.distance_m >= self.thresholds.danger_m
    }

    /// Whether a paused arm may resume.
    pub fn is_clear(&self, obs: &SafetyObservation) -> bool {
        !obs.hand_detected || obs.distance_m >= self.thresholds.clear_m
    }

    /// Slowdown flag for a hand whose reference keypoint is (not) in the zone.
    pub fn slowdown_for(&self, hand_in_zone: bool) -> bool {
        self.slowdown.enabled && hand_in_zone
    }

    pub fn velocity_scale(&self, obs: &SafetyObservation) -> f64 {
        if self.slowdown.enabled && obs.slowdown {
            self.slowdown.factor
        } else {
            1.0
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Running and still safe.
    Proceed,
    /// Just became unsafe: stop the arm and pause.
    Halt,
    /// Paused and not yet clear.
    Hold,
    /// Paused and now clear: leave the pause.
    Resume,
}

/// Pause/resume memory. Pure: it reads observations and never sleeps.
#[derive(Clone, Copy, Debug, Default)]
pub struct HysteresisGate {
    paused: bool,
}

impl HysteresisGate {
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Enter the paused state after a halt issued outside [`evaluate`](Self::evaluate).
    /// Returns `false` when already paused.
    pub fn force_pause(&mut self) -> bool {
        !std::mem::replace(&mut self.paused, true)
    }

    pub fn evaluate(&mut self, arbiter: &SafetyArbiter, obs: &SafetyObservation) -> GateDecision {
        if self.paused {
            if arbiter.is_clear(obs) {
                self.paused = false;
                GateDecision::Resume
            } else {
                GateDecision::Hold
            }
        } else if arbiter.is_safe(obs) {
            GateDecision::Proceed
        } else {
            self.paused = true;
            GateDecision::Halt
        }
    }
}
