// src/decision.rs
//
// Decision-point detection.
//
// Per controller we remember the last observed phase and when it started.
// A phase change resets the start time. A green phase is at a decision
// point when its elapsed time reaches min green (within tolerance) or any
// whole number of decision intervals after that.

use std::collections::HashMap;

use crate::types::{PhaseIndex, SimTime};

/// Phase-timing state of one controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTracker {
    pub last_phase: PhaseIndex,
    pub phase_start_time: SimTime,
}

/// Tracks phase-elapsed time for every controller in one run.
#[derive(Debug, Clone)]
pub struct DecisionPointDetector {
    decision_interval: f64,
    tolerance: f64,
    trackers: HashMap<String, PhaseTracker>,
}

impl DecisionPointDetector {
    pub fn new(decision_interval: f64, tolerance: f64) -> Self {
        Self {
            decision_interval,
            tolerance,
            trackers: HashMap::new(),
        }
    }

    pub fn decision_interval(&self) -> f64 {
        self.decision_interval
    }

    /// Record the phase seen at `now` and return green-elapsed seconds.
    ///
    /// The first observation of a controller counts as a phase start.
    pub fn observe(&mut self, tls: &str, now: SimTime, phase: PhaseIndex) -> f64 {
        let tracker = self
            .trackers
            .entry(tls.to_string())
            .or_insert(PhaseTracker {
                last_phase: phase,
                phase_start_time: now,
            });
        if tracker.last_phase != phase {
            tracker.last_phase = phase;
            tracker.phase_start_time = now;
        }
        now - tracker.phase_start_time
    }

    /// Seed a controller's tracker with a known phase start, e.g. after
    /// warmup when the phase began before observation started.
    pub fn prime(&mut self, tls: &str, phase: PhaseIndex, phase_start_time: SimTime) {
        self.trackers.insert(
            tls.to_string(),
            PhaseTracker {
                last_phase: phase,
                phase_start_time,
            },
        );
    }

    pub fn tracker(&self, tls: &str) -> Option<&PhaseTracker> {
        self.trackers.get(tls)
    }

    /// Whether `elapsed` seconds into a green phase is a decision point.
    pub fn is_decision_point(&self, elapsed: f64, min_green: f64) -> bool {
        is_decision_point(elapsed, min_green, self.decision_interval, self.tolerance)
    }
}

/// Decision-point test.
///
/// True iff `|elapsed - min_green| < tolerance`, or `elapsed > min_green` and
/// `(elapsed - min_green) mod interval` lies within `tolerance` of 0 or of
/// `interval`.
pub fn is_decision_point(elapsed: f64, min_green: f64, interval: f64, tolerance: f64) -> bool {
    if (elapsed - min_green).abs() < tolerance {
        return true;
    }
    if elapsed <= min_green || interval <= 0.0 {
        return false;
    }
    let rem = (elapsed - min_green).rem_euclid(interval);
    rem < tolerance || (interval - rem) < tolerance
}
