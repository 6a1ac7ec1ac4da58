// src/baseline.rs
//
// Max-pressure baseline policy.
//
// Deterministic, no learned parameters. Used as the comparison point in
// relative reward mode and for agreement statistics.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::BaselineConfig;
use crate::types::{Decision, PhaseIndex};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BaselineError {
    /// The current phase has no entry in the queue map. This is an upstream
    /// data bug and halts processing of the sample.
    #[error("current phase {phase} missing from queue data (known phases: {known:?})")]
    UnknownPhase {
        phase: PhaseIndex,
        known: Vec<PhaseIndex>,
    },
}

/// Max-pressure decision function.
#[derive(Debug, Clone, Default)]
pub struct MaxPressure {
    cfg: BaselineConfig,
}

impl MaxPressure {
    pub fn new(cfg: BaselineConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.cfg
    }

    /// Decide extend/switch for the current phase.
    ///
    /// Checks, in order: single phase (extend), min-green floor (extend),
    /// max-green ceiling unless overridden (switch), then pressure: extend
    /// iff the current queue is at least the largest other queue plus the
    /// threshold.
    pub fn decide(
        &self,
        current_phase: PhaseIndex,
        queues: &BTreeMap<PhaseIndex, f64>,
        elapsed: f64,
        min_green: f64,
        max_green: f64,
    ) -> Result<Decision, BaselineError> {
        let Some(&current_queue) = queues.get(&current_phase) else {
            return Err(BaselineError::UnknownPhase {
                phase: current_phase,
                known: queues.keys().copied().collect(),
            });
        };

        if queues.len() == 1 {
            return Ok(Decision::Extend);
        }
        if elapsed < min_green + self.cfg.min_green_offset {
            return Ok(Decision::Extend);
        }
        if elapsed >= max_green && !self.cfg.allow_extend_past_max {
            return Ok(Decision::Switch);
        }

        let other_max = queues
            .iter()
            .filter(|(&p, _)| p != current_phase)
            .map(|(_, &q)| q)
            .fold(f64::NEG_INFINITY, f64::max);

        if current_queue >= other_max + self.cfg.pressure_threshold {
            Ok(Decision::Extend)
        } else {
            Ok(Decision::Switch)
        }
    }
}
