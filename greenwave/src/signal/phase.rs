// src/signal/phase.rs
//
// Phase program model for one signal controller.

use serde::{Deserialize, Serialize};

use crate::sim::PhaseDef;
use crate::types::PhaseIndex;

/// True iff the signal-state string grants right-of-way to any link.
pub fn is_green_state(state: &str) -> bool {
    state.chars().any(|c| c == 'G' || c == 'g')
}

/// One phase of a controller's program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Position in the controller's program.
    pub index: PhaseIndex,
    /// Per-link signal characters (`r`, `y`, `G`, `g`, ...).
    pub state: String,
    /// Nominal duration (s).
    pub duration: f64,
    /// Static minimum duration (s).
    pub min_dur: f64,
    /// Static maximum duration (s).
    pub max_dur: f64,
    /// Distinct lanes granted right-of-way, in link order.
    pub lanes: Vec<String>,
}

impl Phase {
    /// Build a phase from its program definition and the controller's
    /// per-link lane list (`controlled_lanes[i]` is the incoming lane of
    /// link `i`).
    pub fn from_def(index: PhaseIndex, def: &PhaseDef, controlled_lanes: &[String]) -> Self {
        let mut lanes: Vec<String> = Vec::new();
        for (c, lane) in def.state.chars().zip(controlled_lanes.iter()) {
            if (c == 'G' || c == 'g') && !lanes.iter().any(|l| l == lane) {
                lanes.push(lane.clone());
            }
        }
        Self {
            index,
            state: def.state.clone(),
            duration: def.duration,
            min_dur: def.min_dur,
            max_dur: def.max_dur,
            lanes,
        }
    }

    pub fn is_green(&self) -> bool {
        is_green_state(&self.state)
    }
}

/// Immutable phase program of one controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgram {
    pub tls_id: String,
    pub phases: Vec<Phase>,
    /// Distinct controlled lanes, in link order.
    pub lanes: Vec<String>,
}

impl PhaseProgram {
    pub fn new(tls_id: impl Into<String>, defs: &[PhaseDef], controlled_lanes: &[String]) -> Self {
        let phases = defs
            .iter()
            .enumerate()
            .map(|(i, d)| Phase::from_def(i, d, controlled_lanes))
            .collect();
        let mut lanes: Vec<String> = Vec::new();
        for lane in controlled_lanes {
            if !lanes.contains(lane) {
                lanes.push(lane.clone());
            }
        }
        Self {
            tls_id: tls_id.into(),
            phases,
            lanes,
        }
    }

    pub fn phase(&self, index: PhaseIndex) -> Option<&Phase> {
        self.phases.get(index)
    }

    pub fn is_green(&self, index: PhaseIndex) -> bool {
        self.phase(index).map(Phase::is_green).unwrap_or(false)
    }

    pub fn has_green_phase(&self) -> bool {
        self.phases.iter().any(Phase::is_green)
    }

    /// Green phases in program order: the execution order decisions cycle through.
    pub fn green_order(&self) -> Vec<PhaseIndex> {
        self.phases
            .iter()
            .filter(|p| p.is_green())
            .map(|p| p.index)
            .collect()
    }

    /// Position of `index` inside [`green_order`](Self::green_order).
    pub fn order_position(&self, index: PhaseIndex) -> Option<usize> {
        self.green_order().iter().position(|&p| p == index)
    }

    /// Next green phase after `current`, wrapping cyclically.
    ///
    /// For a non-green `current` (yellow / all-red) this is the first green
    /// phase that follows it in program order.
    pub fn next_green(&self, current: PhaseIndex) -> Option<PhaseIndex> {
        next_in_order(&self.green_order(), current)
    }
}

/// Next entry after `current` in a cyclic phase order.
pub(crate) fn next_in_order(order: &[PhaseIndex], current: PhaseIndex) -> Option<PhaseIndex> {
    if order.is_empty() {
        return None;
    }
    match order.iter().position(|&p| p == current) {
        Some(pos) => Some(order[(pos + 1) % order.len()]),
        None => Some(
            order
                .iter()
                .copied()
                .find(|&p| p > current)
                .unwrap_or(order[0]),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(state: &str) -> PhaseDef {
        PhaseDef {
            duration: 30.0,
            state: state.to_string(),
            min_dur: 10.0,
            max_dur: 60.0,
        }
    }

    fn four_phase() -> PhaseProgram {
        let lanes: Vec<String> = ["n_0", "n_0", "e_0", "e_0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        PhaseProgram::new(
            "J1",
            &[def("GGrr"), def("yyrr"), def("rrGG"), def("rryy")],
            &lanes,
        )
    }

    #[test]
    fn green_detection_uses_both_cases() {
        assert!(is_green_state("rrGr"));
        assert!(is_green_state("rrgr"));
        assert!(!is_green_state("yyrr"));
        assert!(!is_green_state(""));
    }

    #[test]
    fn lanes_follow_green_links() {
        let prog = four_phase();
        assert_eq!(prog.phases[0].lanes, vec!["n_0".to_string()]);
        assert_eq!(prog.phases[2].lanes, vec!["e_0".to_string()]);
        assert!(prog.phases[1].lanes.is_empty());
        assert_eq!(prog.lanes.len(), 2);
    }

    #[test]
    fn green_order_and_cycling() {
        let prog = four_phase();
        assert_eq!(prog.green_order(), vec![0, 2]);
        assert_eq!(prog.order_position(2), Some(1));
        assert_eq!(prog.next_green(0), Some(2));
        assert_eq!(prog.next_green(2), Some(0));
        // From yellow 1 the next green is 2; from yellow 3 it wraps to 0.
        assert_eq!(prog.next_green(1), Some(2));
        assert_eq!(prog.next_green(3), Some(0));
    }

    #[test]
    fn no_green_phases() {
        let prog = PhaseProgram::new("J2", &[def("rrrr")], &[]);
        assert!(!prog.has_green_phase());
        assert_eq!(prog.next_green(0), None);
    }
}
