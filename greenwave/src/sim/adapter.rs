// src/sim/adapter.rs
//
// Forgiving simulation adapter.
//
// Wraps one `Simulator` instance produced by a `SimLauncher`. Every
// simulator failure is logged and mapped to a benign default (zero queue,
// phase 0, `false`) so that one bad call never aborts a generation or
// evaluation run. Callers that care check the boolean results.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{LaunchSpec, SimError, SimLauncher, Simulator};
use crate::signal::{Phase, PhaseProgram};
use crate::types::{PhaseIndex, SimTime};

pub struct SimAdapter {
    launcher: Box<dyn SimLauncher>,
    sim: Option<Box<dyn Simulator>>,
    /// Per-controller phase programs, fetched lazily; static for a run.
    programs: HashMap<String, PhaseProgram>,
}

impl SimAdapter {
    pub fn new(launcher: Box<dyn SimLauncher>) -> Self {
        Self {
            launcher,
            sim: None,
            programs: HashMap::new(),
        }
    }

    pub fn from_spec(spec: &LaunchSpec) -> Self {
        Self::new(spec.launcher())
    }

    pub fn is_running(&self) -> bool {
        self.sim.is_some()
    }

    /// Run `f` against the live simulator, mapping any failure to `default`.
    fn call<T>(
        &mut self,
        what: &str,
        default: T,
        f: impl FnOnce(&mut dyn Simulator) -> Result<T, SimError>,
    ) -> T {
        let Some(sim) = self.sim.as_mut() else {
            log::warn!("[adapter] {what}: simulator not running");
            return default;
        };
        match f(sim.as_mut()) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[adapter] {what} failed on {}: {e}", sim.name());
                default
            }
        }
    }

    /// Launch a fresh instance and advance `warmup_steps` ticks.
    ///
    /// Returns false if the simulator could not be launched.
    pub fn start(&mut self, warmup_steps: u64) -> bool {
        self.close();
        match self.launcher.launch() {
            Ok(sim) => {
                log::debug!("[adapter] started {}", sim.name());
                self.sim = Some(sim);
            }
            Err(e) => {
                log::warn!("[adapter] {} launch failed: {e}", self.launcher.name());
                return false;
            }
        }
        for i in 0..warmup_steps {
            if !self.step() {
                log::debug!("[adapter] warmup ended early after {i} ticks");
                break;
            }
        }
        true
    }

    /// Fresh instance restored from `snapshot`. Used by reward evaluation.
    pub fn start_from_snapshot(&mut self, snapshot: &Path) -> bool {
        if !self.start(0) {
            return false;
        }
        if !self.restore_snapshot(snapshot) {
            self.close();
            return false;
        }
        true
    }

    /// Advance one tick. False on failure or once no demand remains.
    pub fn step(&mut self) -> bool {
        if !self.call("step", false, |s| s.simulation_step().map(|_| true)) {
            return false;
        }
        self.call("min_expected_vehicles", 0, |s| s.min_expected_vehicles()) > 0
    }

    pub fn save_snapshot(&mut self, path: &Path) -> bool {
        self.call("save_snapshot", false, |s| s.save_state(path).map(|_| true))
    }

    pub fn restore_snapshot(&mut self, path: &Path) -> bool {
        self.call("restore_snapshot", false, |s| s.load_state(path).map(|_| true))
    }

    pub fn time(&mut self) -> SimTime {
        self.call("time", 0.0, |s| s.time())
    }

    pub fn traffic_light_ids(&mut self) -> Vec<String> {
        self.call("traffic_light_ids", Vec::new(), |s| s.traffic_light_ids())
    }

    /// Phase program of `tls`, cached after the first successful fetch.
    pub fn program(&mut self, tls: &str) -> Option<PhaseProgram> {
        if let Some(p) = self.programs.get(tls) {
            return Some(p.clone());
        }
        let fetched = self.call("program", None, |s| {
            let defs = s.program_logic(tls)?;
            let lanes = s.controlled_lanes(tls)?;
            Ok(Some(PhaseProgram::new(tls, &defs, &lanes)))
        })?;
        self.programs.insert(tls.to_string(), fetched.clone());
        Some(fetched)
    }

    pub fn phase_index(&mut self, tls: &str) -> PhaseIndex {
        self.call("phase_index", 0, |s| s.phase_index(tls))
    }

    /// Seconds spent in the current phase, as reported by the simulator.
    pub fn phase_elapsed(&mut self, tls: &str) -> f64 {
        self.call("phase_elapsed", 0.0, |s| s.spent_duration(tls))
    }

    pub fn lane_queue(&mut self, lane: &str) -> u32 {
        self.call("lane_queue", 0, |s| s.lane_halting_number(lane))
    }

    /// Mean halting count over each phase's lanes; 0 for lane-less phases.
    pub fn phase_queues(&mut self, phases: &[Phase]) -> BTreeMap<PhaseIndex, f64> {
        let mut out = BTreeMap::new();
        for phase in phases {
            let q = if phase.lanes.is_empty() {
                0.0
            } else {
                let sum: u64 = phase
                    .lanes
                    .iter()
                    .map(|lane| self.lane_queue(lane) as u64)
                    .sum();
                sum as f64 / phase.lanes.len() as f64
            };
            out.insert(phase.index, q);
        }
        out
    }

    /// Halted vehicles summed over the distinct lanes controlled by `tls`.
    pub fn total_queue(&mut self, tls: &str) -> f64 {
        let Some(program) = self.program(tls) else {
            return 0.0;
        };
        program
            .lanes
            .iter()
            .map(|lane| self.lane_queue(lane) as f64)
            .sum()
    }

    pub fn set_phase(&mut self, tls: &str, index: PhaseIndex) -> bool {
        self.call("set_phase", false, |s| s.set_phase_index(tls, index).map(|_| true))
    }

    /// Add `extra_seconds` to the time remaining in the current phase.
    pub fn extend_phase(&mut self, tls: &str, extra_seconds: f64) -> bool {
        self.call("extend_phase", false, |s| {
            let now = s.time()?;
            let remaining = (s.next_switch(tls)? - now).max(0.0);
            s.set_phase_duration(tls, remaining + extra_seconds)?;
            Ok(true)
        })
    }

    /// Tear down the simulator instance. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut sim) = self.sim.take() {
            if let Err(e) = sim.close() {
                log::warn!("[adapter] close failed on {}: {e}", sim.name());
            }
        }
        self.programs.clear();
    }
}

impl Drop for SimAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SyntheticLauncher;

    const NET: &str = r#"
demand_end: 100
arrivals: { a_0: 0.5, b_0: 0.5 }
traffic_lights:
  - id: J1
    lanes: [a_0, b_0]
    phases:
      - { state: Gr, duration: 15, min_dur: 5, max_dur: 30 }
      - { state: yr, duration: 2 }
      - { state: rG, duration: 15, min_dur: 5, max_dur: 30 }
      - { state: ry, duration: 2 }
"#;

    fn adapter(dir: &Path) -> SimAdapter {
        let net = dir.join("network.yaml");
        std::fs::write(&net, NET).unwrap();
        SimAdapter::new(Box::new(SyntheticLauncher::new(net, 3)))
    }

    #[test]
    fn calls_before_start_return_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = adapter(dir.path());
        assert!(!a.step());
        assert_eq!(a.time(), 0.0);
        assert_eq!(a.phase_index("J1"), 0);
        assert_eq!(a.total_queue("J1"), 0.0);
        assert!(!a.set_phase("J1", 2));
    }

    #[test]
    fn start_runs_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = adapter(dir.path());
        assert!(a.start(10));
        assert_eq!(a.time(), 10.0);
    }

    #[test]
    fn missing_network_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = SimAdapter::new(Box::new(SyntheticLauncher::new(
            dir.path().join("missing.yaml"),
            1,
        )));
        assert!(!a.start(0));
        assert!(!a.is_running());
    }

    #[test]
    fn unknown_light_maps_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = adapter(dir.path());
        assert!(a.start(0));
        assert_eq!(a.phase_index("nope"), 0);
        assert!(a.program("nope").is_none());
        assert!(!a.extend_phase("nope", 5.0));
    }

    #[test]
    fn extend_phase_adds_to_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = adapter(dir.path());
        assert!(a.start(4));
        // Phase 0 switches at t=15; at t=4 there are 11 s left.
        assert!(a.extend_phase("J1", 5.0));
        for _ in 0..12 {
            a.step();
        }
        assert_eq!(a.phase_index("J1"), 0);
        for _ in 0..5 {
            a.step();
        }
        assert_eq!(a.phase_index("J1"), 1);
    }

    #[test]
    fn phase_queues_average_over_lanes() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = adapter(dir.path());
        assert!(a.start(30));
        let program = a.program("J1").unwrap();
        let queues = a.phase_queues(&program.phases);
        assert_eq!(queues.len(), 4);
        assert_eq!(queues[&1], 0.0);
        assert_eq!(queues[&0], a.lane_queue("a_0") as f64);
        assert_eq!(a.total_queue("J1"), (a.lane_queue("a_0") + a.lane_queue("b_0")) as f64);
    }

    #[test]
    fn missing_snapshot_fails_restore() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = adapter(dir.path());
        assert!(!a.start_from_snapshot(&dir.path().join("none.json")));
        assert!(!a.is_running());
    }

    #[test]
    fn save_then_restore_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("s.json");
        let mut a = adapter(dir.path());
        assert!(a.start(0));
        for _ in 0..25 {
            a.step();
        }
        let program = a.program("J1").unwrap();
        let query = |s: &mut SimAdapter| {
            (
                s.time(),
                s.phase_index("J1"),
                s.total_queue("J1"),
                s.phase_queues(&program.phases),
            )
        };
        let before = query(&mut a);

        assert!(a.save_snapshot(&snap));
        assert!(a.restore_snapshot(&snap));
        assert_eq!(query(&mut a), before);

        let mut fresh = adapter(dir.path());
        assert!(fresh.start_from_snapshot(&snap));
        assert_eq!(query(&mut fresh), before);

        for _ in 0..20 {
            a.step();
            fresh.step();
            assert_eq!(query(&mut a), query(&mut fresh));
        }
    }
}
