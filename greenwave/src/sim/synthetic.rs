// src/sim/synthetic.rs
//
// Deterministic in-process queue simulator.
//
// A small point-queue model that speaks the same `Simulator` interface as
// the TraCI client, so collection and reward evaluation can run without an
// external SUMO install (dry runs, CI, tests).
//
// Model, per tick:
//   1. every lane granted green by its controller's current phase
//      discharges up to `discharge_per_step` halted vehicles;
//   2. while `time < demand_end`, each lane receives one arrival with
//      probability `rate * step_length`;
//   3. controllers whose scheduled switch time has been reached advance to
//      the next phase of their program.
//
// Arrivals draw from a ChaCha8Rng seeded by (seed, tick), never from a
// running stream, so restoring a snapshot replays exactly the same future.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{PhaseDef, SimError, SimLauncher, Simulator};
use crate::types::{PhaseIndex, SimTime};

/// Snapshot format tag.
pub const STATE_FORMAT: &str = "greenwave-synthetic-state-v1";

const fn default_step_length() -> f64 {
    1.0
}

const fn default_discharge() -> u32 {
    1
}

/// One phase in a synthetic network file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticPhase {
    pub state: String,
    pub duration: f64,
    #[serde(default)]
    pub min_dur: Option<f64>,
    #[serde(default)]
    pub max_dur: Option<f64>,
}

impl SyntheticPhase {
    fn to_def(&self) -> PhaseDef {
        PhaseDef {
            duration: self.duration,
            state: self.state.clone(),
            min_dur: self.min_dur.unwrap_or(self.duration),
            max_dur: self.max_dur.unwrap_or(self.duration),
        }
    }
}

/// One signal controller in a synthetic network file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticLight {
    pub id: String,
    /// Incoming lane per controlled link (one per signal-state char).
    pub lanes: Vec<String>,
    pub phases: Vec<SyntheticPhase>,
}

/// Network description loaded from `network.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticNetwork {
    #[serde(default = "default_step_length")]
    pub step_length: f64,
    /// Arrivals stop once simulation time reaches this value (s).
    pub demand_end: f64,
    /// Vehicles released per green lane per tick.
    #[serde(default = "default_discharge")]
    pub discharge_per_step: u32,
    /// Arrival probability per second, per lane.
    pub arrivals: BTreeMap<String, f64>,
    pub traffic_lights: Vec<SyntheticLight>,
}

impl SyntheticNetwork {
    pub fn from_yaml_file(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path).map_err(|e| SimError::Launch(format!(
            "cannot read network {}: {e}",
            path.display()
        )))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, SimError> {
        let net: SyntheticNetwork = serde_yaml::from_str(yaml)
            .map_err(|e| SimError::Launch(format!("invalid network YAML: {e}")))?;
        net.validate()?;
        Ok(net)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let bad = |msg: String| Err(SimError::Launch(format!("invalid network: {msg}")));
        if !(self.step_length.is_finite() && self.step_length > 0.0) {
            return bad("step_length must be > 0".into());
        }
        if self.traffic_lights.is_empty() {
            return bad("no traffic lights".into());
        }
        for (lane, rate) in &self.arrivals {
            if !(0.0..=1.0).contains(rate) {
                return bad(format!("arrival rate for {lane} must be in [0, 1]"));
            }
        }
        for tl in &self.traffic_lights {
            if tl.phases.is_empty() {
                return bad(format!("{} has no phases", tl.id));
            }
            for (i, p) in tl.phases.iter().enumerate() {
                if p.state.chars().count() != tl.lanes.len() {
                    return bad(format!(
                        "{} phase {i}: state '{}' does not match {} links",
                        tl.id,
                        p.state,
                        tl.lanes.len()
                    ));
                }
                if !(p.duration > 0.0) {
                    return bad(format!("{} phase {i}: duration must be > 0", tl.id));
                }
            }
        }
        Ok(())
    }

    fn light(&self, id: &str) -> Result<&SyntheticLight, SimError> {
        self.traffic_lights
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SimError::Unknown {
                kind: "traffic light".to_string(),
                id: id.to_string(),
            })
    }

    /// Every lane mentioned anywhere in the network.
    fn all_lanes(&self) -> Vec<String> {
        let mut lanes: Vec<String> = self.arrivals.keys().cloned().collect();
        for tl in &self.traffic_lights {
            for lane in &tl.lanes {
                if !lanes.contains(lane) {
                    lanes.push(lane.clone());
                }
            }
        }
        lanes.sort();
        lanes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LightState {
    phase: PhaseIndex,
    phase_start: SimTime,
    next_switch: SimTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SyntheticState {
    format: String,
    seed: u64,
    tick: u64,
    time: SimTime,
    queues: BTreeMap<String, u32>,
    lights: BTreeMap<String, LightState>,
}

/// Running synthetic simulator instance.
pub struct SyntheticSimulator {
    net: SyntheticNetwork,
    state: SyntheticState,
    closed: bool,
}

impl SyntheticSimulator {
    pub fn new(net: SyntheticNetwork, seed: u64) -> Self {
        let queues = net.all_lanes().into_iter().map(|l| (l, 0)).collect();
        let lights = net
            .traffic_lights
            .iter()
            .map(|tl| {
                let st = LightState {
                    phase: 0,
                    phase_start: 0.0,
                    next_switch: tl.phases.first().map(|p| p.duration).unwrap_or(0.0),
                };
                (tl.id.clone(), st)
            })
            .collect();
        Self {
            net,
            state: SyntheticState {
                format: STATE_FORMAT.to_string(),
                seed,
                tick: 0,
                time: 0.0,
                queues,
                lights,
            },
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), SimError> {
        if self.closed {
            Err(SimError::NotRunning)
        } else {
            Ok(())
        }
    }

    fn light_state(&self, tls: &str) -> Result<&LightState, SimError> {
        self.state.lights.get(tls).ok_or_else(|| SimError::Unknown {
            kind: "traffic light".to_string(),
            id: tls.to_string(),
        })
    }

    fn light_state_mut(&mut self, tls: &str) -> Result<&mut LightState, SimError> {
        self.state.lights.get_mut(tls).ok_or_else(|| SimError::Unknown {
            kind: "traffic light".to_string(),
            id: tls.to_string(),
        })
    }

    fn total_queued(&self) -> u64 {
        self.state.queues.values().map(|&q| q as u64).sum()
    }

    fn discharge(&mut self) {
        let per_step = self.net.discharge_per_step;
        for tl in &self.net.traffic_lights {
            let Some(ls) = self.state.lights.get(&tl.id) else {
                continue;
            };
            let Some(phase) = tl.phases.get(ls.phase) else {
                continue;
            };
            let state = &phase.state;
            let mut served: Vec<&String> = Vec::new();
            for (c, lane) in state.chars().zip(tl.lanes.iter()) {
                if (c == 'G' || c == 'g') && !served.contains(&lane) {
                    served.push(lane);
                }
            }
            for lane in served {
                if let Some(q) = self.state.queues.get_mut(lane) {
                    *q = q.saturating_sub(per_step);
                }
            }
        }
    }

    fn arrive(&mut self) {
        if self.state.time >= self.net.demand_end {
            return;
        }
        let mix = self.state.tick.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let mut rng = ChaCha8Rng::seed_from_u64(self.state.seed ^ mix);
        let dt = self.net.step_length;
        for (lane, rate) in &self.net.arrivals {
            let p = (rate * dt).min(1.0);
            if rng.gen::<f64>() < p {
                *self.state.queues.entry(lane.clone()).or_insert(0) += 1;
            }
        }
    }

    fn advance_phases(&mut self) {
        let now = self.state.time;
        for tl in self.net.traffic_lights.iter().filter(|t| !t.phases.is_empty()) {
            if let Some(ls) = self.state.lights.get_mut(&tl.id) {
                // Absorb float rounding in tick * step_length.
                if now + 1e-9 >= ls.next_switch {
                    ls.phase = (ls.phase + 1) % tl.phases.len();
                    ls.phase_start = now;
                    ls.next_switch = now + tl.phases[ls.phase].duration;
                }
            }
        }
    }
}

impl Simulator for SyntheticSimulator {
    fn simulation_step(&mut self) -> Result<(), SimError> {
        self.ensure_open()?;
        self.discharge();
        self.state.tick += 1;
        self.state.time = self.state.tick as f64 * self.net.step_length;
        self.arrive();
        self.advance_phases();
        Ok(())
    }

    fn time(&mut self) -> Result<SimTime, SimError> {
        self.ensure_open()?;
        Ok(self.state.time)
    }

    fn min_expected_vehicles(&mut self) -> Result<i32, SimError> {
        self.ensure_open()?;
        let pending = if self.state.time < self.net.demand_end { 1 } else { 0 };
        Ok((self.total_queued() + pending).min(i32::MAX as u64) as i32)
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<String>, SimError> {
        self.ensure_open()?;
        Ok(self.net.traffic_lights.iter().map(|t| t.id.clone()).collect())
    }

    fn lane_halting_number(&mut self, lane: &str) -> Result<u32, SimError> {
        self.ensure_open()?;
        self.state
            .queues
            .get(lane)
            .copied()
            .ok_or_else(|| SimError::Unknown {
                kind: "lane".to_string(),
                id: lane.to_string(),
            })
    }

    fn phase_index(&mut self, tls: &str) -> Result<PhaseIndex, SimError> {
        self.ensure_open()?;
        Ok(self.light_state(tls)?.phase)
    }

    fn set_phase_index(&mut self, tls: &str, index: PhaseIndex) -> Result<(), SimError> {
        self.ensure_open()?;
        let duration = self
            .net
            .light(tls)?
            .phases
            .get(index)
            .map(|p| p.duration)
            .ok_or_else(|| SimError::Command {
                command: "set_phase_index".to_string(),
                message: format!("phase {index} out of range for {tls}"),
            })?;
        let now = self.state.time;
        let ls = self.light_state_mut(tls)?;
        ls.phase = index;
        ls.phase_start = now;
        ls.next_switch = now + duration;
        Ok(())
    }

    fn next_switch(&mut self, tls: &str) -> Result<SimTime, SimError> {
        self.ensure_open()?;
        Ok(self.light_state(tls)?.next_switch)
    }

    fn set_phase_duration(&mut self, tls: &str, seconds: f64) -> Result<(), SimError> {
        self.ensure_open()?;
        if !(seconds.is_finite() && seconds >= 0.0) {
            return Err(SimError::Command {
                command: "set_phase_duration".to_string(),
                message: format!("invalid duration {seconds}"),
            });
        }
        let now = self.state.time;
        self.light_state_mut(tls)?.next_switch = now + seconds;
        Ok(())
    }

    fn spent_duration(&mut self, tls: &str) -> Result<f64, SimError> {
        self.ensure_open()?;
        let now = self.state.time;
        Ok(now - self.light_state(tls)?.phase_start)
    }

    fn controlled_lanes(&mut self, tls: &str) -> Result<Vec<String>, SimError> {
        self.ensure_open()?;
        Ok(self.net.light(tls)?.lanes.clone())
    }

    fn program_logic(&mut self, tls: &str) -> Result<Vec<PhaseDef>, SimError> {
        self.ensure_open()?;
        Ok(self
            .net
            .light(tls)?
            .phases
            .iter()
            .map(SyntheticPhase::to_def)
            .collect())
    }

    fn save_state(&mut self, path: &Path) -> Result<(), SimError> {
        self.ensure_open()?;
        let json = serde_json::to_vec_pretty(&self.state).map_err(|e| SimError::State {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        fs::write(path, json).map_err(|e| SimError::State {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn load_state(&mut self, path: &Path) -> Result<(), SimError> {
        self.ensure_open()?;
        let state_err = |message: String| SimError::State {
            path: path.display().to_string(),
            message,
        };
        let bytes = fs::read(path).map_err(|e| state_err(e.to_string()))?;
        let state: SyntheticState =
            serde_json::from_slice(&bytes).map_err(|e| state_err(e.to_string()))?;
        if state.format != STATE_FORMAT {
            return Err(state_err(format!("unsupported format '{}'", state.format)));
        }
        for tl in &self.net.traffic_lights {
            match state.lights.get(&tl.id) {
                Some(ls) if ls.phase < tl.phases.len() => {}
                _ => {
                    return Err(state_err(format!(
                        "snapshot does not match network (traffic light {})",
                        tl.id
                    )))
                }
            }
        }
        self.state = state;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SimError> {
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Launches [`SyntheticSimulator`] instances from a network file.
#[derive(Debug, Clone)]
pub struct SyntheticLauncher {
    network_file: PathBuf,
    seed: u64,
}

impl SyntheticLauncher {
    pub fn new(network_file: PathBuf, seed: u64) -> Self {
        Self { network_file, seed }
    }
}

impl SimLauncher for SyntheticLauncher {
    fn launch(&self) -> Result<Box<dyn Simulator>, SimError> {
        let net = SyntheticNetwork::from_yaml_file(&self.network_file)?;
        Ok(Box::new(SyntheticSimulator::new(net, self.seed)))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::is_green_state;

    const NET: &str = r#"
demand_end: 200
arrivals:
  n_0: 0.4
  e_0: 0.3
traffic_lights:
  - id: J1
    lanes: [n_0, n_0, e_0, e_0]
    phases:
      - { state: GGrr, duration: 20, min_dur: 8, max_dur: 40 }
      - { state: yyrr, duration: 3 }
      - { state: rrGG, duration: 20, min_dur: 8, max_dur: 40 }
      - { state: rryy, duration: 3 }
"#;

    fn sim() -> SyntheticSimulator {
        SyntheticSimulator::new(SyntheticNetwork::from_yaml_str(NET).unwrap(), 11)
    }

    #[test]
    fn phases_advance_on_schedule() {
        let mut s = sim();
        for _ in 0..20 {
            s.simulation_step().unwrap();
        }
        assert_eq!(s.phase_index("J1").unwrap(), 1);
        assert_eq!(s.spent_duration("J1").unwrap(), 0.0);
        assert_eq!(s.next_switch("J1").unwrap(), 23.0);
    }

    #[test]
    fn set_phase_duration_moves_next_switch() {
        let mut s = sim();
        for _ in 0..5 {
            s.simulation_step().unwrap();
        }
        s.set_phase_duration("J1", 30.0).unwrap();
        assert_eq!(s.next_switch("J1").unwrap(), 35.0);
    }

    #[test]
    fn same_seed_same_trajectory() {
        let mut a = sim();
        let mut b = sim();
        for _ in 0..60 {
            a.simulation_step().unwrap();
            b.simulation_step().unwrap();
        }
        assert_eq!(a.state, b.state);
    }

    #[test]
    fn snapshot_restore_replays_future() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut a = sim();
        for _ in 0..30 {
            a.simulation_step().unwrap();
        }
        a.save_state(&path).unwrap();
        for _ in 0..15 {
            a.simulation_step().unwrap();
        }

        let mut b = sim();
        b.load_state(&path).unwrap();
        for _ in 0..15 {
            b.simulation_step().unwrap();
        }
        assert_eq!(a.state, b.state);
    }

    #[test]
    fn demand_drains_to_zero() {
        let mut s = sim();
        let mut steps = 0;
        while s.min_expected_vehicles().unwrap() > 0 && steps < 5_000 {
            s.simulation_step().unwrap();
            steps += 1;
        }
        assert!(steps < 5_000);
        assert_eq!(s.total_queued(), 0);
    }

    #[test]
    fn unknown_light_is_an_error() {
        let mut s = sim();
        assert!(matches!(s.phase_index("nope"), Err(SimError::Unknown { .. })));
    }

    #[test]
    fn closed_simulator_rejects_calls() {
        let mut s = sim();
        s.close().unwrap();
        assert!(matches!(s.simulation_step(), Err(SimError::NotRunning)));
    }

    #[test]
    fn state_length_mismatch_rejected() {
        let bad = NET.replace("GGrr, duration: 20", "GGr, duration: 20");
        assert!(SyntheticNetwork::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn green_check_matches_signal_model() {
        let net = SyntheticNetwork::from_yaml_str(NET).unwrap();
        let greens: Vec<bool> = net.traffic_lights[0]
            .phases
            .iter()
            .map(|p| is_green_state(&p.state))
            .collect();
        assert_eq!(greens, vec![true, false, true, false]);
    }
}
