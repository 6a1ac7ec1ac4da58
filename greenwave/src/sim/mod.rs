// src/sim/mod.rs
//
// Simulation layer.
//
// Two seams:
// - `Simulator`: raw, fallible operations against one running simulator
//   instance (TraCI process or the in-process synthetic model).
// - `SimLauncher`: factory that brings a fresh instance up.
//
// `SimAdapter` sits on top and converts every failure into a logged,
// benign default so a single bad call never aborts a generation or
// evaluation run.

pub mod adapter;
pub mod process;
pub mod synthetic;
pub mod traci;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{SimBackend, SimulatorConfig};
use crate::types::{PhaseIndex, SimTime};

pub use adapter::SimAdapter;
pub use process::TraciLauncher;
pub use synthetic::{SyntheticLauncher, SyntheticNetwork, SyntheticSimulator};

/// Errors raised by the raw simulator layer.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulator I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },
    #[error("failed to launch simulator: {0}")]
    Launch(String),
    #[error("simulator is not running")]
    NotRunning,
    #[error("state file '{path}': {message}")]
    State { path: String, message: String },
    #[error("unknown {kind} '{id}'")]
    Unknown { kind: String, id: String },
}

/// One phase as reported by the controller's program definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDef {
    pub duration: f64,
    pub state: String,
    pub min_dur: f64,
    pub max_dur: f64,
}

/// Raw operations against one running simulator instance.
///
/// One instance is strictly sequential; callers own it exclusively.
pub trait Simulator: Send {
    /// Advance by one tick.
    fn simulation_step(&mut self) -> Result<(), SimError>;
    fn time(&mut self) -> Result<SimTime, SimError>;
    /// Vehicles still running or waiting to enter.
    fn min_expected_vehicles(&mut self) -> Result<i32, SimError>;
    fn traffic_light_ids(&mut self) -> Result<Vec<String>, SimError>;
    fn lane_halting_number(&mut self, lane: &str) -> Result<u32, SimError>;
    fn phase_index(&mut self, tls: &str) -> Result<PhaseIndex, SimError>;
    fn set_phase_index(&mut self, tls: &str, index: PhaseIndex) -> Result<(), SimError>;
    /// Absolute time of the next scheduled phase switch.
    fn next_switch(&mut self, tls: &str) -> Result<SimTime, SimError>;
    /// Set the remaining duration of the current phase.
    fn set_phase_duration(&mut self, tls: &str, seconds: f64) -> Result<(), SimError>;
    fn spent_duration(&mut self, tls: &str) -> Result<f64, SimError>;
    /// Incoming lane of every controlled link, in link order.
    fn controlled_lanes(&mut self, tls: &str) -> Result<Vec<String>, SimError>;
    /// Phases of the controller's active program.
    fn program_logic(&mut self, tls: &str) -> Result<Vec<PhaseDef>, SimError>;
    fn save_state(&mut self, path: &Path) -> Result<(), SimError>;
    fn load_state(&mut self, path: &Path) -> Result<(), SimError>;
    fn close(&mut self) -> Result<(), SimError>;
    /// Short label used in log lines.
    fn name(&self) -> &str;
}

/// Brings up a fresh simulator instance.
pub trait SimLauncher: Send + Sync {
    fn launch(&self) -> Result<Box<dyn Simulator>, SimError>;
    fn name(&self) -> &str;
}

/// Value-typed description of how to launch a simulator for one scenario.
///
/// Worker threads receive this and rebuild their own launcher from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub backend: SimBackend,
    pub config_file: PathBuf,
    pub simulator: SimulatorConfig,
    /// Port range reserved for the worker that owns this launch.
    pub port_range: (u16, u16),
}

impl LaunchSpec {
    pub fn new(config_file: impl Into<PathBuf>, simulator: &SimulatorConfig) -> Self {
        Self {
            backend: simulator.backend,
            config_file: config_file.into(),
            simulator: simulator.clone(),
            port_range: simulator.port_range,
        }
    }

    /// Same launch, restricted to the given port range.
    pub fn with_port_range(mut self, range: (u16, u16)) -> Self {
        self.port_range = range;
        self
    }

    pub fn launcher(&self) -> Box<dyn SimLauncher> {
        match self.backend {
            SimBackend::Sumo => Box::new(TraciLauncher::new(
                self.config_file.clone(),
                self.simulator.clone(),
                self.port_range,
            )),
            SimBackend::Synthetic => Box::new(SyntheticLauncher::new(
                self.config_file.clone(),
                self.simulator.seed,
            )),
        }
    }
}

/// Split `range` into `workers` disjoint sub-ranges.
///
/// Worker `i` gets `[lo + i*span, lo + (i+1)*span)`. When the range is too
/// narrow every worker shares the whole range.
pub fn partition_ports(range: (u16, u16), workers: usize) -> Vec<(u16, u16)> {
    let workers = workers.max(1);
    let width = range.1.saturating_sub(range.0) as usize;
    let span = width / workers;
    if span == 0 {
        return vec![range; workers];
    }
    (0..workers)
        .map(|i| {
            let lo = range.0 as usize + i * span;
            (lo as u16, (lo + span) as u16)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_partitions_are_disjoint() {
        let parts = partition_ports((10_000, 10_100), 4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], (10_000, 10_025));
        assert_eq!(parts[3], (10_075, 10_100));
        for w in parts.windows(2) {
            assert!(w[0].1 <= w[1].0);
        }
    }

    #[test]
    fn narrow_range_is_shared() {
        let parts = partition_ports((20_000, 20_002), 4);
        assert!(parts.iter().all(|p| *p == (20_000, 20_002)));
    }

    #[test]
    fn launch_spec_picks_backend() {
        let sim = SimulatorConfig {
            backend: SimBackend::Synthetic,
            ..SimulatorConfig::default()
        };
        let spec = LaunchSpec::new("net.yaml", &sim);
        assert_eq!(spec.launcher().name(), "synthetic");
    }
}
