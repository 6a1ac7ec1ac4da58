// tests/common/mod.rs
//
// Shared fixtures: a two-approach synthetic intersection and a config
// that points at it.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use greenwave::config::{Config, ScenarioConfig, SimBackend};
use greenwave::signal::GreenTimeRandomization;

pub const NETWORK: &str = r#"
demand_end: 240
arrivals:
  n_0: 0.35
  s_0: 0.25
  e_0: 0.3
traffic_lights:
  - id: J1
    lanes: [n_0, s_0, e_0, e_0]
    phases:
      - { state: GGrr, duration: 20, min_dur: 8, max_dur: 40 }
      - { state: yyrr, duration: 3 }
      - { state: rrGG, duration: 20, min_dur: 8, max_dur: 40 }
      - { state: rryy, duration: 3 }
"#;

/// Write `<root>/<name>/network.yaml` and return the network path.
pub fn write_scenario(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("network.yaml");
    fs::write(&path, NETWORK).unwrap();
    path
}

/// Synthetic-backend config over `scenario_root`, no sampling filter, static
/// green windows, one snapshot per decision.
pub fn synthetic_config(scenario_root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.simulator.backend = SimBackend::Synthetic;
    cfg.simulator.warmup_steps = 10;
    cfg.simulator.max_steps = 5_000;
    cfg.randomization = GreenTimeRandomization::disabled();
    cfg.collection.sampling_filter = false;
    cfg.collection.save_interval = 1;
    cfg.collection.parallelism = 2;
    cfg.reward.parallelism = 2;
    cfg.scenario_root = Some(scenario_root.to_path_buf());
    cfg
}

pub fn scenario(name: &str, config_file: PathBuf) -> ScenarioConfig {
    ScenarioConfig {
        name: name.to_string(),
        config_file,
    }
}
