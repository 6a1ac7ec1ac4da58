// src/config.rs
//
// Central configuration for greenwave.
//
// One YAML document drives both dataset generation and reward scoring:
// simulator launch parameters, decision timing, green-time randomisation,
// collection output, the max-pressure baseline and the reward chain.
//
// Load order: YAML file (or defaults) -> GREENWAVE_* environment overrides
// -> eager validation. Nothing downstream re-checks these ranges.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::signal::GreenTimeRandomization;

/// Current config schema version.
pub const CONFIG_VERSION: &str = "greenwave-config-v1";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {message}")]
    Io { path: String, message: String },
    #[error("failed to parse config YAML: {message}")]
    Parse { message: String },
    #[error("config validation error in '{field}': {message}")]
    Validation { field: String, message: String },
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Which simulator implementation backs the adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimBackend {
    /// External SUMO process over TraCI.
    #[default]
    Sumo,
    /// In-process deterministic queue model (dry runs, tests).
    Synthetic,
}

impl SimBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimBackend::Sumo => "sumo",
            SimBackend::Synthetic => "synthetic",
        }
    }

    pub fn parse(s: &str) -> Option<SimBackend> {
        match s.trim().to_lowercase().as_str() {
            "sumo" | "traci" => Some(SimBackend::Sumo),
            "synthetic" | "synth" => Some(SimBackend::Synthetic),
            _ => None,
        }
    }
}

/// Simulator launch / connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    pub backend: SimBackend,
    /// Simulator executable (SUMO backend only).
    pub binary: String,
    /// Seconds per simulation tick.
    pub step_length: f64,
    /// Inclusive-exclusive TraCI port range shared by all workers.
    pub port_range: (u16, u16),
    /// Attempts to obtain a port + running process before giving up.
    pub max_start_attempts: u32,
    /// Connection attempts against a freshly spawned process.
    pub connect_retries: u32,
    /// Delay between connection attempts (ms).
    pub connect_retry_ms: u64,
    /// Randomised backoff window between start attempts (ms).
    pub backoff_ms: (u64, u64),
    /// Ticks advanced by `start` before control returns.
    pub warmup_steps: u64,
    /// Hard ceiling on ticks per collection run.
    pub max_steps: u64,
    /// Simulator-side random seed.
    pub seed: u64,
    /// Extra command-line arguments passed through to the simulator.
    pub extra_args: Vec<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            backend: SimBackend::Sumo,
            binary: "sumo".to_string(),
            step_length: 1.0,
            port_range: (10_000, 60_000),
            max_start_attempts: 5,
            connect_retries: 50,
            connect_retry_ms: 100,
            backoff_ms: (50, 250),
            warmup_steps: 300,
            max_steps: 20_000,
            seed: 42,
            extra_args: Vec::new(),
        }
    }
}

/// Decision timing shared by detector, evaluator and baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionConfig {
    /// Seconds between re-decisions once minimum green is reached.
    pub decision_interval: f64,
    /// Matching tolerance for step rounding (seconds).
    pub tolerance: f64,
    /// Seconds added by an "extend" action. Defaults to `decision_interval`.
    pub extend_seconds: Option<f64>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            decision_interval: 5.0,
            tolerance: 0.5,
            extend_seconds: None,
        }
    }
}

impl DecisionConfig {
    pub fn effective_extend_seconds(&self) -> f64 {
        self.extend_seconds.unwrap_or(self.decision_interval)
    }
}

/// Dataset collection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    /// Root directory; each scenario writes `<output_dir>/<scenario>/`.
    pub output_dir: PathBuf,
    /// Persist a snapshot for every Nth kept decision per controller.
    pub save_interval: u32,
    /// Drop degenerate (all-zero-queue) samples probabilistically.
    pub sampling_filter: bool,
    /// Worker threads (one simulator each).
    pub parallelism: usize,
    /// Seed for the sampling filter and green-time randomisation.
    pub seed: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("runs/dataset"),
            save_interval: 1,
            sampling_filter: true,
            parallelism: 4,
            seed: 7,
        }
    }
}

/// Max-pressure baseline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaselineConfig {
    /// Extra seconds added to min green before switching is considered.
    pub min_green_offset: f64,
    /// When true, the max-green ceiling does not force a switch.
    pub allow_extend_past_max: bool,
    /// Current-phase queue must exceed every other phase by this much to extend.
    pub pressure_threshold: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_green_offset: 0.0,
            allow_extend_past_max: false,
            pressure_threshold: 0.0,
        }
    }
}

/// Reward composition chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewardConfig {
    /// Format score for a strictly compliant answer.
    pub strict_score: f64,
    /// Format score for an answer recovered by lenient extraction.
    pub partial_score: f64,
    /// Format score when no decision can be extracted.
    pub invalid_score: f64,
    /// Weight on the format score.
    pub format_weight: f64,
    /// Weight on the simulation (counterfactual) score.
    pub tsc_weight: f64,
    /// Ticks advanced after applying the action. Defaults to the decision
    /// interval expressed in ticks.
    pub horizon: Option<u64>,
    /// Normalisation scale for `tanh(-delta / scale)`.
    pub scale: f64,
    /// Score relative to the max-pressure baseline instead of absolutely.
    pub enable_baseline: bool,
    /// Report model/baseline agreement in batch statistics.
    pub track_baseline_agreement: bool,
    /// Fail the whole batch on the first simulation failure.
    pub strict_batch: bool,
    /// Worker threads for batch evaluation.
    pub parallelism: usize,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            strict_score: 1.0,
            partial_score: 0.5,
            invalid_score: -1.0,
            format_weight: 1.0,
            tsc_weight: 1.0,
            horizon: None,
            scale: 10.0,
            enable_baseline: false,
            track_baseline_agreement: true,
            strict_batch: false,
            parallelism: 4,
        }
    }
}

/// One named scenario: a name and the simulator config file that defines it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,
    pub config_file: PathBuf,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: String,
    pub simulator: SimulatorConfig,
    pub decision: DecisionConfig,
    pub randomization: GreenTimeRandomization,
    pub collection: CollectionConfig,
    pub baseline: BaselineConfig,
    pub reward: RewardConfig,
    /// Explicit scenario list.
    pub scenarios: Vec<ScenarioConfig>,
    /// Optional directory scanned for additional scenarios
    /// (one sub-directory per scenario).
    pub scenario_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            simulator: SimulatorConfig::default(),
            decision: DecisionConfig::default(),
            randomization: GreenTimeRandomization::default(),
            collection: CollectionConfig::default(),
            baseline: BaselineConfig::default(),
            reward: RewardConfig::default(),
            scenarios: Vec::new(),
            scenario_root: None,
        }
    }
}

/// Parse `GREENWAVE_*` variable `name` into `T`, logging the outcome.
/// Unparseable values are ignored with a warning.
fn env_override<T>(name: &str) -> Option<T>
where
    T: FromStr + std::fmt::Display,
{
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            log::info!("[config] {name} = {v} (overrode file/default)");
            Some(v)
        }
        Err(_) => {
            log::warn!("[config] could not parse {name} = {raw:?}; ignoring");
            None
        }
    }
}

impl Config {
    /// Load from an optional YAML file, apply env overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a config from a YAML file (no env overrides, no validation).
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a config from a YAML string (no env overrides, no validation).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Apply research overrides from the environment:
    ///
    ///   - GREENWAVE_DECISION_INTERVAL (f64, seconds)
    ///   - GREENWAVE_WARMUP_STEPS      (u64)
    ///   - GREENWAVE_PARALLELISM       (usize; collection and reward pools)
    ///   - GREENWAVE_REWARD_SCALE      (f64)
    ///   - GREENWAVE_SUMO_BINARY       (path)
    ///   - GREENWAVE_BACKEND           (sumo | synthetic)
    ///   - GREENWAVE_ENABLE_BASELINE   (bool)
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override::<f64>("GREENWAVE_DECISION_INTERVAL") {
            self.decision.decision_interval = v;
        }
        if let Some(v) = env_override::<u64>("GREENWAVE_WARMUP_STEPS") {
            self.simulator.warmup_steps = v;
        }
        if let Some(v) = env_override::<usize>("GREENWAVE_PARALLELISM") {
            self.collection.parallelism = v;
            self.reward.parallelism = v;
        }
        if let Some(v) = env_override::<f64>("GREENWAVE_REWARD_SCALE") {
            self.reward.scale = v;
        }
        if let Some(v) = env_override::<String>("GREENWAVE_SUMO_BINARY") {
            self.simulator.binary = v;
        }
        if let Ok(raw) = env::var("GREENWAVE_BACKEND") {
            match SimBackend::parse(&raw) {
                Some(b) => {
                    log::info!("[config] GREENWAVE_BACKEND = {} (overrode file/default)", b.as_str());
                    self.simulator.backend = b;
                }
                None => log::warn!("[config] unknown GREENWAVE_BACKEND = {raw:?}; ignoring"),
            }
        }
        if let Ok(raw) = env::var("GREENWAVE_ENABLE_BASELINE") {
            let v = matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes");
            log::info!("[config] GREENWAVE_ENABLE_BASELINE = {v} (overrode file/default)");
            self.reward.enable_baseline = v;
        }
    }

    /// Horizon in ticks used by the counterfactual evaluator.
    pub fn horizon_ticks(&self) -> u64 {
        self.reward.horizon.unwrap_or_else(|| {
            let ticks = (self.decision.decision_interval / self.simulator.step_length).round();
            (ticks as u64).max(1)
        })
    }

    /// Validate every range eagerly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulator;
        if sim.binary.trim().is_empty() {
            return Err(invalid("simulator.binary", "binary cannot be empty"));
        }
        if !(sim.step_length.is_finite() && sim.step_length > 0.0) {
            return Err(invalid("simulator.step_length", "must be > 0"));
        }
        if sim.port_range.0 < 1024 || sim.port_range.0 >= sim.port_range.1 {
            return Err(invalid(
                "simulator.port_range",
                format!(
                    "expected 1024 <= lo < hi, got ({}, {})",
                    sim.port_range.0, sim.port_range.1
                ),
            ));
        }
        if sim.max_start_attempts == 0 {
            return Err(invalid("simulator.max_start_attempts", "must be >= 1"));
        }
        if sim.connect_retries == 0 {
            return Err(invalid("simulator.connect_retries", "must be >= 1"));
        }
        if sim.backoff_ms.0 > sim.backoff_ms.1 {
            return Err(invalid("simulator.backoff_ms", "lo must be <= hi"));
        }
        if sim.max_steps == 0 {
            return Err(invalid("simulator.max_steps", "must be >= 1"));
        }

        let dec = &self.decision;
        if !(dec.decision_interval.is_finite() && dec.decision_interval > 0.0) {
            return Err(invalid("decision.decision_interval", "must be > 0"));
        }
        if !(dec.tolerance > 0.0 && dec.tolerance < dec.decision_interval / 2.0) {
            return Err(invalid(
                "decision.tolerance",
                "must be > 0 and smaller than half the decision interval",
            ));
        }
        if let Some(ext) = dec.extend_seconds {
            if !(ext.is_finite() && ext > 0.0) {
                return Err(invalid("decision.extend_seconds", "must be > 0"));
            }
        }

        self.randomization
            .validate()
            .map_err(|(field, message)| invalid(&format!("randomization.{field}"), message))?;

        let col = &self.collection;
        if col.save_interval == 0 {
            return Err(invalid("collection.save_interval", "must be >= 1"));
        }
        if col.parallelism == 0 {
            return Err(invalid("collection.parallelism", "must be >= 1"));
        }

        let base = &self.baseline;
        if !(base.min_green_offset.is_finite() && base.min_green_offset >= 0.0) {
            return Err(invalid("baseline.min_green_offset", "must be >= 0"));
        }
        if !base.pressure_threshold.is_finite() {
            return Err(invalid("baseline.pressure_threshold", "must be finite"));
        }

        let rw = &self.reward;
        for (field, v) in [
            ("reward.format_weight", rw.format_weight),
            ("reward.tsc_weight", rw.tsc_weight),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(invalid(field, "weights must be non-negative"));
            }
        }
        for (field, v) in [
            ("reward.strict_score", rw.strict_score),
            ("reward.partial_score", rw.partial_score),
            ("reward.invalid_score", rw.invalid_score),
        ] {
            if !v.is_finite() {
                return Err(invalid(field, "must be finite"));
            }
        }
        if !(rw.strict_score >= rw.partial_score && rw.partial_score >= rw.invalid_score) {
            return Err(invalid(
                "reward.partial_score",
                "expected strict_score >= partial_score >= invalid_score",
            ));
        }
        if !(rw.scale.is_finite() && rw.scale > 0.0) {
            return Err(invalid("reward.scale", "must be > 0"));
        }
        if rw.horizon == Some(0) {
            return Err(invalid("reward.horizon", "must be >= 1 tick"));
        }
        if rw.parallelism == 0 {
            return Err(invalid("reward.parallelism", "must be >= 1"));
        }

        let mut names = BTreeSet::new();
        for (i, sc) in self.scenarios.iter().enumerate() {
            if sc.name.trim().is_empty() {
                return Err(invalid(&format!("scenarios[{i}].name"), "cannot be empty"));
            }
            if sc.name.contains('/') || sc.name.contains('\\') {
                return Err(invalid(
                    &format!("scenarios[{i}].name"),
                    "must not contain path separators",
                ));
            }
            if !names.insert(sc.name.as_str()) {
                return Err(invalid(
                    &format!("scenarios[{i}].name"),
                    format!("duplicate scenario name `{}`", sc.name),
                ));
            }
        }

        Ok(())
    }

    /// Explicit scenarios followed by those discovered under `scenario_root`
    /// (sorted by name, explicit names win).
    pub fn resolve_scenarios(&self) -> Vec<ScenarioConfig> {
        let mut out = self.scenarios.clone();
        if let Some(root) = &self.scenario_root {
            let known: BTreeSet<String> = out.iter().map(|s| s.name.clone()).collect();
            for sc in discover_scenarios(root, self.simulator.backend) {
                if !known.contains(&sc.name) {
                    out.push(sc);
                }
            }
        }
        out
    }

    /// Stable SHA-256 fingerprint of the resolved config (hex).
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        hex_lower(&digest)
    }
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Scan `root` for scenario sub-directories.
///
/// A SUMO scenario is a directory holding a `*.sumocfg`; a synthetic scenario
/// is a directory holding `network.yaml`. Directories without one are still
/// returned with the expected (missing) path so the collector reports them
/// as failed rather than silently skipping them.
pub fn discover_scenarios(root: &Path, backend: SimBackend) -> Vec<ScenarioConfig> {
    let Ok(entries) = fs::read_dir(root) else {
        log::warn!("scenario root {} is not readable", root.display());
        return Vec::new();
    };

    let mut out: Vec<ScenarioConfig> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| {
            let dir = e.path();
            let name = e.file_name().to_string_lossy().to_string();
            let config_file = match backend {
                SimBackend::Sumo => find_sumocfg(&dir).unwrap_or_else(|| dir.join(format!("{name}.sumocfg"))),
                SimBackend::Synthetic => dir.join("network.yaml"),
            };
            ScenarioConfig { name, config_file }
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn find_sumocfg(dir: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "sumocfg").unwrap_or(false))
        .collect();
    found.sort();
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn horizon_defaults_to_decision_interval() {
        let cfg = Config::default();
        assert_eq!(cfg.horizon_ticks(), 5);

        let mut cfg = Config::default();
        cfg.reward.horizon = Some(12);
        assert_eq!(cfg.horizon_ticks(), 12);
    }

    #[test]
    fn negative_weight_rejected() {
        let mut cfg = Config::default();
        cfg.reward.tsc_weight = -0.1;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "reward.tsc_weight"));
    }

    #[test]
    fn score_ordering_enforced() {
        let mut cfg = Config::default();
        cfg.reward.partial_score = 2.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn randomization_probability_range_enforced() {
        let mut cfg = Config::default();
        cfg.randomization.probability = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "randomization.probability")
        );
    }

    #[test]
    fn unknown_yaml_field_rejected() {
        let yaml = "decision:\n  decision_interval: 5.0\n  bogus: 1\n";
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn yaml_partial_overrides_defaults() {
        let yaml = r#"
simulator:
  backend: synthetic
  warmup_steps: 10
decision:
  decision_interval: 4.0
reward:
  enable_baseline: true
scenarios:
  - name: grid_a
    config_file: scenarios/grid_a/network.yaml
"#;
        let cfg = Config::from_yaml_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.simulator.backend, SimBackend::Synthetic);
        assert_eq!(cfg.simulator.warmup_steps, 10);
        assert_eq!(cfg.simulator.step_length, 1.0);
        assert_eq!(cfg.decision.decision_interval, 4.0);
        assert!(cfg.reward.enable_baseline);
        assert_eq!(cfg.scenarios.len(), 1);
        assert_eq!(cfg.horizon_ticks(), 4);
    }

    #[test]
    fn duplicate_scenarios_rejected() {
        let mut cfg = Config::default();
        let sc = ScenarioConfig {
            name: "a".into(),
            config_file: "a.sumocfg".into(),
        };
        cfg.scenarios = vec![sc.clone(), sc];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn discover_finds_sumocfg_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("alpha");
        let b = dir.path().join("beta");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("alpha.sumocfg"), "<configuration/>").unwrap();

        let found = discover_scenarios(dir.path(), SimBackend::Sumo);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "alpha");
        assert!(found[0].config_file.exists());
        assert_eq!(found[1].name, "beta");
        assert!(!found[1].config_file.exists());
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = Config::default().fingerprint();
        let b = Config::default().fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
