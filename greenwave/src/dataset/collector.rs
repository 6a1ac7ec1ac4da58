// src/dataset/collector.rs
//
// Dataset collection loop for one scenario.
//
// Drives one simulator instance tick by tick. For every controller with a
// green phase it runs the decision-point detector; on a hit it measures
// per-phase queues, applies the degenerate-state sampling filter and, for
// kept samples, persists a snapshot (every `save_interval`-th kept decision
// at that controller) and records a data entry.
//
// Entries come out in simulation-time order. A missing scenario config or a
// failed simulator start yields an empty outcome instead of an error.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::entry::{DataEntry, DecisionRequest, ANSWER_FORMAT, DECISION_REQUEST_SCHEMA};
use super::STATES_DIR;
use crate::config::{Config, ScenarioConfig, SimBackend};
use crate::decision::DecisionPointDetector;
use crate::signal::randomize::fnv1a;
use crate::signal::{GreenTimeCache, PhaseProgram};
use crate::sim::{LaunchSpec, SimAdapter};
use crate::types::{PhaseIndex, SimTime};

/// How a scenario's collection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Ran until no demand remained.
    Completed,
    /// Stopped at the `max_steps` ceiling.
    StepCeiling,
    /// Scenario config file does not exist.
    MissingConfig,
    /// The simulator could not be started.
    StartFailed,
    /// Collection panicked inside its worker.
    WorkerFailed,
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioStatus::Completed => "completed",
            ScenarioStatus::StepCeiling => "step_ceiling",
            ScenarioStatus::MissingConfig => "missing_config",
            ScenarioStatus::StartFailed => "start_failed",
            ScenarioStatus::WorkerFailed => "worker_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ScenarioStatus::MissingConfig | ScenarioStatus::StartFailed | ScenarioStatus::WorkerFailed
        )
    }
}

/// Result of collecting one scenario.
#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub scenario: String,
    pub status: ScenarioStatus,
    pub entries: Vec<DataEntry>,
    pub snapshots_saved: usize,
    pub decisions_seen: usize,
    pub decisions_dropped: usize,
    pub steps: u64,
}

impl CollectionOutcome {
    pub fn empty(scenario: &str, status: ScenarioStatus) -> Self {
        Self {
            scenario: scenario.to_string(),
            status,
            entries: Vec::new(),
            snapshots_saved: 0,
            decisions_seen: 0,
            decisions_dropped: 0,
            steps: 0,
        }
    }
}

/// Keep probability for a sample: fraction of phases with a non-zero queue.
pub fn keep_probability(queues: &BTreeMap<PhaseIndex, f64>) -> f64 {
    if queues.is_empty() {
        return 0.0;
    }
    let busy = queues.values().filter(|&&q| q > 0.0).count();
    busy as f64 / queues.len() as f64
}

/// Replace characters that are awkward in file names.
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// One scenario's collection run. Owns its simulator, detector and caches.
pub struct Collector {
    scenario: ScenarioConfig,
    cfg: Config,
    adapter: SimAdapter,
    detector: DecisionPointDetector,
    green_times: GreenTimeCache,
    rng: ChaCha8Rng,
    states_dir: PathBuf,
    /// Kept decisions per controller (drives the snapshot save interval).
    kept_per_tls: HashMap<String, u64>,
    next_seq: u64,
}

impl Collector {
    /// `out_dir` is the batch root; this scenario writes under
    /// `<out_dir>/<scenario>/`.
    pub fn new(scenario: ScenarioConfig, cfg: &Config, launch: &LaunchSpec, out_dir: &Path) -> Self {
        let seed = cfg.collection.seed ^ fnv1a(&[scenario.name.as_str()]);
        Self {
            states_dir: out_dir.join(&scenario.name).join(STATES_DIR),
            adapter: SimAdapter::from_spec(launch),
            detector: DecisionPointDetector::new(
                cfg.decision.decision_interval,
                cfg.decision.tolerance,
            ),
            green_times: GreenTimeCache::new(cfg.randomization.clone(), cfg.collection.seed),
            rng: ChaCha8Rng::seed_from_u64(seed),
            kept_per_tls: HashMap::new(),
            next_seq: 0,
            scenario,
            cfg: cfg.clone(),
        }
    }

    pub fn states_dir(&self) -> &Path {
        &self.states_dir
    }

    fn snapshot_extension(&self) -> &'static str {
        match self.cfg.simulator.backend {
            SimBackend::Sumo => "xml",
            SimBackend::Synthetic => "json",
        }
    }

    /// Run to completion (or the step ceiling) and return what was collected.
    pub fn run(mut self) -> CollectionOutcome {
        let name = self.scenario.name.clone();
        if !self.scenario.config_file.exists() {
            log::warn!(
                "[collect] {name}: config {} not found; skipping",
                self.scenario.config_file.display()
            );
            return CollectionOutcome::empty(&name, ScenarioStatus::MissingConfig);
        }
        if let Err(e) = fs::create_dir_all(&self.states_dir) {
            // Snapshots will fail individually; entries are still collected.
            log::warn!("[collect] {name}: cannot create {}: {e}", self.states_dir.display());
        }
        if !self.adapter.start(self.cfg.simulator.warmup_steps) {
            log::warn!("[collect] {name}: simulator failed to start");
            return CollectionOutcome::empty(&name, ScenarioStatus::StartFailed);
        }

        let programs: Vec<PhaseProgram> = self
            .adapter
            .traffic_light_ids()
            .into_iter()
            .filter_map(|tls| self.adapter.program(&tls))
            .filter(PhaseProgram::has_green_phase)
            .collect();
        log::info!(
            "[collect] {name}: {} controllers with green phases",
            programs.len()
        );

        let now = self.adapter.time();
        for program in &programs {
            let phase = self.adapter.phase_index(&program.tls_id);
            let started = now - self.adapter.phase_elapsed(&program.tls_id);
            self.detector.prime(&program.tls_id, phase, started);
        }

        let mut outcome = CollectionOutcome::empty(&name, ScenarioStatus::Completed);
        loop {
            if outcome.steps >= self.cfg.simulator.max_steps {
                log::warn!("[collect] {name}: hit step ceiling {}", outcome.steps);
                outcome.status = ScenarioStatus::StepCeiling;
                break;
            }
            if !self.adapter.step() {
                break;
            }
            outcome.steps += 1;
            let now = self.adapter.time();
            for program in &programs {
                self.visit(program, now, &mut outcome);
            }
        }
        self.adapter.close();

        log::info!(
            "[collect] {name}: {} entries ({} snapshots, {} dropped) in {} steps",
            outcome.entries.len(),
            outcome.snapshots_saved,
            outcome.decisions_dropped,
            outcome.steps
        );
        outcome
    }

    /// Detection + capture for one controller at one tick.
    fn visit(&mut self, program: &PhaseProgram, now: SimTime, outcome: &mut CollectionOutcome) {
        let tls = program.tls_id.as_str();
        let phase_idx = self.adapter.phase_index(tls);
        let elapsed = self.detector.observe(tls, now, phase_idx);

        let Some(phase) = program.phase(phase_idx) else {
            return;
        };
        if !phase.is_green() {
            return;
        }
        let window = self.green_times.window(&self.scenario.name, tls, phase);
        if !self.detector.is_decision_point(elapsed, window.min_green) {
            return;
        }
        outcome.decisions_seen += 1;

        let green_phases: Vec<_> = program
            .phases
            .iter()
            .filter(|p| p.is_green())
            .cloned()
            .collect();
        let queues = self.adapter.phase_queues(&green_phases);

        if self.cfg.collection.sampling_filter {
            let p = keep_probability(&queues);
            let keep = p >= 1.0 || (p > 0.0 && self.rng.gen::<f64>() < p);
            if !keep {
                outcome.decisions_dropped += 1;
                return;
            }
        }

        let kept = self.kept_per_tls.entry(tls.to_string()).or_insert(0);
        *kept += 1;
        let save = (*kept - 1) % self.cfg.collection.save_interval as u64 == 0;

        self.next_seq += 1;
        let id = format!("{}-{}-{:06}", self.scenario.name, file_safe(tls), self.next_seq);

        let state_file = if save {
            let path = self
                .states_dir
                .join(format!("{id}.{}", self.snapshot_extension()));
            if self.adapter.save_snapshot(&path) {
                outcome.snapshots_saved += 1;
                path.display().to_string()
            } else {
                String::new()
            }
        } else {
            String::new()
        };

        let interval = self.detector.decision_interval();
        let request = DecisionRequest {
            schema: DECISION_REQUEST_SCHEMA.to_string(),
            scenario: self.scenario.name.clone(),
            junction_id: tls.to_string(),
            timestamp: now,
            current_phase_id: phase_idx,
            current_phase_order_index: program.order_position(phase_idx).unwrap_or(0),
            phase_order: program.green_order(),
            current_green_elapsed: elapsed,
            min_green: window.min_green,
            max_green: window.max_green,
            decision_interval: interval,
            can_extend: elapsed + interval <= window.max_green,
            phase_queues: queues,
            answer_format: ANSWER_FORMAT.to_string(),
        };

        match DataEntry::from_request(id, &request, state_file) {
            Ok(entry) => outcome.entries.push(entry),
            Err(e) => log::warn!("[collect] {}: dropping entry: {e}", self.scenario.name),
        }
    }
}
