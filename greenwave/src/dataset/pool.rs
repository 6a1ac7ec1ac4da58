// src/dataset/pool.rs
//
// Multi-scenario generation.
//
// Each scenario becomes a value-typed `ScenarioTask`; a dedicated rayon
// pool runs them, each worker thread with its own disjoint port range and
// its own simulator. One scenario failing (or panicking) never stops the
// batch.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use super::collector::{CollectionOutcome, Collector, ScenarioStatus};
use super::writer::{write_generation_outputs, GenerationSummary};
use crate::config::{Config, ScenarioConfig};
use crate::sim::{partition_ports, LaunchSpec};
use crate::telemetry::{decision_record, scenario_record, TelemetrySink};

/// Everything a worker needs to collect one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTask {
    pub scenario: ScenarioConfig,
    pub config: Config,
    pub out_dir: PathBuf,
}

fn run_task(port_range: (u16, u16), task: ScenarioTask) -> CollectionOutcome {
    let launch = LaunchSpec::new(&task.scenario.config_file, &task.config.simulator)
        .with_port_range(port_range);
    Collector::new(task.scenario, &task.config, &launch, &task.out_dir).run()
}

/// Collect every scenario, in parallel, returning outcomes in input order.
///
/// A panicking scenario is reported as `WorkerFailed`.
pub fn collect_all(
    cfg: &Config,
    scenarios: &[ScenarioConfig],
    out_dir: &Path,
) -> Result<Vec<CollectionOutcome>> {
    let workers = cfg.collection.parallelism.min(scenarios.len()).max(1);
    let slots = partition_ports(cfg.simulator.port_range, workers);
    let tasks: Vec<ScenarioTask> = scenarios
        .iter()
        .map(|s| ScenarioTask {
            scenario: s.clone(),
            config: cfg.clone(),
            out_dir: out_dir.to_path_buf(),
        })
        .collect();

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("greenwave-collect-{i}"))
        .build()
        .context("Failed to build scenario worker pool")?;

    log::info!(
        "[generate] {} scenarios on {workers} workers",
        scenarios.len()
    );
    let outcomes = pool.install(|| {
        tasks
            .into_par_iter()
            .map(|task| {
                let slot = rayon::current_thread_index().unwrap_or(0) % slots.len();
                let name = task.scenario.name.clone();
                panic::catch_unwind(AssertUnwindSafe(|| run_task(slots[slot], task)))
                    .unwrap_or_else(|_| {
                        log::warn!("[generate] worker for {name} panicked");
                        CollectionOutcome::empty(&name, ScenarioStatus::WorkerFailed)
                    })
            })
            .collect()
    });
    Ok(outcomes)
}

/// Full generation run: collect, write outputs, emit telemetry.
pub fn generate(cfg: &Config, out_dir: &Path, telemetry: &mut TelemetrySink) -> Result<GenerationSummary> {
    let scenarios = cfg.resolve_scenarios();
    if scenarios.is_empty() {
        bail!("no scenarios configured (set `scenarios` or `scenario_root`)");
    }

    let outcomes = collect_all(cfg, &scenarios, out_dir)?;
    for outcome in &outcomes {
        for entry in &outcome.entries {
            telemetry.log_json(&decision_record(entry));
        }
    }

    let summary = write_generation_outputs(out_dir, cfg, &outcomes)?;
    for s in &summary.scenarios {
        if s.status.is_failure() {
            log::warn!("[generate] {}: {}", s.name, s.status.as_str());
        }
        telemetry.log_json(&scenario_record(s));
    }
    telemetry.flush();

    log::info!(
        "[generate] {} entries across {} scenarios ({} failed)",
        summary.total_entries,
        summary.scenarios.len(),
        summary.failed_scenarios
    );
    Ok(summary)
}
