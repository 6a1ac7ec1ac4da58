// src/reward/pool.rs
//
// Parallel batch scoring. Each worker owns a RewardChain restricted to its
// own port slice; samples travel as value-typed `EvalTask`s and come back
// in input order.

use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use super::chain::{RewardBreakdown, RewardChain};
use super::format::classify;
use crate::config::Config;
use crate::sim::partition_ports;

/// One sample to score.
#[derive(Debug, Clone)]
pub struct EvalTask {
    pub prompt: String,
    pub output: String,
    pub state_file: String,
}

fn run_task(chain: &RewardChain, task: EvalTask) -> RewardBreakdown {
    chain.score(&task.prompt, &task.output, &task.state_file)
}

/// Breakdown for a sample whose evaluation panicked.
fn lost_sample(cfg: &Config, output: &str) -> RewardBreakdown {
    let fmt = classify(output);
    let format_score = fmt.class.score(&cfg.reward);
    RewardBreakdown {
        format: fmt.class,
        decision: fmt.decision,
        baseline_decision: None,
        format_score,
        simulation_score: 0.0,
        final_score: cfg.reward.format_weight * format_score,
        simulated: true,
        evaluation: None,
        error: Some("evaluation worker panicked".to_string()),
    }
}

/// Score parallel slices on `cfg.reward.parallelism` workers.
///
/// Callers check that the three slices have equal length.
pub fn score_parallel(
    cfg: &Config,
    prompts: &[String],
    outputs: &[String],
    state_files: &[String],
) -> Vec<RewardBreakdown> {
    let workers = cfg.reward.parallelism.min(prompts.len()).max(1);
    let base = RewardChain::new(cfg.clone());
    let slots: Vec<RewardChain> = partition_ports(cfg.simulator.port_range, workers)
        .into_iter()
        .map(|range| base.clone().with_port_range(range))
        .collect();
    let tasks: Vec<EvalTask> = prompts
        .iter()
        .zip(outputs)
        .zip(state_files)
        .map(|((p, o), s)| EvalTask {
            prompt: p.clone(),
            output: o.clone(),
            state_file: s.clone(),
        })
        .collect();

    let pool = match ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("greenwave-reward-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            log::warn!("[reward] worker pool unavailable ({err}); scoring sequentially");
            return tasks.into_iter().map(|task| run_task(&base, task)).collect();
        }
    };

    log::debug!("[reward] scoring {} samples on {workers} workers", tasks.len());
    pool.install(|| {
        tasks
            .into_par_iter()
            .enumerate()
            .map(|(index, task)| {
                let chain = &slots[rayon::current_thread_index().unwrap_or(0) % slots.len()];
                let output = task.output.clone();
                panic::catch_unwind(AssertUnwindSafe(|| run_task(chain, task))).unwrap_or_else(|_| {
                    log::warn!("[reward] worker panicked while scoring sample {index}");
                    lost_sample(cfg, &output)
                })
            })
            .collect()
    })
}
