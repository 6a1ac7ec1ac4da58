// src/reward/chain.rs
//
// Reward composition: format score, then simulation score, then the
// weighted sum
//
//   final = format_weight * format_score + tsc_weight * simulation_score
//
// An invalid format stops the chain before any simulator is started.
// Simulation failures are carried as data on the breakdown; only
// `strict_batch` turns them into an error for the whole batch.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::counterfactual::{CounterfactualEvaluator, EvalTarget, EvaluationResult};
use super::format::{classify, FormatClass};
use super::pool::score_parallel;
use super::RewardError;
use crate::baseline::MaxPressure;
use crate::config::{Config, ScenarioConfig};
use crate::dataset::DecisionRequest;
use crate::sim::LaunchSpec;
use crate::types::Decision;

/// Everything computed for one (prompt, output, state file) sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardBreakdown {
    pub format: FormatClass,
    pub decision: Option<Decision>,
    pub baseline_decision: Option<Decision>,
    pub format_score: f64,
    pub simulation_score: f64,
    pub final_score: f64,
    /// Whether a counterfactual simulation was attempted.
    pub simulated: bool,
    /// Model-run evaluation, when one was attempted.
    pub evaluation: Option<EvaluationResult>,
    pub error: Option<String>,
}

impl RewardBreakdown {
    /// Simulation was attempted and did not produce a usable score.
    pub fn simulation_failed(&self) -> bool {
        self.simulated && self.error.is_some()
    }
}

/// Aggregate statistics over one scored batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub strict: usize,
    pub partial: usize,
    pub invalid: usize,
    /// strict / total.
    pub format_accuracy: f64,
    pub mean_format_score: f64,
    pub mean_simulation_score: f64,
    pub mean_final_score: f64,
    pub simulation_failures: usize,
    /// Failures over samples that attempted simulation.
    pub simulation_failure_rate: f64,
    /// Fraction of comparable samples where the model agreed with
    /// max-pressure; `None` when tracking is off or nothing was comparable.
    pub baseline_agreement_rate: Option<f64>,
}

impl BatchStats {
    pub fn from_breakdowns(breakdowns: &[RewardBreakdown], track_agreement: bool) -> Self {
        let total = breakdowns.len();
        if total == 0 {
            return Self::default();
        }
        let count = |class: FormatClass| breakdowns.iter().filter(|b| b.format == class).count();
        let mean = |f: fn(&RewardBreakdown) -> f64| breakdowns.iter().map(f).sum::<f64>() / total as f64;

        let attempted = breakdowns.iter().filter(|b| b.simulated).count();
        let simulation_failures = breakdowns.iter().filter(|b| b.simulation_failed()).count();

        let baseline_agreement_rate = if track_agreement {
            let pairs: Vec<bool> = breakdowns
                .iter()
                .filter_map(|b| Some(b.decision? == b.baseline_decision?))
                .collect();
            if pairs.is_empty() {
                None
            } else {
                Some(pairs.iter().filter(|&&agree| agree).count() as f64 / pairs.len() as f64)
            }
        } else {
            None
        };

        let strict = count(FormatClass::Strict);
        Self {
            total,
            strict,
            partial: count(FormatClass::Partial),
            invalid: count(FormatClass::Invalid),
            format_accuracy: strict as f64 / total as f64,
            mean_format_score: mean(|b| b.format_score),
            mean_simulation_score: mean(|b| b.simulation_score),
            mean_final_score: mean(|b| b.final_score),
            simulation_failures,
            simulation_failure_rate: if attempted == 0 {
                0.0
            } else {
                simulation_failures as f64 / attempted as f64
            },
            baseline_agreement_rate,
        }
    }
}

/// Scores model outputs against their prompts and snapshots.
#[derive(Debug, Clone)]
pub struct RewardChain {
    cfg: Config,
    scenarios: HashMap<String, ScenarioConfig>,
    baseline: MaxPressure,
    port_range: (u16, u16),
}

impl RewardChain {
    pub fn new(cfg: Config) -> Self {
        let scenarios = cfg
            .resolve_scenarios()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        Self {
            baseline: MaxPressure::new(cfg.baseline.clone()),
            port_range: cfg.simulator.port_range,
            scenarios,
            cfg,
        }
    }

    /// Load (file, env overrides, validation) and build.
    pub fn from_config_path(path: Option<&Path>) -> Result<Self, RewardError> {
        let cfg = Config::load(path).map_err(|e| RewardError::Config(e.to_string()))?;
        Ok(Self::new(cfg))
    }

    /// Restrict simulator ports, e.g. to one worker's slice.
    pub fn with_port_range(mut self, range: (u16, u16)) -> Self {
        self.port_range = range;
        self
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn evaluator_for(&self, scenario: &str) -> Option<CounterfactualEvaluator> {
        let sc = self.scenarios.get(scenario)?;
        let launch = LaunchSpec::new(&sc.config_file, &self.cfg.simulator).with_port_range(self.port_range);
        Some(CounterfactualEvaluator::new(
            launch,
            self.cfg.horizon_ticks(),
            self.cfg.decision.effective_extend_seconds(),
            self.cfg.reward.scale,
        ))
    }

    /// Score one sample. Never fails; problems end up in `error`.
    pub fn score(&self, prompt: &str, output: &str, state_file: &str) -> RewardBreakdown {
        let rc = &self.cfg.reward;
        let fmt = classify(output);
        let format_score = fmt.class.score(rc);
        let mut out = RewardBreakdown {
            format: fmt.class,
            decision: fmt.decision,
            baseline_decision: None,
            format_score,
            simulation_score: 0.0,
            final_score: rc.format_weight * format_score,
            simulated: false,
            evaluation: None,
            error: None,
        };
        let Some(decision) = fmt.decision else {
            return out;
        };

        let request = match DecisionRequest::from_prompt(prompt) {
            Ok(r) => r,
            Err(e) => {
                out.simulated = true;
                out.error = Some(e.to_string());
                return out;
            }
        };

        let baseline_decision = match self.baseline.decide(
            request.current_phase_id,
            &request.phase_queues,
            request.current_green_elapsed,
            request.min_green,
            request.max_green,
        ) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("[reward] baseline rejected {}: {e}", request.junction_id);
                out.simulated = true;
                out.error = Some(e.to_string());
                return out;
            }
        };
        out.baseline_decision = Some(baseline_decision);

        // Samples without a persisted snapshot are scored on format only.
        if state_file.is_empty() {
            return out;
        }
        out.simulated = true;

        let Some(evaluator) = self.evaluator_for(&request.scenario) else {
            out.error = Some(format!("unknown scenario '{}'", request.scenario));
            return out;
        };
        let target = EvalTarget {
            snapshot: Path::new(state_file),
            tls: &request.junction_id,
            phase_order: &request.phase_order,
        };

        let (simulation_score, evaluation) = if rc.enable_baseline {
            let rel = evaluator.evaluate_relative(target, decision, baseline_decision);
            if let Err(reason) = &rel.baseline {
                if rel.model.success {
                    log::warn!("[reward] baseline run failed ({reason}); using absolute reward");
                }
            }
            (rel.simulation_score(), rel.model)
        } else {
            let eval = evaluator.evaluate(target, decision);
            (eval.reward, eval)
        };

        out.error = evaluation.error.clone();
        out.simulation_score = if evaluation.success { simulation_score } else { 0.0 };
        out.final_score = rc.format_weight * format_score + rc.tsc_weight * out.simulation_score;
        out.evaluation = Some(evaluation);
        out
    }

    /// Score a batch, returning breakdowns in input order plus statistics.
    ///
    /// Uses the worker pool when `reward.parallelism > 1`.
    pub fn score_batch_detailed(
        &self,
        prompts: &[String],
        outputs: &[String],
        state_files: &[String],
    ) -> Result<(Vec<RewardBreakdown>, BatchStats), RewardError> {
        if prompts.len() != outputs.len() || prompts.len() != state_files.len() {
            return Err(RewardError::LengthMismatch {
                prompts: prompts.len(),
                outputs: outputs.len(),
                state_files: state_files.len(),
            });
        }

        let breakdowns = if self.cfg.reward.parallelism > 1 && prompts.len() > 1 {
            score_parallel(&self.cfg, prompts, outputs, state_files)
        } else {
            prompts
                .iter()
                .zip(outputs)
                .zip(state_files)
                .map(|((p, o), s)| self.score(p, o, s))
                .collect()
        };

        for (index, b) in breakdowns.iter().enumerate() {
            if b.simulation_failed() {
                let message = b.error.clone().unwrap_or_default();
                if self.cfg.reward.strict_batch {
                    return Err(RewardError::SimulationFailed { index, message });
                }
                log::warn!("[reward] sample {index}: simulation failed: {message}");
            }
        }

        let stats = BatchStats::from_breakdowns(&breakdowns, self.cfg.reward.track_baseline_agreement);
        log::info!(
            "[reward] batch of {}: strict={} partial={} invalid={} sim_failures={} mean_final={:.4}",
            stats.total,
            stats.strict,
            stats.partial,
            stats.invalid,
            stats.simulation_failures,
            stats.mean_final_score
        );
        Ok((breakdowns, stats))
    }

    /// Reward function contract: parallel lists in, one float per sample out.
    pub fn score_batch(
        &self,
        prompts: &[String],
        outputs: &[String],
        state_files: &[String],
    ) -> Result<Vec<f64>, RewardError> {
        let (breakdowns, _) = self.score_batch_detailed(prompts, outputs, state_files)?;
        Ok(breakdowns.iter().map(|b| b.final_score).collect())
    }
}
