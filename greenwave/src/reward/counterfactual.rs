// src/reward/counterfactual.rs
//
// Counterfactual reward evaluation.
//
// Protocol for one evaluation: fresh simulator, restore the snapshot,
// measure the controller's total queue, apply the action, advance a fixed
// horizon (or until demand runs out), measure again. The simulator is
// always torn down afterwards, on success and on failure.
//
// reward          = tanh(-delta / scale)
// relative reward = tanh((baseline_delta - model_delta) / scale)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::signal::phase::next_in_order;
use crate::sim::{LaunchSpec, SimAdapter};
use crate::types::{Decision, PhaseIndex};

/// Bounded reward for a queue change: positive when the queue shrinks.
pub fn normalize(delta: f64, scale: f64) -> f64 {
    (-delta / scale).tanh()
}

/// Relative advantage of the model over the baseline.
pub fn relative_reward(model_delta: f64, baseline_delta: f64, scale: f64) -> f64 {
    ((baseline_delta - model_delta) / scale).tanh()
}

/// Outcome of one counterfactual run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub queue_before: f64,
    pub queue_after: f64,
    pub delta: f64,
    pub reward: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl EvaluationResult {
    pub fn measured(queue_before: f64, queue_after: f64, scale: f64) -> Self {
        let delta = queue_after - queue_before;
        Self {
            queue_before,
            queue_after,
            delta,
            reward: normalize(delta, scale),
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = "evaluation failed".to_string();
        }
        Self {
            queue_before: 0.0,
            queue_after: 0.0,
            delta: 0.0,
            reward: 0.0,
            success: false,
            error: Some(message),
        }
    }
}

/// Baseline leg of a relative evaluation that completed.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRun {
    pub decision: Decision,
    pub result: EvaluationResult,
    pub relative_reward: f64,
}

/// Model leg plus the baseline leg (or why it failed).
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeEvaluation {
    pub model: EvaluationResult,
    pub baseline: Result<BaselineRun, String>,
}

impl RelativeEvaluation {
    /// Relative reward when the baseline ran, else the model's absolute reward.
    pub fn simulation_score(&self) -> f64 {
        match &self.baseline {
            Ok(run) => run.relative_reward,
            Err(_) => self.model.reward,
        }
    }
}

/// What to evaluate.
#[derive(Debug, Clone, Copy)]
pub struct EvalTarget<'a> {
    pub snapshot: &'a Path,
    pub tls: &'a str,
    /// Green-phase execution order; empty means "ask the simulator".
    pub phase_order: &'a [PhaseIndex],
}

/// Runs counterfactual evaluations against fresh simulator instances.
#[derive(Debug, Clone)]
pub struct CounterfactualEvaluator {
    launch: LaunchSpec,
    horizon: u64,
    extend_seconds: f64,
    scale: f64,
}

impl CounterfactualEvaluator {
    pub fn new(launch: LaunchSpec, horizon: u64, extend_seconds: f64, scale: f64) -> Self {
        Self {
            launch,
            horizon,
            extend_seconds,
            scale,
        }
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Absolute evaluation of `decision`. Never panics or errors; failures
    /// come back as `success = false`, `reward = 0`.
    pub fn evaluate(&self, target: EvalTarget<'_>, decision: Decision) -> EvaluationResult {
        match self.run(target, decision) {
            Ok((before, after)) => EvaluationResult::measured(before, after, self.scale),
            Err(msg) => {
                log::warn!(
                    "[reward] {} evaluation of {} failed: {msg}",
                    decision,
                    target.snapshot.display()
                );
                EvaluationResult::failure(msg)
            }
        }
    }

    /// Model run plus baseline run from the same snapshot.
    pub fn evaluate_relative(
        &self,
        target: EvalTarget<'_>,
        model: Decision,
        baseline: Decision,
    ) -> RelativeEvaluation {
        let model_result = self.evaluate(target, model);
        if !model_result.success {
            return RelativeEvaluation {
                model: model_result,
                baseline: Err("model run failed".to_string()),
            };
        }
        let base_result = self.evaluate(target, baseline);
        let baseline = if base_result.success {
            Ok(BaselineRun {
                decision: baseline,
                relative_reward: relative_reward(model_result.delta, base_result.delta, self.scale),
                result: base_result,
            })
        } else {
            Err(base_result
                .error
                .unwrap_or_else(|| "baseline run failed".to_string()))
        };
        RelativeEvaluation {
            model: model_result,
            baseline,
        }
    }

    /// Restore, apply, advance. Returns (queue_before, queue_after).
    fn run(&self, target: EvalTarget<'_>, decision: Decision) -> Result<(f64, f64), String> {
        if !target.snapshot.exists() {
            return Err(format!("snapshot {} not found", target.snapshot.display()));
        }
        // Dropping the adapter closes the simulator on every early return.
        let mut adapter = SimAdapter::from_spec(&self.launch);
        if !adapter.start_from_snapshot(target.snapshot) {
            return Err(format!(
                "could not restore snapshot {}",
                target.snapshot.display()
            ));
        }
        let program = adapter
            .program(target.tls)
            .ok_or_else(|| format!("traffic light {} not in simulation", target.tls))?;

        let before = adapter.total_queue(target.tls);

        match decision {
            Decision::Extend => {
                if !adapter.extend_phase(target.tls, self.extend_seconds) {
                    return Err(format!("extend_phase failed on {}", target.tls));
                }
            }
            Decision::Switch => {
                let current = adapter.phase_index(target.tls);
                let next = if target.phase_order.is_empty() {
                    program.next_green(current)
                } else {
                    next_in_order(target.phase_order, current)
                }
                .ok_or_else(|| format!("{} has no green phase to switch to", target.tls))?;
                if !adapter.set_phase(target.tls, next) {
                    return Err(format!("set_phase({next}) failed on {}", target.tls));
                }
            }
        }

        for _ in 0..self.horizon {
            if !adapter.step() {
                break;
            }
        }
        let after = adapter.total_queue(target.tls);
        adapter.close();
        Ok((before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_bounded_and_sign_flipped() {
        assert_eq!(normalize(0.0, 10.0), 0.0);
        for delta in [-1e6, -25.0, -0.1, 0.1, 3.0, 1e6] {
            let r = normalize(delta, 10.0);
            assert!((-1.0..=1.0).contains(&r));
            assert_eq!(r.signum(), -delta.signum());
        }
    }

    #[test]
    fn queue_reduction_rewards_tanh_one() {
        let r = EvaluationResult::measured(20.0, 10.0, 10.0);
        assert_eq!(r.delta, -10.0);
        assert!((r.reward - 0.7616).abs() < 1e-4);
        assert!(r.success);
    }

    #[test]
    fn relative_to_worse_baseline() {
        let rel = relative_reward(-10.0, 5.0, 10.0);
        assert!((rel - 1.5f64.tanh()).abs() < 1e-12);
        assert!((rel - 0.905).abs() < 1e-3);
    }

    #[test]
    fn failed_baseline_falls_back_to_absolute() {
        let eval = RelativeEvaluation {
            model: EvaluationResult::measured(20.0, 10.0, 10.0),
            baseline: Err("simulator crashed".into()),
        };
        assert!((eval.simulation_score() - 1.0f64.tanh()).abs() < 1e-12);
    }

    #[test]
    fn failure_result_has_error() {
        let r = EvaluationResult::failure("");
        assert!(!r.success);
        assert_eq!(r.reward, 0.0);
        assert!(r.error.as_deref().map(|e| !e.is_empty()).unwrap_or(false));
    }

    #[test]
    fn missing_snapshot_is_a_failure_result() {
        let dir = tempfile::tempdir().unwrap();
        let sim = crate::config::SimulatorConfig {
            backend: crate::config::SimBackend::Synthetic,
            ..Default::default()
        };
        let eval = CounterfactualEvaluator::new(
            LaunchSpec::new(dir.path().join("network.yaml"), &sim),
            5,
            5.0,
            10.0,
        );
        let target = EvalTarget {
            snapshot: &dir.path().join("missing.json"),
            tls: "J1",
            phase_order: &[],
        };
        let r = eval.evaluate(target, Decision::Extend);
        assert!(!r.success);
        assert_eq!(r.reward, 0.0);
        assert!(r.error.unwrap().contains("not found"));
    }

    #[test]
    fn failed_model_run_skips_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let sim = crate::config::SimulatorConfig {
            backend: crate::config::SimBackend::Synthetic,
            ..Default::default()
        };
        let eval = CounterfactualEvaluator::new(
            LaunchSpec::new(dir.path().join("network.yaml"), &sim),
            5,
            5.0,
            10.0,
        );
        let target = EvalTarget {
            snapshot: &dir.path().join("missing.json"),
            tls: "J1",
            phase_order: &[],
        };
        let rel = eval.evaluate_relative(target, Decision::Extend, Decision::Switch);
        assert!(!rel.model.success);
        assert_eq!(rel.baseline.as_ref().err().map(String::as_str), Some("model run failed"));
        assert_eq!(rel.simulation_score(), 0.0);
    }
}
