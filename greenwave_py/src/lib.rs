// greenwave_py/src/lib.rs
//
// Python bindings for the greenwave reward chain.
//
// Exposes the reward-function contract used by GRPO-style trainers:
// parallel lists (prompts, completions, state files) in, one float per
// sample out.
// - reward_fn: one-shot scoring with an optional config file
// - RewardFn: reusable scorer that keeps its config and last batch stats
//
// Simulation runs with the GIL released.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use greenwave::dataset::DECISION_REQUEST_SCHEMA;
use greenwave::reward::{classify, BatchStats, RewardBreakdown, RewardChain, RewardError};

fn to_py_err(err: RewardError) -> PyErr {
    match err {
        RewardError::LengthMismatch { .. } | RewardError::Config(_) => {
            PyValueError::new_err(err.to_string())
        }
        RewardError::SimulationFailed { .. } => PyRuntimeError::new_err(err.to_string()),
    }
}

fn load_chain(config_path: Option<&str>) -> PyResult<RewardChain> {
    RewardChain::from_config_path(config_path.map(std::path::Path::new)).map_err(to_py_err)
}

/// Convert batch statistics to a Python dictionary.
fn stats_to_dict(py: Python<'_>, stats: &BatchStats) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("total", stats.total)?;
    dict.set_item("strict", stats.strict)?;
    dict.set_item("partial", stats.partial)?;
    dict.set_item("invalid", stats.invalid)?;
    dict.set_item("format_accuracy", stats.format_accuracy)?;
    dict.set_item("mean_format_score", stats.mean_format_score)?;
    dict.set_item("mean_simulation_score", stats.mean_simulation_score)?;
    dict.set_item("mean_final_score", stats.mean_final_score)?;
    dict.set_item("simulation_failures", stats.simulation_failures)?;
    dict.set_item("simulation_failure_rate", stats.simulation_failure_rate)?;
    dict.set_item("baseline_agreement_rate", stats.baseline_agreement_rate)?;
    Ok(dict.into())
}

/// Convert one sample's breakdown to a Python dictionary.
fn breakdown_to_dict(py: Python<'_>, b: &RewardBreakdown) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("format", b.format.as_str())?;
    dict.set_item("decision", b.decision.map(|d| d.as_str()))?;
    dict.set_item("baseline_decision", b.baseline_decision.map(|d| d.as_str()))?;
    dict.set_item("format_score", b.format_score)?;
    dict.set_item("simulation_score", b.simulation_score)?;
    dict.set_item("final_score", b.final_score)?;
    dict.set_item("simulated", b.simulated)?;
    if let Some(eval) = &b.evaluation {
        dict.set_item("queue_before", eval.queue_before)?;
        dict.set_item("queue_after", eval.queue_after)?;
        dict.set_item("delta", eval.delta)?;
    }
    dict.set_item("error", b.error.as_deref())?;
    Ok(dict.into())
}

/// Reusable reward function.
///
/// Args:
///     config_path: optional YAML config; GREENWAVE_* env overrides apply
#[pyclass]
struct RewardFn {
    chain: RewardChain,
    last_stats: Option<BatchStats>,
}

#[pymethods]
impl RewardFn {
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<&str>) -> PyResult<Self> {
        Ok(Self {
            chain: load_chain(config_path)?,
            last_stats: None,
        })
    }

    /// Score a batch; returns one float per sample, in input order.
    fn __call__(
        &mut self,
        py: Python<'_>,
        prompts: Vec<String>,
        completions: Vec<String>,
        state_files: Vec<String>,
    ) -> PyResult<Vec<f64>> {
        let chain = &self.chain;
        let (breakdowns, stats) = py
            .allow_threads(|| chain.score_batch_detailed(&prompts, &completions, &state_files))
            .map_err(to_py_err)?;
        self.last_stats = Some(stats);
        Ok(breakdowns.iter().map(|b| b.final_score).collect())
    }

    /// Score a batch and return per-sample breakdown dicts plus batch stats.
    fn score_detailed(
        &mut self,
        py: Python<'_>,
        prompts: Vec<String>,
        completions: Vec<String>,
        state_files: Vec<String>,
    ) -> PyResult<(Vec<Py<PyDict>>, Py<PyDict>)> {
        let chain = &self.chain;
        let (breakdowns, stats) = py
            .allow_threads(|| chain.score_batch_detailed(&prompts, &completions, &state_files))
            .map_err(to_py_err)?;
        let samples = breakdowns
            .iter()
            .map(|b| breakdown_to_dict(py, b))
            .collect::<PyResult<Vec<_>>>()?;
        let stats_dict = stats_to_dict(py, &stats)?;
        self.last_stats = Some(stats);
        Ok((samples, stats_dict))
    }

    /// Statistics of the most recent batch, or None before the first call.
    fn last_stats(&self, py: Python<'_>) -> PyResult<Option<Py<PyDict>>> {
        self.last_stats
            .as_ref()
            .map(|s| stats_to_dict(py, s))
            .transpose()
    }
}

/// One-shot reward function.
///
/// Args:
///     prompts: prompts from the dataset's `prompt` field
///     outputs: model completions
///     state_files: snapshot paths from the dataset's `state_file` field
///     config_path: optional YAML config
///
/// Returns:
///     list[float], same length and order as the inputs
#[pyfunction]
#[pyo3(signature = (prompts, outputs, state_files, config_path=None))]
fn reward_fn(
    py: Python<'_>,
    prompts: Vec<String>,
    outputs: Vec<String>,
    state_files: Vec<String>,
    config_path: Option<&str>,
) -> PyResult<Vec<f64>> {
    let chain = load_chain(config_path)?;
    py.allow_threads(|| chain.score_batch(&prompts, &outputs, &state_files))
        .map_err(to_py_err)
}

/// Format class of one output: "strict", "partial" or "invalid".
#[pyfunction]
fn format_class(output: &str) -> &'static str {
    classify(output).class.as_str()
}

/// Schema tag carried by every decision prompt.
#[pyfunction]
fn prompt_schema() -> &'static str {
    DECISION_REQUEST_SCHEMA
}

/// Python module definition.
#[pymodule]
fn greenwave_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RewardFn>()?;
    m.add_function(wrap_pyfunction!(reward_fn, m)?)?;
    m.add_function(wrap_pyfunction!(format_class, m)?)?;
    m.add_function(wrap_pyfunction!(prompt_schema, m)?)?;
    Ok(())
}
