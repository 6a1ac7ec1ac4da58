//! telemetry.rs
//!
//! Lightweight JSONL telemetry sink for greenwave.
//!
//! One JSON object per line, controlled entirely through environment
//! variables so runs can turn telemetry on/off without code changes.
//!
//! # Environment variables
//!
//! - `GREENWAVE_TELEMETRY_MODE`: `"off"` (default) disables telemetry,
//!   `"jsonl"` writes JSONL to `GREENWAVE_TELEMETRY_PATH`.
//! - `GREENWAVE_TELEMETRY_PATH`: Path to the JSONL file. Required when
//!   mode is `"jsonl"`.
//! - `GREENWAVE_TELEMETRY_APPEND`: Optional. When set to `"1"`/`"true"`/`"yes"`,
//!   appends to existing files instead of truncating. Default is truncate.
//!
//! # Schema version
//!
//! The sink itself does not inject `schema_version`. The record builders in
//! this module ([`decision_record`], [`scenario_record`], [`reward_record`],
//! [`batch_record`]) always include it; hand-built records should go through
//! [`ensure_schema_v1`].
//!
//! The sink is single-owner. Worker threads return their results and the
//! driving thread writes the records.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde_json::{self, json, Value as JsonValue};

use crate::dataset::{DataEntry, ScenarioSummary};
use crate::reward::{BatchStats, RewardBreakdown};

/// Current telemetry schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Ensure a JSON record has `schema_version: 1`.
///
/// Inserts the field when missing and leaves an existing value untouched.
/// Non-object records trip a debug assertion and are otherwise ignored.
pub fn ensure_schema_v1(record: &mut JsonValue) {
    match record {
        JsonValue::Object(map) => {
            map.entry("schema_version")
                .or_insert_with(|| JsonValue::Number(SCHEMA_VERSION.into()));
        }
        _ => {
            debug_assert!(
                false,
                "ensure_schema_v1: telemetry records should be JSON objects, got {:?}",
                record
            );
        }
    }
}

/// Telemetry mode, controlled by GREENWAVE_TELEMETRY_MODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    Off,
    Jsonl,
}

impl TelemetryMode {
    /// Parse mode from environment. Defaults to Off.
    pub fn from_env() -> Self {
        match env::var("GREENWAVE_TELEMETRY_MODE") {
            Ok(s) => match s.to_lowercase().as_str() {
                "jsonl" => TelemetryMode::Jsonl,
                // Unknown values mean Off.
                _ => TelemetryMode::Off,
            },
            Err(_) => TelemetryMode::Off,
        }
    }
}

/// Configuration for the telemetry sink.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub path: Option<PathBuf>,
    pub append: bool,
}

impl TelemetryConfig {
    /// Construct from environment variables.
    pub fn from_env() -> Self {
        let mode = TelemetryMode::from_env();

        let path = if mode == TelemetryMode::Jsonl {
            env::var("GREENWAVE_TELEMETRY_PATH").ok().map(PathBuf::from)
        } else {
            None
        };

        TelemetryConfig {
            mode,
            path,
            append: Self::append_from_env(),
        }
    }

    /// JSONL to an explicit path (CLI `--telemetry` flags, tests).
    pub fn jsonl(path: impl Into<PathBuf>, append: bool) -> Self {
        TelemetryConfig {
            mode: TelemetryMode::Jsonl,
            path: Some(path.into()),
            append,
        }
    }

    pub fn append_from_env() -> bool {
        env::var("GREENWAVE_TELEMETRY_APPEND")
            .ok()
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// A JSONL telemetry sink.
///
/// When mode == Off, all methods are no-ops.
/// When mode == Jsonl, the file is opened lazily on first use and one JSON
/// object is appended per line.
pub struct TelemetrySink {
    mode: TelemetryMode,
    path: Option<PathBuf>,
    append: bool,
    writer: Option<BufWriter<File>>,
    records: u64,
}

impl TelemetrySink {
    /// Construct a telemetry sink from environment configuration.
    ///
    /// Never fails: a misconfigured sink turns itself off.
    pub fn from_env() -> Self {
        Self::from_config(TelemetryConfig::from_env())
    }

    pub fn from_config(cfg: TelemetryConfig) -> Self {
        TelemetrySink {
            mode: cfg.mode,
            path: cfg.path,
            append: cfg.append,
            writer: None,
            records: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::from_config(TelemetryConfig {
            mode: TelemetryMode::Off,
            path: None,
            append: false,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.mode == TelemetryMode::Jsonl
    }

    /// Records written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    fn ensure_writer(&mut self) -> Option<&mut BufWriter<File>> {
        if self.mode != TelemetryMode::Jsonl {
            return None;
        }

        if self.writer.is_none() {
            let path = match &self.path {
                Some(p) => p.clone(),
                None => {
                    log::warn!("[telemetry] mode jsonl without GREENWAVE_TELEMETRY_PATH; disabled");
                    self.mode = TelemetryMode::Off;
                    return None;
                }
            };

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            let mut options = OpenOptions::new();
            options.create(true).write(true);
            if self.append {
                options.append(true);
            } else {
                options.truncate(true);
            }

            let file = match options.open(&path) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("[telemetry] cannot open {}: {e}; disabled", path.display());
                    self.mode = TelemetryMode::Off;
                    return None;
                }
            };

            self.writer = Some(BufWriter::new(file));
        }

        self.writer.as_mut()
    }

    /// Log a JSON value as a single line.
    ///
    /// Write errors disable telemetry for the rest of the process; they never
    /// propagate into generation or scoring.
    pub fn log_json(&mut self, value: &JsonValue) {
        if self.mode != TelemetryMode::Jsonl {
            return;
        }

        let writer = match self.ensure_writer() {
            Some(w) => w,
            None => return,
        };

        let line = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(_) => return,
        };

        if writeln!(writer, "{}", line).is_err() {
            self.mode = TelemetryMode::Off;
            self.writer = None;
            return;
        }
        self.records += 1;
    }

    /// Flush the underlying writer, if any.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        self.flush();
    }
}

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

/// One kept decision point.
pub fn decision_record(entry: &DataEntry) -> JsonValue {
    json!({
        "schema_version": SCHEMA_VERSION,
        "event": "decision_point",
        "id": entry.id,
        "scenario": entry.scenario,
        "junction_id": entry.junction_id,
        "t": entry.timestamp,
        "phase": entry.current_phase_id,
        "green_elapsed": entry.current_green_elapsed,
        "min_green": entry.min_green,
        "max_green": entry.max_green,
        "can_extend": entry.can_extend,
        "queue_total": entry.phase_metrics.values().sum::<f64>(),
        "snapshot": entry.has_snapshot(),
    })
}

/// End of one scenario's collection run.
pub fn scenario_record(summary: &ScenarioSummary) -> JsonValue {
    json!({
        "schema_version": SCHEMA_VERSION,
        "event": "scenario_done",
        "scenario": summary.name,
        "status": summary.status.as_str(),
        "entries": summary.entries,
        "snapshots_saved": summary.snapshots_saved,
        "decisions_seen": summary.decisions_seen,
        "decisions_dropped": summary.decisions_dropped,
        "steps": summary.steps,
    })
}

/// One scored model output.
pub fn reward_record(index: usize, breakdown: &RewardBreakdown) -> JsonValue {
    let eval = breakdown.evaluation.as_ref();
    json!({
        "schema_version": SCHEMA_VERSION,
        "event": "reward",
        "index": index,
        "format": breakdown.format.as_str(),
        "decision": breakdown.decision.map(|d| d.as_str()),
        "baseline_decision": breakdown.baseline_decision.map(|d| d.as_str()),
        "format_score": breakdown.format_score,
        "simulation_score": breakdown.simulation_score,
        "final_score": breakdown.final_score,
        "simulated": breakdown.simulated,
        "queue_before": eval.map(|e| e.queue_before),
        "queue_after": eval.map(|e| e.queue_after),
        "delta": eval.map(|e| e.delta),
        "error": breakdown.error,
    })
}

/// Aggregate statistics for one scored batch.
pub fn batch_record(stats: &BatchStats) -> JsonValue {
    json!({
        "schema_version": SCHEMA_VERSION,
        "event": "reward_batch",
        "total": stats.total,
        "strict": stats.strict,
        "partial": stats.partial,
        "invalid": stats.invalid,
        "format_accuracy": stats.format_accuracy,
        "mean_format_score": stats.mean_format_score,
        "mean_simulation_score": stats.mean_simulation_score,
        "mean_final_score": stats.mean_final_score,
        "simulation_failures": stats.simulation_failures,
        "simulation_failure_rate": stats.simulation_failure_rate,
        "baseline_agreement_rate": stats.baseline_agreement_rate,
    })
}
