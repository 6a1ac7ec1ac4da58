// src/dataset/entry.rs
//
// Decision-point data entry and the typed prompt payload it carries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DatasetError;
use crate::types::{PhaseIndex, SimTime};

/// Schema tag carried by every serialized [`DecisionRequest`].
pub const DECISION_REQUEST_SCHEMA: &str = "greenwave-decision-request-v1";

/// Canonical answer shape the model is asked to produce.
pub const ANSWER_FORMAT: &str = r#"{"extend": "yes" | "no"}"#;

/// Structured decision request handed to the policy as its prompt.
///
/// Unknown fields are rejected when parsing a prompt back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionRequest {
    pub schema: String,
    pub scenario: String,
    pub junction_id: String,
    pub timestamp: SimTime,
    pub current_phase_id: PhaseIndex,
    pub current_phase_order_index: usize,
    pub phase_order: Vec<PhaseIndex>,
    pub current_green_elapsed: f64,
    pub min_green: f64,
    pub max_green: f64,
    pub decision_interval: f64,
    pub can_extend: bool,
    /// Mean halted vehicles per phase.
    pub phase_queues: BTreeMap<PhaseIndex, f64>,
    pub answer_format: String,
}

impl DecisionRequest {
    pub fn to_prompt(&self) -> Result<String, DatasetError> {
        serde_json::to_string(self).map_err(|e| DatasetError::Json(e.to_string()))
    }

    /// Parse and validate a prompt produced by [`to_prompt`](Self::to_prompt).
    pub fn from_prompt(prompt: &str) -> Result<Self, DatasetError> {
        let req: DecisionRequest = serde_json::from_str(prompt)
            .map_err(|e| DatasetError::InvalidPrompt(e.to_string()))?;
        if req.schema != DECISION_REQUEST_SCHEMA {
            return Err(DatasetError::InvalidPrompt(format!(
                "unsupported schema '{}'",
                req.schema
            )));
        }
        if !req.phase_queues.contains_key(&req.current_phase_id) {
            return Err(DatasetError::InvalidPrompt(format!(
                "current phase {} has no queue entry",
                req.current_phase_id
            )));
        }
        Ok(req)
    }
}

/// One training sample captured at a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub id: String,
    pub scenario: String,
    pub junction_id: String,
    pub timestamp: SimTime,
    pub current_phase_id: PhaseIndex,
    /// Position of the current phase within `phase_order`.
    pub current_phase_order_index: usize,
    pub current_green_elapsed: f64,
    /// Effective (post-randomisation) minimum green.
    pub min_green: f64,
    /// Effective (post-randomisation) maximum green.
    pub max_green: f64,
    pub decision_interval: f64,
    pub can_extend: bool,
    /// Green-phase execution order.
    pub phase_order: Vec<PhaseIndex>,
    /// Phase id -> mean queue over that phase's lanes (string keys on disk).
    pub phase_metrics: BTreeMap<PhaseIndex, f64>,
    pub prompt: String,
    /// Snapshot file; empty when this sample was not persisted.
    pub state_file: String,
}

impl DataEntry {
    /// Build an entry and its prompt from a request.
    pub fn from_request(
        id: String,
        request: &DecisionRequest,
        state_file: String,
    ) -> Result<Self, DatasetError> {
        let entry = Self {
            id,
            scenario: request.scenario.clone(),
            junction_id: request.junction_id.clone(),
            timestamp: request.timestamp,
            current_phase_id: request.current_phase_id,
            current_phase_order_index: request.current_phase_order_index,
            current_green_elapsed: request.current_green_elapsed,
            min_green: request.min_green,
            max_green: request.max_green,
            decision_interval: request.decision_interval,
            can_extend: request.can_extend,
            phase_order: request.phase_order.clone(),
            phase_metrics: request.phase_queues.clone(),
            prompt: request.to_prompt()?,
            state_file,
        };
        entry.check()?;
        Ok(entry)
    }

    /// `can_extend` must imply `elapsed + interval <= max_green`.
    pub fn check(&self) -> Result<(), DatasetError> {
        if self.can_extend && self.current_green_elapsed + self.decision_interval > self.max_green {
            return Err(DatasetError::Invariant(format!(
                "{}: can_extend with elapsed {} + interval {} > max_green {}",
                self.id, self.current_green_elapsed, self.decision_interval, self.max_green
            )));
        }
        Ok(())
    }

    pub fn has_snapshot(&self) -> bool {
        !self.state_file.is_empty()
    }
}
