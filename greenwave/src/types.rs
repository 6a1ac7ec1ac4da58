// src/types.rs
//
// Common shared types for the greenwave decision/reward pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Simulation time in seconds.
pub type SimTime = f64;

/// 0-based position of a phase inside a controller's phase program.
pub type PhaseIndex = usize;

/// Binary signal-timing decision.
///
/// On the model-output wire this is `"yes"` (extend) / `"no"` (switch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Keep the current green phase for another interval.
    Extend,
    /// Advance to the next green phase in the execution order.
    Switch,
}

impl Decision {
    /// Canonical model-output answer for this decision.
    pub fn as_answer(&self) -> &'static str {
        match self {
            Decision::Extend => "yes",
            Decision::Switch => "no",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Extend => "extend",
            Decision::Switch => "switch",
        }
    }

    /// Parse a model answer (`yes`/`no`, case-insensitive, surrounding
    /// whitespace ignored).
    pub fn from_answer(s: &str) -> Option<Decision> {
        let t = s.trim();
        if t.eq_ignore_ascii_case("yes") {
            Some(Decision::Extend)
        } else if t.eq_ignore_ascii_case("no") {
            Some(Decision::Switch)
        } else {
            None
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    /// Accepts `extend`/`switch` as well as the `yes`/`no` answers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.eq_ignore_ascii_case("extend") {
            return Ok(Decision::Extend);
        }
        if t.eq_ignore_ascii_case("switch") {
            return Ok(Decision::Switch);
        }
        Decision::from_answer(t).ok_or_else(|| format!("unrecognised decision `{t}`"))
    }
}
