// src/reward/format.rs
//
// Model-output format scoring.
//
// Strict: the whole output is a JSON object with exactly one field, named
// `extend` in any casing, whose value is "yes" or "no" in any casing.
// Partial: the decision can be recovered by a lenient pattern (surrounding
// prose, extra fields, single quotes, `=` instead of `:`).
// Invalid: nothing extractable; the reward chain stops here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::config::RewardConfig;
use crate::types::Decision;

/// Field name of the canonical answer object.
pub const ANSWER_FIELD: &str = "extend";

const LENIENT_PATTERN: &str = r#"(?i)["']?\bextend\b["']?\s*[:=]\s*["']?\s*\b(yes|no)\b"#;

static LENIENT_ANSWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(LENIENT_PATTERN).expect("Lenient answer pattern must compile"));

/// How well an output matched the answer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatClass {
    Strict,
    Partial,
    Invalid,
}

impl FormatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatClass::Strict => "strict",
            FormatClass::Partial => "partial",
            FormatClass::Invalid => "invalid",
        }
    }

    pub fn score(&self, cfg: &RewardConfig) -> f64 {
        match self {
            FormatClass::Strict => cfg.strict_score,
            FormatClass::Partial => cfg.partial_score,
            FormatClass::Invalid => cfg.invalid_score,
        }
    }
}

/// Parsed model answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionResponse {
    pub decision: Decision,
}

/// Number of fields in a JSON object as written, duplicates included.
struct EntryCount(usize);

impl<'de> Deserialize<'de> for EntryCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountVisitor;

        impl<'de> Visitor<'de> for CountVisitor {
            type Value = EntryCount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<EntryCount, A::Error> {
                let mut n = 0;
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {
                    n += 1;
                }
                Ok(EntryCount(n))
            }
        }

        deserializer.deserialize_map(CountVisitor)
    }
}

impl DecisionResponse {
    /// Strict parse: a single-field JSON object, field `extend`, value yes/no.
    pub fn parse_strict(output: &str) -> Option<Self> {
        // Duplicate keys collapse in a parsed map, so count them as written.
        let EntryCount(fields) = serde_json::from_str(output.trim()).ok()?;
        if fields != 1 {
            return None;
        }
        let value: JsonValue = serde_json::from_str(output.trim()).ok()?;
        let obj = value.as_object()?;
        let (key, val) = obj.iter().next()?;
        if !key.eq_ignore_ascii_case(ANSWER_FIELD) {
            return None;
        }
        let answer = val.as_str()?;
        if answer.eq_ignore_ascii_case("yes") {
            Some(Self {
                decision: Decision::Extend,
            })
        } else if answer.eq_ignore_ascii_case("no") {
            Some(Self {
                decision: Decision::Switch,
            })
        } else {
            None
        }
    }

    /// Lenient extraction: first `extend: yes|no` style match anywhere.
    pub fn parse_lenient(output: &str) -> Option<Self> {
        let caps = LENIENT_ANSWER.captures(output)?;
        let decision = Decision::from_answer(caps.get(1)?.as_str())?;
        Some(Self { decision })
    }

    /// Canonical strict rendering, e.g. `{"extend": "yes"}`.
    pub fn to_canonical(&self) -> String {
        format!(r#"{{"{ANSWER_FIELD}": "{}"}}"#, self.decision.as_answer())
    }
}

/// Classification of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatResult {
    pub class: FormatClass,
    pub decision: Option<Decision>,
}

/// Strict first, then lenient, else invalid.
pub fn classify(output: &str) -> FormatResult {
    if let Some(r) = DecisionResponse::parse_strict(output) {
        return FormatResult {
            class: FormatClass::Strict,
            decision: Some(r.decision),
        };
    }
    if let Some(r) = DecisionResponse::parse_lenient(output) {
        return FormatResult {
            class: FormatClass::Partial,
            decision: Some(r.decision),
        };
    }
    FormatResult {
        class: FormatClass::Invalid,
        decision: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_outputs_any_casing_and_whitespace() {
        for (out, want) in [
            (r#"{"extend": "yes"}"#, Decision::Extend),
            (r#"{"extend":"no"}"#, Decision::Switch),
            (r#"  {"EXTEND" : "Yes"}  "#, Decision::Extend),
            ("{\n  \"Extend\": \"NO\"\n}", Decision::Switch),
        ] {
            let r = classify(out);
            assert_eq!(r.class, FormatClass::Strict, "{out}");
            assert_eq!(r.decision, Some(want), "{out}");
        }
    }

    #[test]
    fn embedded_or_extra_fields_are_partial() {
        for (out, want) in [
            (r#"Sure! {"extend": "yes"} because the queue is long."#, Decision::Extend),
            (r#"{"extend": "no", "reason": "empty approach"}"#, Decision::Switch),
            ("extend = no", Decision::Switch),
            ("{'extend': 'YES'}", Decision::Extend),
        ] {
            let r = classify(out);
            assert_eq!(r.class, FormatClass::Partial, "{out}");
            assert_eq!(r.decision, Some(want), "{out}");
        }
    }

    #[test]
    fn duplicate_answer_fields_are_not_strict() {
        let r = classify(r#"{"extend": "yes", "extend": "no"}"#);
        assert_eq!(r.class, FormatClass::Partial);
        assert_eq!(r.decision, Some(Decision::Extend));
        assert!(DecisionResponse::parse_strict(r#"{"extend":"no","EXTEND":"no"}"#).is_none());
    }

    #[test]
    fn unextractable_outputs_are_invalid() {
        for out in [
            "",
            "   ",
            r#"{"hold": "yes"}"#,
            r#"{"extend": "maybe"}"#,
            r#"{"extend": true}"#,
            "overextended: yes",
            "I think we should keep it green.",
        ] {
            let r = classify(out);
            assert_eq!(r.class, FormatClass::Invalid, "{out:?}");
            assert_eq!(r.decision, None);
        }
    }

    #[test]
    fn yes_prefix_words_do_not_match() {
        assert_eq!(classify("extend: yesterday").class, FormatClass::Invalid);
        assert_eq!(classify("extend: nope").class, FormatClass::Invalid);
    }

    #[test]
    fn scores_follow_config() {
        let cfg = RewardConfig::default();
        assert_eq!(FormatClass::Strict.score(&cfg), 1.0);
        assert_eq!(FormatClass::Partial.score(&cfg), 0.5);
        assert_eq!(FormatClass::Invalid.score(&cfg), -1.0);
    }

    #[test]
    fn canonical_rendering_is_strict() {
        let r = DecisionResponse {
            decision: Decision::Switch,
        };
        assert_eq!(r.to_canonical(), r#"{"extend": "no"}"#);
        assert_eq!(classify(&r.to_canonical()).class, FormatClass::Strict);
    }
}
