//! Parsing model output into the structured turn types.
//!
//! Small local models wrap JSON in prose and code fences more often than
//! not, so parsing walks a recovery ladder: direct parse, fenced block,
//! then the outermost brace span. Anything past that is a schema error the
//! caller can feed back into a repair retry.

use aoede_core::types::{DispatchDecision, ReplyDraft, SchemaError};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static RE_FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced JSON regex is valid")
});

/// Recover one JSON object from raw model output.
fn recover_object(raw: &str) -> Result<Value, SchemaError> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    if let Some(caps) = RE_FENCED_JSON.captures(trimmed) {
        match serde_json::from_str::<Value>(&caps[1]) {
            Ok(value) => return Ok(value),
            Err(e) => {
                return Err(SchemaError::Malformed {
                    raw: raw.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return match serde_json::from_str::<Value>(&trimmed[start..=end]) {
                Ok(value) => Ok(value),
                Err(e) => Err(SchemaError::Malformed {
                    raw: raw.to_string(),
                    reason: e.to_string(),
                }),
            };
        }
    }

    Err(SchemaError::NoJson {
        raw: raw.to_string(),
    })
}

/// Parse the dispatcher's verdict. Rejects output without a usable intent;
/// suggestions beyond the third are dropped rather than treated as errors.
pub fn parse_decision(raw: &str) -> Result<DispatchDecision, SchemaError> {
    let value = recover_object(raw)?;
    let mut decision: DispatchDecision =
        serde_json::from_value(value).map_err(|e| SchemaError::Malformed {
            raw: raw.to_string(),
            reason: e.to_string(),
        })?;
    if decision.intent.trim().is_empty() {
        return Err(SchemaError::MissingField {
            raw: raw.to_string(),
            field: "intent",
        });
    }
    decision.suggestions.truncate(3);
    Ok(decision)
}

/// Parse the executor's reply draft. `text` must be present and non-empty.
pub fn parse_draft(raw: &str) -> Result<ReplyDraft, SchemaError> {
    let value = recover_object(raw)?;
    let draft: ReplyDraft = serde_json::from_value(value).map_err(|e| SchemaError::Malformed {
        raw: raw.to_string(),
        reason: e.to_string(),
    })?;
    if draft.text.trim().is_empty() {
        return Err(SchemaError::MissingField {
            raw: raw.to_string(),
            field: "text",
        });
    }
    Ok(draft)
}
