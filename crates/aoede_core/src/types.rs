//! Shared domain types: turns, stored messages, and the JSON contracts
//! spoken by the dispatcher and executor models.
//!
//! Model outputs are parsed into tagged results (`Ok(decision)` /
//! `Err(SchemaError)`) rather than panicking paths, so the pipeline can
//! run its bounded repair retry and fall back without unwinding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Conversation primitives
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One inbound user utterance plus its conversational context.
/// Immutable once logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_id: String,
    pub text: String,
    /// Transport the turn arrived on ("cli", "tg", ...).
    pub channel: String,
    /// Conversation identifier within the channel.
    pub chat_id: String,
    pub participants: Vec<String>,
    /// Unix seconds.
    pub ts: i64,
}

impl Turn {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            chat_id: user_id.clone(),
            user_id,
            text: text.into(),
            channel: "cli".to_string(),
            participants: Vec::new(),
            ts: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.channel = channel.into();
        self.chat_id = chat_id.into();
        self
    }
}

/// A message as persisted in the append-only log. Only `approved` is ever
/// mutated after insert, and only by explicit feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: String,
    pub role: Role,
    pub text: String,
    /// Unix seconds.
    pub ts: i64,
    pub approved: bool,
}

// ============================================================================
// Dispatcher contract
// ============================================================================

/// Structured verdict of the fast dispatcher model.
///
/// Every field except `intent` is optional on the wire; `#[serde(default)]`
/// lets a sparse-but-valid reply parse, and validation only rejects replies
/// whose `intent` is missing or empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchDecision {
    pub intent: String,
    /// Tool names worth exposing to the executor in full.
    pub tools_hint: Vec<String>,
    /// Tool calls the dispatcher already knows should run.
    pub tools_request: Vec<ToolCallRequest>,
    /// Override query for retrieval; the raw user text is used when absent.
    pub rag_query: Option<String>,
    pub style_directive: Option<String>,
    pub affect_update: AffectUpdate,
    /// Candidate response angles, at most three are considered.
    pub suggestions: Vec<SuggestionCandidate>,
}

impl DispatchDecision {
    /// The stand-in used when the dispatcher fails outright: plain chat,
    /// no tools, a generic warm register.
    pub fn conservative_default() -> Self {
        Self {
            intent: "chat".to_string(),
            style_directive: Some("warm, brief, no assumptions".to_string()),
            ..Self::default()
        }
    }
}

/// Proposed absolute affect levels, keyed by channel name.
/// Unknown keys are ignored downstream, never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectUpdate {
    pub levels: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionCandidate {
    /// Bandit arm discriminator ("good", "care", "mischief", ...).
    pub kind: String,
    pub text: String,
    /// Dispatcher's own confidence in [0, 1]; 0.5 assumed when absent.
    pub confidence: Option<f64>,
}

impl Default for SuggestionCandidate {
    fn default() -> Self {
        Self {
            kind: "good".to_string(),
            text: String::new(),
            confidence: None,
        }
    }
}

// ============================================================================
// Executor contract
// ============================================================================

/// Structured reply of the slow executor model. `text` is the one required
/// field; everything else degrades to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyDraft {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub memory: Vec<MemoryItem>,
    pub plan: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A durable observation the executor wants remembered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryItem {
    pub kind: MemoryKind,
    /// Stable key for fact upserts; free-form notes leave it empty.
    pub key: Option<String>,
    pub text: String,
    pub importance: Option<f64>,
}

impl Default for MemoryItem {
    fn default() -> Self {
        Self {
            kind: MemoryKind::Note,
            key: None,
            text: String::new(),
            importance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Fact,
    Note,
}

// ============================================================================
// Schema errors
// ============================================================================

/// Why a model reply failed structural validation. Carries the raw output
/// so the repair retry can quote it back to the model.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no JSON object found in model output")]
    NoJson { raw: String },
    #[error("model output is not valid JSON: {reason}")]
    Malformed { raw: String, reason: String },
    #[error("required field `{field}` missing or empty")]
    MissingField { raw: String, field: &'static str },
}

impl SchemaError {
    pub fn raw(&self) -> &str {
        match self {
            SchemaError::NoJson { raw }
            | SchemaError::Malformed { raw, .. }
            | SchemaError::MissingField { raw, .. } => raw,
        }
    }
}
