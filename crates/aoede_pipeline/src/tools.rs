//! Tool registry and execution.
//!
//! A tool exposes two descriptions: a one-line purpose shown to the
//! dispatcher as part of the capability catalog, and the full calling
//! instructions shown to the executor only when the tool was hinted.
//! Execution is failure-isolated per call: a tool that errors or times out
//! becomes an error-valued outcome, never a failed turn.

use aoede_core::types::ToolCallRequest;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// ToolHandler trait
// ============================================================================

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Unique name used for dispatch, e.g. `note.create`.
    fn name(&self) -> &str;

    /// One line for the dispatcher's capability catalog.
    fn purpose(&self) -> &str;

    /// Full calling instructions for the executor, argument format included.
    fn instruction(&self) -> &str;

    async fn call(&self, args: &Value) -> anyhow::Result<Value>;
}

/// Result of one tool invocation. Failures travel as values so a broken
/// tool still shows up in the refinement prompt and the turn envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub name: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(name: &str, result: Value) -> Self {
        Self {
            name: name.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// ToolRegistry
// ============================================================================

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. Overwrites any existing handler with the same name.
    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        let name = handler.name().to_string();
        tracing::debug!("Registered tool: {}", name);
        self.handlers.insert(name, handler);
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// `(name, purpose)` rows for the dispatcher, sorted by name so the
    /// prompt is stable across runs.
    pub fn catalog(&self) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = self
            .handlers
            .values()
            .map(|h| (h.name().to_string(), h.purpose().to_string()))
            .collect();
        rows.sort();
        rows
    }

    /// Full instructions for the hinted names, unknown names skipped.
    pub fn instructions_for(&self, names: &[String]) -> String {
        names
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|h| format!("{}: {}", h.name(), h.instruction()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run every requested call in order, each under its own timeout.
    pub async fn run_all(
        &self,
        calls: &[ToolCallRequest],
        timeout: Duration,
    ) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            outcomes.push(self.run_one(call, timeout).await);
        }
        outcomes
    }

    async fn run_one(&self, call: &ToolCallRequest, timeout: Duration) -> ToolOutcome {
        let handler = match self.handlers.get(&call.name) {
            Some(handler) => handler,
            None => return ToolOutcome::failed(&call.name, format!("unknown tool: {}", call.name)),
        };
        match tokio::time::timeout(timeout, handler.call(&call.args)).await {
            Ok(Ok(result)) => ToolOutcome::ok(&call.name, result),
            Ok(Err(e)) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                ToolOutcome::failed(&call.name, e.to_string())
            }
            Err(_) => {
                tracing::warn!(tool = %call.name, "tool call timed out");
                ToolOutcome::failed(&call.name, format!("timed out after {:?}", timeout))
            }
        }
    }
}
