//! The built-in reference tools: notes, reminders, and date search.
//!
//! All three are thin handlers over the store. Argument validation happens
//! here so a model hallucinating arguments gets a usable error message back
//! instead of a database error.

use crate::tools::{ToolHandler, ToolRegistry};
use anyhow::Result;
use aoede_memory::SqliteStore;
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::sync::Arc;

const REMINDER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Register the reference tool set on a registry.
pub fn register_builtins(registry: &mut ToolRegistry, store: Arc<SqliteStore>) {
    registry.register(Box::new(NoteCreate {
        store: store.clone(),
    }));
    registry.register(Box::new(ReminderCreate {
        store: store.clone(),
    }));
    registry.register(Box::new(SearchByDate { store }));
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    match args[field].as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => anyhow::bail!("field '{}' must not be empty", field),
        None => anyhow::bail!("field '{}' is required", field),
    }
}

struct NoteCreate {
    store: Arc<SqliteStore>,
}

#[async_trait::async_trait]
impl ToolHandler for NoteCreate {
    fn name(&self) -> &str {
        "note.create"
    }

    fn purpose(&self) -> &str {
        "save a short free-form note"
    }

    fn instruction(&self) -> &str {
        r#"note.create {"text": string (required, non-empty), "tags": [string] (optional)} returns {"ok": true, "note_id": number}"#
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let text = required_str(args, "text")?;
        let tags: Vec<String> = args["tags"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|t| t.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let note_id = self.store.insert_note(text, &tags).await?;
        Ok(json!({ "ok": true, "note_id": note_id }))
    }
}

struct ReminderCreate {
    store: Arc<SqliteStore>,
}

#[async_trait::async_trait]
impl ToolHandler for ReminderCreate {
    fn name(&self) -> &str {
        "reminder.create"
    }

    fn purpose(&self) -> &str {
        "schedule a reminder for a specific time"
    }

    fn instruction(&self) -> &str {
        r#"reminder.create {"title": string (required), "when": "YYYY-MM-DD HH:MM" UTC (required), "channel": string (optional)} returns {"ok": true, "reminder_id": number, "when": string}"#
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let title = required_str(args, "title")?;
        let when = required_str(args, "when")?;
        let parsed = NaiveDateTime::parse_from_str(when, REMINDER_TIME_FORMAT).map_err(|_| {
            anyhow::anyhow!("field 'when' must be formatted as YYYY-MM-DD HH:MM, got '{}'", when)
        })?;
        let channel = args["channel"].as_str();
        let reminder_id = self
            .store
            .insert_reminder(title, parsed.and_utc().timestamp(), channel)
            .await?;
        // The scheduled time is echoed back in canonical form so the
        // refinement stage can state it verbatim.
        Ok(json!({
            "ok": true,
            "reminder_id": reminder_id,
            "when": parsed.format(REMINDER_TIME_FORMAT).to_string(),
        }))
    }
}

struct SearchByDate {
    store: Arc<SqliteStore>,
}

#[async_trait::async_trait]
impl ToolHandler for SearchByDate {
    fn name(&self) -> &str {
        "messages.search_by_date"
    }

    fn purpose(&self) -> &str {
        "look up what was said on a given day"
    }

    fn instruction(&self) -> &str {
        r#"messages.search_by_date {"date": "YYYY-MM-DD" (required), "span_days": number (optional, default 1)} returns {"ok": true, "items": [{"role", "text", "ts"}], "count": number}"#
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let date = required_str(args, "date")?;
        let span_days = args["span_days"].as_i64().unwrap_or(1);
        let messages = self.store.messages_on_date(date, span_days).await?;
        let items: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "text": m.text,
                    "ts": m.ts,
                })
            })
            .collect();
        Ok(json!({ "ok": true, "count": items.len(), "items": items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoede_core::types::Role;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    async fn toolbox() -> (Arc<SqliteStore>, ToolRegistry) {
        let store = Arc::new(
            SqliteStore::new(":memory:")
                .await
                .expect("Failed to create store"),
        );
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, store.clone());
        (store, registry)
    }

    async fn call_one(registry: &ToolRegistry, name: &str, args: Value) -> crate::tools::ToolOutcome {
        let calls = vec![aoede_core::types::ToolCallRequest {
            name: name.to_string(),
            args,
        }];
        registry
            .run_all(&calls, Duration::from_secs(5))
            .await
            .remove(0)
    }

    #[tokio::test]
    async fn test_note_create_persists_and_returns_id() {
        let (_store, registry) = toolbox().await;
        let outcome = call_one(
            &registry,
            "note.create",
            json!({"text": "buy oat milk", "tags": ["groceries"]}),
        )
        .await;
        assert!(!outcome.is_error(), "note.create failed: {:?}", outcome.error);
        let result = outcome.result.unwrap();
        assert_eq!(result["ok"], true);
        assert!(result["note_id"].as_i64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_note_create_rejects_empty_text() {
        let (_store, registry) = toolbox().await;
        let outcome = call_one(&registry, "note.create", json!({"text": "   "})).await;
        assert!(outcome.is_error());
        assert!(outcome.error.unwrap().contains("'text'"));
    }

    #[tokio::test]
    async fn test_reminder_create_parses_when() {
        let (_store, registry) = toolbox().await;
        let outcome = call_one(
            &registry,
            "reminder.create",
            json!({"title": "dentist", "when": "2026-09-01 15:30"}),
        )
        .await;
        assert!(!outcome.is_error(), "reminder.create failed: {:?}", outcome.error);
        let result = outcome.result.unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["when"], "2026-09-01 15:30");
    }

    #[tokio::test]
    async fn test_reminder_create_rejects_bad_time() {
        let (_store, registry) = toolbox().await;
        let outcome = call_one(
            &registry,
            "reminder.create",
            json!({"title": "dentist", "when": "tomorrow-ish"}),
        )
        .await;
        assert!(outcome.is_error());
        assert!(outcome.error.unwrap().contains("YYYY-MM-DD HH:MM"));
    }

    #[tokio::test]
    async fn test_search_by_date_finds_that_days_messages() {
        let (store, registry) = toolbox().await;
        let on_day = Utc
            .with_ymd_and_hms(2026, 3, 14, 10, 0, 0)
            .unwrap()
            .timestamp();
        store
            .insert_message("u1", Role::User, "pi day prep", on_day)
            .await
            .expect("Failed to insert message");
        store
            .insert_message("u1", Role::User, "way later", on_day + 40 * 86_400)
            .await
            .expect("Failed to insert message");

        let outcome = call_one(
            &registry,
            "messages.search_by_date",
            json!({"date": "2026-03-14"}),
        )
        .await;
        let result = outcome.result.expect("search failed");
        assert_eq!(result["count"], 1);
        assert_eq!(result["items"][0]["text"], "pi day prep");
    }

    #[tokio::test]
    async fn test_search_by_date_rejects_malformed_date() {
        let (_store, registry) = toolbox().await;
        let outcome = call_one(
            &registry,
            "messages.search_by_date",
            json!({"date": "14/03/2026"}),
        )
        .await;
        assert!(outcome.is_error());
    }
}
