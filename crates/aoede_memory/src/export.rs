//! Offline training exports, regenerated after each successful sleep batch.
//!
//! Two JSONL files: `sft_staging.jsonl` pairs each approved assistant reply
//! with the user message that prompted it, and `dispatcher_tuning.jsonl`
//! pairs user text plus logged affect levels with the routing the service
//! actually chose. Both are full rewrites, not appends; the database is the
//! source of truth and the files are derived artifacts.

use crate::store::SqliteStore;
use anyhow::{Context, Result};
use serde_json::json;
use sqlx::Row;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct ExportSummary {
    pub sft_rows: usize,
    pub tuning_rows: usize,
}

pub async fn write_all(store: &SqliteStore, dir: &Path) -> Result<ExportSummary> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export dir {}", dir.display()))?;
    let sft_rows = write_sft(store, &dir.join("sft_staging.jsonl")).await?;
    let tuning_rows = write_dispatcher_tuning(store, &dir.join("dispatcher_tuning.jsonl")).await?;
    tracing::info!(sft_rows, tuning_rows, dir = %dir.display(), "training exports rewritten");
    Ok(ExportSummary {
        sft_rows,
        tuning_rows,
    })
}

/// Approved assistant replies with their prompting user message, ordered by
/// message id. Replies with no preceding user message are skipped.
pub async fn write_sft(store: &SqliteStore, path: &Path) -> Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT a.text AS completion,
               (SELECT u.text FROM messages u
                WHERE u.user_id = a.user_id AND u.role = 'user' AND u.id < a.id
                ORDER BY u.id DESC LIMIT 1) AS prompt
        FROM messages a
        WHERE a.role = 'assistant' AND a.approved = 1
        ORDER BY a.id ASC
        "#,
    )
    .fetch_all(store.pool())
    .await
    .context("Failed to fetch approved replies for SFT export")?;

    let mut out = String::new();
    let mut count = 0usize;
    for row in rows {
        let prompt: Option<String> = row.get("prompt");
        let completion: String = row.get("completion");
        let Some(prompt) = prompt else { continue };
        let line = json!({ "prompt": prompt, "completion": completion });
        out.push_str(&line.to_string());
        out.push('\n');
        count += 1;
    }

    std::fs::write(path, out)
        .with_context(|| format!("Failed to write SFT export {}", path.display()))?;
    Ok(count)
}

/// Every assistant reply with recorded routing metadata, joined with the
/// nearest affect snapshot at or before the reply.
pub async fn write_dispatcher_tuning(store: &SqliteStore, path: &Path) -> Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT meta.intent, meta.suggestion_kind,
               (SELECT u.text FROM messages u
                WHERE u.user_id = m.user_id AND u.role = 'user' AND u.id < m.id
                ORDER BY u.id DESC LIMIT 1) AS user_text,
               (SELECT l.levels_json FROM affect_log l
                WHERE l.user_id = m.user_id AND l.ts <= m.ts
                ORDER BY l.ts DESC, l.id DESC LIMIT 1) AS levels_json
        FROM messages m
        JOIN message_meta meta ON meta.msg_id = m.id
        WHERE m.role = 'assistant'
        ORDER BY m.id ASC
        "#,
    )
    .fetch_all(store.pool())
    .await
    .context("Failed to fetch routing rows for tuning export")?;

    let mut out = String::new();
    let mut count = 0usize;
    for row in rows {
        let user_text: Option<String> = row.get("user_text");
        let Some(user_text) = user_text else { continue };
        let intent: String = row.get("intent");
        let kind: String = row.get("suggestion_kind");
        let levels_json: Option<String> = row.get("levels_json");
        let levels = levels_json
            .and_then(|j| serde_json::from_str::<serde_json::Value>(&j).ok())
            .unwrap_or(serde_json::Value::Null);
        let line = json!({
            "input": { "user_text": user_text, "levels": levels },
            "output": { "intent": intent, "suggestion_kind": kind },
        });
        out.push_str(&line.to_string());
        out.push('\n');
        count += 1;
    }

    std::fs::write(path, out)
        .with_context(|| format!("Failed to write tuning export {}", path.display()))?;
    Ok(count)
}
