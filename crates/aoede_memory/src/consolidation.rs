//! Sleep consolidation: fold raw messages into tiered summaries behind a
//! watermark, all-or-nothing.
//!
//! One run is a single SQLite transaction: collect messages newer than the
//! last successful batch, summarize them per UTC day into the temp tier,
//! promote temp days past the retention window into the permanent tier, and
//! commit the batch row last. A failure before commit rolls the whole run
//! back; the next run re-derives its lower bound from the last `ok` batch,
//! so nothing is double-counted and nothing is lost.
//!
//! This is the one subsystem allowed to surface a hard error. Everything
//! after commit (affect reset, export regeneration) is best-effort.

use crate::export;
use crate::store::SqliteStore;
use crate::summarize::{truncate_bytes, DaySummarizer, ExtractiveSummarizer};
use aoede_affect::AffectEngine;
use aoede_core::config::SleepConfig;
use aoede_core::{Role, StoredMessage};
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const SALIENCE_DEFAULT: f64 = 0.6;

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("consolidation storage failure: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("day summarizer failed: {0}")]
    Summarize(String),
}

/// What one run did, or why it declined to run.
#[derive(Debug)]
pub struct SleepReport {
    pub performed: bool,
    pub batch_id: Option<String>,
    pub processed_count: i64,
    pub days_summarized: usize,
    pub days_promoted: usize,
    pub skip_reason: Option<String>,
}

impl SleepReport {
    fn skipped(reason: &str) -> Self {
        Self {
            performed: false,
            batch_id: None,
            processed_count: 0,
            days_summarized: 0,
            days_promoted: 0,
            skip_reason: Some(reason.to_string()),
        }
    }
}

pub struct ConsolidationEngine {
    store: SqliteStore,
    summarizer: Arc<dyn DaySummarizer>,
    config: SleepConfig,
    affect: Option<AffectEngine>,
    export_dir: Option<PathBuf>,
    // One run system-wide; held across the whole read -> promote -> commit
    // sequence.
    run_lock: Arc<Mutex<()>>,
}

impl ConsolidationEngine {
    pub fn new(store: SqliteStore, config: SleepConfig) -> Self {
        let summarizer = Arc::new(ExtractiveSummarizer::new(config.summary_max_tokens));
        Self {
            store,
            summarizer,
            config,
            affect: None,
            export_dir: None,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn DaySummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Engine to reset post-commit, mirroring waking up rested.
    pub fn with_affect(mut self, affect: AffectEngine) -> Self {
        self.affect = Some(affect);
        self
    }

    /// Directory whose training exports are regenerated post-commit.
    pub fn with_export_dir(mut self, dir: PathBuf) -> Self {
        self.export_dir = Some(dir);
        self
    }

    /// True inside the configured nightly window.
    pub fn in_sleep_window(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        hour >= self.config.window_start_hour && hour < self.config.window_end_hour
    }

    /// True when enough time has passed since the last successful run.
    pub async fn is_due(&self, now: DateTime<Utc>) -> Result<bool, ConsolidationError> {
        let row = sqlx::query(
            "SELECT MAX(finished_at) AS last FROM sleep_batches WHERE status = 'ok'",
        )
        .fetch_one(self.store.pool())
        .await?;
        let last: Option<i64> = row.get("last");
        Ok(match last {
            Some(ts) => {
                let hours = (now.timestamp() - ts) / 3600;
                hours >= self.config.min_interval_hours as i64
            }
            None => true,
        })
    }

    /// Gated entry point for the background scheduler.
    pub async fn run_scheduled(&self) -> Result<SleepReport, ConsolidationError> {
        let now = Utc::now();
        if !self.in_sleep_window(now) {
            return Ok(SleepReport::skipped("outside sleep window"));
        }
        if !self.is_due(now).await? {
            return Ok(SleepReport::skipped("too soon since last consolidation"));
        }
        self.run().await
    }

    /// Manual trigger (`/sleep`, CLI). Bypasses the window and interval
    /// gates, unless manual runs are disabled outright.
    pub async fn run_now(&self) -> Result<SleepReport, ConsolidationError> {
        if !self.config.allow_manual_trigger {
            return Ok(SleepReport::skipped("manual trigger disabled"));
        }
        self.run().await
    }

    async fn run(&self) -> Result<SleepReport, ConsolidationError> {
        let _guard = self.run_lock.lock().await;

        let now = Utc::now();
        // Watermark: the upper bound of the last committed batch, epoch when
        // none exists. Failed rows never move it.
        let row = sqlx::query(
            "SELECT to_ts FROM sleep_batches WHERE status = 'ok' ORDER BY to_ts DESC LIMIT 1",
        )
        .fetch_optional(self.store.pool())
        .await?;
        let from_ts: i64 = row.map(|r| r.get("to_ts")).unwrap_or(0);
        let to_ts = now.timestamp();
        let batch_id = Uuid::new_v4().to_string();

        tracing::info!(batch_id = %batch_id, from_ts, to_ts, "starting sleep consolidation");

        match self.run_batch(&batch_id, from_ts, to_ts, now).await {
            Ok(report) => {
                self.post_commit().await;
                Ok(report)
            }
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "consolidation failed, rolled back");
                // Best-effort failure marker outside the aborted transaction;
                // the watermark only ever advances through 'ok' rows.
                let _ = sqlx::query(
                    "INSERT INTO sleep_batches (id, started_at, finished_at, from_ts, to_ts, processed_count, status)
                     VALUES (?, ?, ?, ?, ?, 0, 'failed')",
                )
                .bind(&batch_id)
                .bind(now.timestamp())
                .bind(Utc::now().timestamp())
                .bind(from_ts)
                .bind(to_ts)
                .execute(self.store.pool())
                .await;
                Err(e)
            }
        }
    }

    async fn run_batch(
        &self,
        batch_id: &str,
        from_ts: i64,
        to_ts: i64,
        started: DateTime<Utc>,
    ) -> Result<SleepReport, ConsolidationError> {
        let mut tx = self.store.pool().begin().await?;

        // COLLECT: everything strictly above the watermark, up to now.
        let rows = sqlx::query(
            "SELECT id, user_id, role, text, ts, approved FROM messages
             WHERE ts > ? AND ts <= ? ORDER BY ts ASC, id ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&mut *tx)
        .await?;

        let messages: Vec<StoredMessage> = rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                let approved: i64 = row.get("approved");
                StoredMessage {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    role: if role == "assistant" { Role::Assistant } else { Role::User },
                    text: row.get("text"),
                    ts: row.get("ts"),
                    approved: approved != 0,
                }
            })
            .collect();
        let processed_count = messages.len() as i64;

        // GROUP by UTC calendar day.
        let mut by_day: BTreeMap<String, Vec<StoredMessage>> = BTreeMap::new();
        for msg in messages {
            let day = match Utc.timestamp_opt(msg.ts, 0).single() {
                Some(dt) => dt.format("%Y-%m-%d").to_string(),
                None => continue,
            };
            by_day.entry(day).or_default().push(msg);
        }

        // SUMMARIZE each day into the temp tier, tagged with this batch.
        let days_summarized = by_day.len();
        for (date, day_messages) in &by_day {
            let text = self
                .summarizer
                .summarize(date, day_messages)
                .await
                .map_err(|e| ConsolidationError::Summarize(e.to_string()))?;
            sqlx::query(
                "INSERT INTO day_summaries (date, text, salience, batch_id, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(date)
            .bind(&text)
            .bind(SALIENCE_DEFAULT)
            .bind(batch_id)
            .bind(started.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        // PROMOTE: temp days older than the retention window move to the
        // permanent tier, concatenated and capped.
        let cutoff = (started - Duration::days(self.config.temp_retention_days))
            .format("%Y-%m-%d")
            .to_string();
        let stale = sqlx::query(
            "SELECT date, GROUP_CONCAT(text, ' | ') AS merged FROM day_summaries
             WHERE date < ? GROUP BY date ORDER BY date ASC",
        )
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let days_promoted = stale.len();
        for row in &stale {
            let date: String = row.get("date");
            let merged: String = row.get("merged");
            let summary = truncate_bytes(&merged, self.config.long_day_max_chars);
            sqlx::query(
                "INSERT INTO long_days (date, summary, key_events, created_at)
                 VALUES (?, ?, '[]', ?)
                 ON CONFLICT(date) DO UPDATE SET summary = excluded.summary",
            )
            .bind(&date)
            .bind(&summary)
            .bind(started.timestamp())
            .execute(&mut *tx)
            .await?;
        }
        if days_promoted > 0 {
            sqlx::query("DELETE FROM day_summaries WHERE date < ?")
                .bind(&cutoff)
                .execute(&mut *tx)
                .await?;
        }

        // COMMIT the batch row last; the watermark advances with it or not
        // at all.
        sqlx::query(
            "INSERT INTO sleep_batches (id, started_at, finished_at, from_ts, to_ts, processed_count, status)
             VALUES (?, ?, ?, ?, ?, ?, 'ok')",
        )
        .bind(batch_id)
        .bind(started.timestamp())
        .bind(Utc::now().timestamp())
        .bind(from_ts)
        .bind(to_ts)
        .bind(processed_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            batch_id = %batch_id,
            processed_count,
            days_summarized,
            days_promoted,
            "sleep consolidation committed"
        );

        Ok(SleepReport {
            performed: true,
            batch_id: Some(batch_id.to_string()),
            processed_count,
            days_summarized,
            days_promoted,
            skip_reason: None,
        })
    }

    /// Side effects that ride on a successful batch but must never undo it.
    async fn post_commit(&self) {
        if let Some(affect) = &self.affect {
            affect.reset().await;
        }
        if let Some(dir) = &self.export_dir {
            if let Err(e) = export::write_all(&self.store, dir).await {
                tracing::warn!(error = %e, "export regeneration failed after consolidation");
            }
        }
    }
}
