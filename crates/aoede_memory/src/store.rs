//! SQLite persistence for the whole service: the append-only message log,
//! feedback, bandit arms, environment sessions and facts, the tiered
//! summary memory, the consolidation batch ledger, and tool storage.
//!
//! Schema changes are applied as idempotent `CREATE TABLE IF NOT EXISTS`
//! statements on startup. Timestamps are unix seconds throughout.

use anyhow::{Context, Result};
use aoede_core::{Role, StoredMessage};
use chrono::{NaiveDate, TimeZone, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

/// One environment fact, ranked by importance when briefed.
#[derive(Debug, Clone)]
pub struct EnvFact {
    pub key: String,
    pub value: String,
    pub importance: f64,
}

/// Temp-tier day summary row.
#[derive(Debug, Clone)]
pub struct DaySummary {
    pub date: String,
    pub text: String,
    pub salience: f64,
}

/// Permanent-tier day row.
#[derive(Debug, Clone)]
pub struct LongDay {
    pub date: String,
    pub summary: String,
}

/// A completed consolidation batch, as recorded in the ledger.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub id: String,
    pub from_ts: i64,
    pub to_ts: i64,
    pub processed_count: i64,
    pub status: String,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Raw pool handle for callers that need transactions (consolidation).
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                ts INTEGER NOT NULL,
                approved INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create messages table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(ts)")
            .execute(&self.pool)
            .await
            .context("Failed to create messages ts index")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, id)")
            .execute(&self.pool)
            .await
            .context("Failed to create messages user index")?;

        // Intent and suggestion kind chosen at reply time, joined back in by
        // feedback ingestion and the tuning export.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_meta (
                msg_id INTEGER PRIMARY KEY,
                intent TEXT NOT NULL,
                suggestion_kind TEXT NOT NULL,
                FOREIGN KEY(msg_id) REFERENCES messages(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create message_meta table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                msg_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                text TEXT,
                ts INTEGER NOT NULL,
                FOREIGN KEY(msg_id) REFERENCES messages(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create feedback table")?;

        // REAL columns because daily decay multiplies the counters.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bandit_arms (
                intent TEXT NOT NULL,
                kind TEXT NOT NULL,
                wins REAL NOT NULL DEFAULT 1,
                plays REAL NOT NULL DEFAULT 2,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (intent, kind)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create bandit_arms table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS env_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                participants TEXT NOT NULL DEFAULT '[]',
                last_seen INTEGER NOT NULL,
                UNIQUE(channel, chat_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create env_sessions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS env_facts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                env_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                importance REAL NOT NULL DEFAULT 0.5,
                updated_at INTEGER NOT NULL,
                UNIQUE(env_id, key),
                FOREIGN KEY(env_id) REFERENCES env_sessions(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create env_facts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS day_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                text TEXT NOT NULL,
                salience REAL NOT NULL DEFAULT 0.6,
                batch_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create day_summaries table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_day_summaries_date ON day_summaries(date)")
            .execute(&self.pool)
            .await
            .context("Failed to create day_summaries date index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS long_days (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL UNIQUE,
                summary TEXT NOT NULL,
                key_events TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create long_days table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sleep_batches (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                from_ts INTEGER NOT NULL,
                to_ts INTEGER NOT NULL,
                processed_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create sleep_batches table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create notes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                due_at INTEGER NOT NULL,
                channel TEXT,
                created_at INTEGER NOT NULL,
                fired INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create reminders table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(due_at, fired)")
            .execute(&self.pool)
            .await
            .context("Failed to create reminders due index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS affect_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                levels_json TEXT NOT NULL,
                preset_json TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create affect_log table")?;

        Ok(())
    }
}

// =============================================================================
// Message log
// =============================================================================

impl SqliteStore {
    pub async fn insert_message(
        &self,
        user_id: &str,
        role: Role,
        text: &str,
        ts: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO messages (user_id, role, text, ts) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(text)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;
        Ok(result.last_insert_rowid())
    }

    /// Last `limit` messages for a user, oldest first.
    pub async fn recent_messages(&self, user_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, user_id, role, text, ts, approved FROM messages
             WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent messages")?;

        let mut messages: Vec<StoredMessage> =
            rows.iter().map(row_to_message).collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Last `limit` messages across all users, oldest first. Retrieval scans
    /// these when summaries come up empty.
    pub async fn latest_messages(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, user_id, role, text, ts, approved FROM messages
             ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch latest messages")?;

        let mut messages: Vec<StoredMessage> =
            rows.iter().map(row_to_message).collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Messages with `from_ts < ts <= to_ts`, for consolidation. Order is
    /// chronological with id as tiebreak.
    pub async fn messages_between(&self, from_ts: i64, to_ts: i64) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, user_id, role, text, ts, approved FROM messages
             WHERE ts > ? AND ts <= ? ORDER BY ts ASC, id ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch messages by range")?;
        rows.iter().map(row_to_message).collect()
    }

    /// Messages inside the UTC days `[date, date + span_days)`, for the
    /// search tool.
    pub async fn messages_on_date(&self, date: &str, span_days: i64) -> Result<Vec<StoredMessage>> {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?;
        let start = Utc
            .from_utc_datetime(&day.and_hms_opt(0, 0, 0).context("invalid midnight")?)
            .timestamp();
        let end = start + span_days.max(1) * 86_400;

        let rows = sqlx::query(
            "SELECT id, user_id, role, text, ts, approved FROM messages
             WHERE ts >= ? AND ts < ? ORDER BY ts ASC, id ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to search messages by date")?;
        rows.iter().map(row_to_message).collect()
    }

    pub async fn mark_approved(&self, msg_id: i64) -> Result<()> {
        sqlx::query("UPDATE messages SET approved = 1 WHERE id = ?")
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark message approved")?;
        Ok(())
    }

    /// Id of the user's most recent assistant message, if any. Feedback
    /// hotkeys target this.
    pub async fn last_assistant_message_id(&self, user_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM messages WHERE user_id = ? AND role = 'assistant'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch last assistant message")?;
        Ok(row.map(|r| r.get("id")))
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<StoredMessage> {
    let role_str: String = row.get("role");
    let role = match role_str.as_str() {
        "assistant" => Role::Assistant,
        _ => Role::User,
    };
    let approved: i64 = row.get("approved");
    Ok(StoredMessage {
        id: row.get("id"),
        user_id: row.get("user_id"),
        role,
        text: row.get("text"),
        ts: row.get("ts"),
        approved: approved != 0,
    })
}

// =============================================================================
// Reply metadata and feedback
// =============================================================================

impl SqliteStore {
    pub async fn insert_message_meta(
        &self,
        msg_id: i64,
        intent: &str,
        suggestion_kind: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO message_meta (msg_id, intent, suggestion_kind) VALUES (?, ?, ?)",
        )
        .bind(msg_id)
        .bind(intent)
        .bind(suggestion_kind)
        .execute(&self.pool)
        .await
        .context("Failed to insert message meta")?;
        Ok(())
    }

    pub async fn message_meta(&self, msg_id: i64) -> Result<Option<(String, String)>> {
        let row = sqlx::query("SELECT intent, suggestion_kind FROM message_meta WHERE msg_id = ?")
            .bind(msg_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch message meta")?;
        Ok(row.map(|r| (r.get("intent"), r.get("suggestion_kind"))))
    }

    pub async fn add_feedback(&self, msg_id: i64, kind: &str, text: Option<&str>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO feedback (msg_id, kind, text, ts) VALUES (?, ?, ?, ?)",
        )
        .bind(msg_id)
        .bind(kind)
        .bind(text)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert feedback")?;
        Ok(result.last_insert_rowid())
    }
}

// =============================================================================
// Bandit arms
// =============================================================================

impl SqliteStore {
    /// (wins, plays) for the arm, seeded with the 1/2 prior when unseen.
    pub async fn bandit_stats(&self, intent: &str, kind: &str) -> Result<(f64, f64)> {
        let row = sqlx::query("SELECT wins, plays FROM bandit_arms WHERE intent = ? AND kind = ?")
            .bind(intent)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch bandit arm")?;
        Ok(match row {
            Some(r) => (r.get("wins"), r.get("plays")),
            None => (1.0, 2.0),
        })
    }

    /// Record one pull. A previously unseen arm starts from the prior before
    /// the outcome is added, so counts stay comparable across arms.
    pub async fn record_bandit_outcome(&self, intent: &str, kind: &str, win: bool) -> Result<()> {
        let dw: f64 = if win { 1.0 } else { 0.0 };
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO bandit_arms (intent, kind, wins, plays, updated_at)
            VALUES (?, ?, 1.0 + ?, 3.0, ?)
            ON CONFLICT(intent, kind) DO UPDATE SET
                wins = bandit_arms.wins + ?,
                plays = bandit_arms.plays + 1.0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(intent)
        .bind(kind)
        .bind(dw)
        .bind(now)
        .bind(dw)
        .execute(&self.pool)
        .await
        .context("Failed to record bandit outcome")?;
        Ok(())
    }

    /// Multiply every arm's counters by `factor`. Returns the number of arms
    /// touched.
    pub async fn decay_bandit_arms(&self, factor: f64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE bandit_arms SET wins = wins * ?, plays = plays * ?, updated_at = ?",
        )
        .bind(factor)
        .bind(factor)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to decay bandit arms")?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Environment sessions and facts
// =============================================================================

impl SqliteStore {
    /// Upsert the session row for (channel, chat_id) and return its id.
    pub async fn upsert_env_session(
        &self,
        channel: &str,
        chat_id: &str,
        participants: &[String],
    ) -> Result<i64> {
        let participants_json =
            serde_json::to_string(participants).context("Failed to encode participants")?;
        sqlx::query(
            r#"
            INSERT INTO env_sessions (channel, chat_id, participants, last_seen)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(channel, chat_id) DO UPDATE SET
                participants = excluded.participants,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(channel)
        .bind(chat_id)
        .bind(&participants_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert env session")?;

        let row = sqlx::query("SELECT id FROM env_sessions WHERE channel = ? AND chat_id = ?")
            .bind(channel)
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to fetch env session id")?;
        Ok(row.get("id"))
    }

    pub async fn set_env_fact(
        &self,
        env_id: i64,
        key: &str,
        value: &str,
        importance: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO env_facts (env_id, key, value, importance, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(env_id, key) DO UPDATE SET
                value = excluded.value,
                importance = excluded.importance,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(env_id)
        .bind(key)
        .bind(value)
        .bind(importance)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to set env fact")?;
        Ok(())
    }

    /// Highest-importance facts for the session brief.
    pub async fn top_env_facts(&self, env_id: i64, limit: usize) -> Result<Vec<EnvFact>> {
        let rows = sqlx::query(
            "SELECT key, value, importance FROM env_facts
             WHERE env_id = ? ORDER BY importance DESC, updated_at DESC LIMIT ?",
        )
        .bind(env_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch env facts")?;
        Ok(rows
            .into_iter()
            .map(|r| EnvFact {
                key: r.get("key"),
                value: r.get("value"),
                importance: r.get("importance"),
            })
            .collect())
    }
}

// =============================================================================
// Tiered memory reads
// =============================================================================

impl SqliteStore {
    pub async fn recent_day_summaries(&self, limit: usize) -> Result<Vec<DaySummary>> {
        let rows = sqlx::query(
            "SELECT date, text, salience FROM day_summaries ORDER BY date DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch day summaries")?;
        Ok(rows
            .into_iter()
            .map(|r| DaySummary {
                date: r.get("date"),
                text: r.get("text"),
                salience: r.get("salience"),
            })
            .collect())
    }

    pub async fn recent_long_days(&self, limit: usize) -> Result<Vec<LongDay>> {
        let rows =
            sqlx::query("SELECT date, summary FROM long_days ORDER BY date DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch long days")?;
        Ok(rows
            .into_iter()
            .map(|r| LongDay {
                date: r.get("date"),
                summary: r.get("summary"),
            })
            .collect())
    }

    /// Watermark: upper bound of the last successful batch, or None if no
    /// batch ever succeeded.
    pub async fn last_ok_batch_to_ts(&self) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT to_ts FROM sleep_batches WHERE status = 'ok'
             ORDER BY to_ts DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch last batch watermark")?;
        Ok(row.map(|r| r.get("to_ts")))
    }

    pub async fn batch_records(&self) -> Result<Vec<BatchRecord>> {
        let rows = sqlx::query(
            "SELECT id, from_ts, to_ts, processed_count, status FROM sleep_batches
             ORDER BY started_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch batch records")?;
        Ok(rows
            .into_iter()
            .map(|r| BatchRecord {
                id: r.get("id"),
                from_ts: r.get("from_ts"),
                to_ts: r.get("to_ts"),
                processed_count: r.get("processed_count"),
                status: r.get("status"),
            })
            .collect())
    }
}

// =============================================================================
// Tool storage: notes and reminders
// =============================================================================

impl SqliteStore {
    pub async fn insert_note(&self, text: &str, tags: &[String]) -> Result<i64> {
        let tags_json = serde_json::to_string(tags).context("Failed to encode tags")?;
        let result = sqlx::query("INSERT INTO notes (text, tags, created_at) VALUES (?, ?, ?)")
            .bind(text)
            .bind(&tags_json)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .context("Failed to insert note")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_reminder(
        &self,
        title: &str,
        due_at: i64,
        channel: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO reminders (title, due_at, channel, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(due_at)
        .bind(channel)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert reminder")?;
        Ok(result.last_insert_rowid())
    }
}

// =============================================================================
// Affect log
// =============================================================================

impl SqliteStore {
    pub async fn insert_affect_log(
        &self,
        user_id: &str,
        levels_json: &str,
        preset_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO affect_log (user_id, levels_json, preset_json, ts) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(levels_json)
        .bind(preset_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert affect log")?;
        Ok(())
    }
}
