//! Environment brief, the situational preamble both models receive.
//!
//! One session row per `(channel, chat_id)` pair plus the top facts by
//! importance. Kept to five facts so the dispatcher prompt stays small.

use anyhow::Result;
use aoede_core::types::Turn;
use aoede_memory::SqliteStore;
use serde_json::{json, Value};

const BRIEF_FACT_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct EnvBrief {
    pub env_id: i64,
    pub channel: String,
    pub chat_id: String,
    /// `(key, value)` pairs, highest importance first.
    pub facts: Vec<(String, String)>,
}

impl EnvBrief {
    /// Upsert the session for this turn and collect its top facts.
    pub async fn build(store: &SqliteStore, turn: &Turn) -> Result<EnvBrief> {
        let participants = if turn.participants.is_empty() {
            vec![turn.user_id.clone()]
        } else {
            turn.participants.clone()
        };
        let env_id = store
            .upsert_env_session(&turn.channel, &turn.chat_id, &participants)
            .await?;
        let facts = store
            .top_env_facts(env_id, BRIEF_FACT_LIMIT)
            .await?
            .into_iter()
            .map(|f| (f.key, f.value))
            .collect();
        Ok(EnvBrief {
            env_id,
            channel: turn.channel.clone(),
            chat_id: turn.chat_id.clone(),
            facts,
        })
    }

    /// Compact single-block rendering for the dispatcher prompt.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("channel {}, chat {}", self.channel, self.chat_id)];
        for (key, value) in &self.facts {
            lines.push(format!("- {}: {}", key, value));
        }
        lines.join("\n")
    }

    /// JSON form handed to the budget allocator as the metadata unit.
    pub fn to_metadata(&self) -> Value {
        json!({
            "channel": self.channel,
            "chat_id": self.chat_id,
            "facts": self.facts.iter().map(|(k, v)| json!({"key": k, "value": v})).collect::<Vec<_>>(),
        })
    }
}
