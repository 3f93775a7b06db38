//! Context budget allocator.
//!
//! Decides what actually goes into the executor prompt when everything
//! cannot fit: history first, then the environment brief, then retrieved
//! snippets into whatever is left. Purely arithmetic, no I/O.

use crate::retrieval::Snippet;
use crate::tokens;
use aoede_core::config::BudgetConfig;
use aoede_core::types::StoredMessage;
use serde_json::Value;

/// What survived packing, plus the estimated spend per section. The same
/// estimator is used here and in reporting, so the numbers line up.
#[derive(Debug, Clone, Default)]
pub struct BudgetPlan {
    /// Kept history, oldest first.
    pub history: Vec<StoredMessage>,
    pub retrieved: Vec<Snippet>,
    pub metadata: Option<Value>,
    pub history_tokens: u32,
    pub metadata_tokens: u32,
    pub retrieved_tokens: u32,
}

impl BudgetPlan {
    pub fn total_tokens(&self) -> u32 {
        self.history_tokens + self.metadata_tokens + self.retrieved_tokens
    }
}

/// Pack history, metadata, and retrieved snippets into `max_tokens`.
///
/// History gets a capped share of the usable budget but the newest
/// `min_history_messages` are kept even when they blow past the cap, so a
/// single long message cannot erase the conversation. Metadata is all or
/// nothing. Snippets fill the remainder in the order given and packing
/// stops at the first one that does not fit.
pub fn pack(
    history: &[StoredMessage],
    retrieved: &[Snippet],
    metadata: Option<&Value>,
    max_tokens: u32,
    config: &BudgetConfig,
) -> BudgetPlan {
    let usable = max_tokens.saturating_sub(config.headroom_tokens);
    let history_cap = ((usable as f32 * config.history_share) as u32)
        .max(config.history_floor_tokens)
        .min(config.history_ceiling_tokens);

    let mut kept: Vec<StoredMessage> = Vec::new();
    let mut history_tokens: u32 = 0;
    for message in history.iter().rev() {
        if kept.len() >= config.max_history_messages {
            break;
        }
        let cost = tokens::message_cost(&message.text);
        if kept.len() >= config.min_history_messages && history_tokens + cost > history_cap {
            break;
        }
        history_tokens += cost;
        kept.push(message.clone());
    }
    kept.reverse();

    let mut remaining = usable.saturating_sub(history_tokens);

    let mut metadata_tokens = 0;
    let packed_metadata = metadata
        .filter(|value| !value.is_null())
        .and_then(|value| serde_json::to_string(value).ok().map(|s| (value, s)))
        .and_then(|(value, serialized)| {
            let cost = tokens::message_cost(&serialized);
            if cost <= remaining {
                metadata_tokens = cost;
                remaining -= cost;
                Some(value.clone())
            } else {
                None
            }
        });

    let mut packed_snippets: Vec<Snippet> = Vec::new();
    let mut retrieved_tokens = 0;
    for snippet in retrieved {
        let cost = tokens::message_cost(&snippet.text);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        retrieved_tokens += cost;
        packed_snippets.push(snippet.clone());
    }

    BudgetPlan {
        history: kept,
        retrieved: packed_snippets,
        metadata: packed_metadata,
        history_tokens,
        metadata_tokens,
        retrieved_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoede_core::types::Role;
    use serde_json::json;

    fn msg(id: i64, text: &str) -> StoredMessage {
        StoredMessage {
            id,
            user_id: "u1".to_string(),
            role: Role::User,
            text: text.to_string(),
            ts: 1_700_000_000 + id,
            approved: false,
        }
    }

    fn snip(id: &str, text: &str) -> Snippet {
        Snippet {
            id: id.to_string(),
            text: text.to_string(),
            score: 1.0,
        }
    }

    #[test]
    fn test_empty_inputs_pack_to_empty_plan() {
        let plan = pack(&[], &[], None, 2048, &BudgetConfig::default());
        assert!(plan.history.is_empty());
        assert!(plan.retrieved.is_empty());
        assert!(plan.metadata.is_none());
        assert_eq!(plan.total_tokens(), 0);
    }

    #[test]
    fn test_minimum_history_survives_oversized_messages() {
        // Each message costs ~500 tokens against a tiny budget; the newest
        // ten must still be kept.
        let config = BudgetConfig {
            min_history_messages: 10,
            ..Default::default()
        };
        let history: Vec<StoredMessage> =
            (0..20).map(|i| msg(i, &"x".repeat(2000))).collect();
        let plan = pack(&history, &[], None, 300, &config);
        assert_eq!(plan.history.len(), 10);
        // The kept tail is the newest ten, oldest first.
        assert_eq!(plan.history.first().map(|m| m.id), Some(10));
        assert_eq!(plan.history.last().map(|m| m.id), Some(19));
    }

    #[test]
    fn test_history_cap_stops_the_walk() {
        // usable = 1000 - 128 = 872, cap = 523. Messages cost 104 tokens
        // each (400 bytes + envelope), so five fit and the sixth would
        // cross the cap.
        let history: Vec<StoredMessage> =
            (0..12).map(|i| msg(i, &"y".repeat(400))).collect();
        let plan = pack(&history, &[], None, 1000, &BudgetConfig::default());
        assert_eq!(plan.history.len(), 5);
        assert_eq!(plan.history_tokens, 5 * 104);
        assert!(plan.history_tokens <= 523);
    }

    #[test]
    fn test_max_history_messages_is_a_hard_ceiling() {
        let history: Vec<StoredMessage> = (0..60).map(|i| msg(i, "hi")).collect();
        let plan = pack(&history, &[], None, 100_000, &BudgetConfig::default());
        assert_eq!(plan.history.len(), 40);
        assert_eq!(plan.history.first().map(|m| m.id), Some(20));
    }

    #[test]
    fn test_history_returned_oldest_to_newest() {
        let history: Vec<StoredMessage> = (0..6).map(|i| msg(i, "short")).collect();
        let plan = pack(&history, &[], None, 4096, &BudgetConfig::default());
        let ids: Vec<i64> = plan.history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_metadata_included_whole_when_it_fits() {
        let meta = json!({"channel": "cli", "facts": ["likes tea"]});
        let plan = pack(&[], &[], Some(&meta), 2048, &BudgetConfig::default());
        assert_eq!(plan.metadata, Some(meta));
        assert!(plan.metadata_tokens > 0);
    }

    #[test]
    fn test_metadata_dropped_whole_when_it_does_not_fit() {
        let meta = json!({"blob": "z".repeat(40_000)});
        let plan = pack(&[], &[], Some(&meta), 512, &BudgetConfig::default());
        assert!(plan.metadata.is_none());
        assert_eq!(plan.metadata_tokens, 0);
    }

    #[test]
    fn test_null_metadata_treated_as_absent() {
        let plan = pack(&[], &[], Some(&Value::Null), 2048, &BudgetConfig::default());
        assert!(plan.metadata.is_none());
    }

    #[test]
    fn test_snippets_stop_at_first_misfit_without_backfill() {
        // usable = 512 - 128 = 384. First snippet fits, the second is too
        // big, and the third is never considered even though it would fit.
        let snippets = vec![
            snip("a", &"a".repeat(400)),
            snip("b", &"b".repeat(4000)),
            snip("c", "tiny"),
        ];
        let plan = pack(&[], &snippets, None, 512, &BudgetConfig::default());
        let ids: Vec<&str> = plan.retrieved.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_budget_below_headroom_clamps_cap_to_floor() {
        // usable is zero, so the cap falls back to the 96-token floor.
        // Messages cost 29 tokens each; the guaranteed four already exceed
        // the floor, so the fifth is cut.
        let history: Vec<StoredMessage> =
            (0..8).map(|i| msg(i, &"h".repeat(100))).collect();
        let plan = pack(&history, &[], None, 64, &BudgetConfig::default());
        assert_eq!(plan.history.len(), 4);
        assert!(plan.history_tokens > 96);
    }

    #[test]
    fn test_accounting_matches_estimator() {
        let history: Vec<StoredMessage> = (0..5).map(|i| msg(i, "some words here")).collect();
        let plan = pack(&history, &[], None, 4096, &BudgetConfig::default());
        let expected: u32 = plan
            .history
            .iter()
            .map(|m| tokens::message_cost(&m.text))
            .sum();
        assert_eq!(plan.history_tokens, expected);
    }
}
