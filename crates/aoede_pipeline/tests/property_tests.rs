//! Property-based tests for the pure pipeline pieces: the budget allocator,
//! the output filter, the schema recovery, and the token estimator.

use aoede_core::config::BudgetConfig;
use aoede_core::types::{Role, StoredMessage};
use aoede_pipeline::budget;
use aoede_pipeline::schema;
use aoede_pipeline::tokens::{estimate_tokens, message_cost};
use aoede_pipeline::{OutputFilter, Snippet};
use proptest::prelude::*;

fn messages(texts: Vec<String>) -> Vec<StoredMessage> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| StoredMessage {
            id: i as i64 + 1,
            user_id: "u1".to_string(),
            role: if i % 2 == 0 { Role::User } else { Role::Assistant },
            text,
            ts: 1_700_000_000 + i as i64,
            approved: false,
        })
        .collect()
}

fn snippets(texts: Vec<String>) -> Vec<Snippet> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Snippet {
            id: format!("s{}", i),
            text,
            score: 1.0,
        })
        .collect()
}

// ============================================================================
// Budget allocator properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The newest `min_history_messages` always survive, no matter how
    /// small the budget or how large the messages.
    #[test]
    fn budget_keeps_minimum_history(
        texts in prop::collection::vec("\\PC{0,200}", 0..30),
        max_tokens in 0u32..4096,
    ) {
        let config = BudgetConfig::default();
        let history = messages(texts);
        let plan = budget::pack(&history, &[], None, max_tokens, &config);
        let guaranteed = history.len().min(config.min_history_messages);
        prop_assert!(
            plan.history.len() >= guaranteed,
            "kept {} of {}, guaranteed {}",
            plan.history.len(), history.len(), guaranteed
        );
    }

    /// Beyond the guaranteed minimum, the history spend never exceeds the
    /// configured cap.
    #[test]
    fn budget_respects_history_cap(
        texts in prop::collection::vec("\\PC{0,200}", 0..30),
        max_tokens in 0u32..4096,
    ) {
        let config = BudgetConfig::default();
        let history = messages(texts);
        let plan = budget::pack(&history, &[], None, max_tokens, &config);
        if plan.history.len() > config.min_history_messages {
            let usable = max_tokens.saturating_sub(config.headroom_tokens);
            let cap = ((usable as f32 * config.history_share) as u32)
                .max(config.history_floor_tokens)
                .min(config.history_ceiling_tokens);
            prop_assert!(
                plan.history_tokens <= cap,
                "history spend {} above cap {}",
                plan.history_tokens, cap
            );
        }
    }

    /// Metadata and snippets only ever spend what history left over.
    #[test]
    fn budget_sections_fit_the_leftover(
        texts in prop::collection::vec("\\PC{0,200}", 0..20),
        snippet_texts in prop::collection::vec("\\PC{0,200}", 0..10),
        max_tokens in 0u32..4096,
    ) {
        let config = BudgetConfig::default();
        let history = messages(texts);
        let retrieved = snippets(snippet_texts);
        let metadata = serde_json::json!({"channel": "cli", "chat_id": "u1"});
        let plan = budget::pack(&history, &retrieved, Some(&metadata), max_tokens, &config);
        let usable = max_tokens.saturating_sub(config.headroom_tokens);
        prop_assert!(
            plan.metadata_tokens + plan.retrieved_tokens
                <= usable.saturating_sub(plan.history_tokens)
        );
    }

    /// Kept history is exactly the newest tail of the input, order intact.
    #[test]
    fn budget_history_is_a_suffix(
        texts in prop::collection::vec("\\PC{0,120}", 0..30),
        max_tokens in 0u32..4096,
    ) {
        let history = messages(texts);
        let plan = budget::pack(&history, &[], None, max_tokens, &BudgetConfig::default());
        let n = plan.history.len();
        let tail = &history[history.len() - n..];
        let kept_ids: Vec<i64> = plan.history.iter().map(|m| m.id).collect();
        let tail_ids: Vec<i64> = tail.iter().map(|m| m.id).collect();
        prop_assert_eq!(kept_ids, tail_ids);
    }

    /// Packed snippets are a prefix of the input ordering; packing never
    /// reorders or backfills.
    #[test]
    fn budget_snippets_are_a_prefix(
        snippet_texts in prop::collection::vec("\\PC{0,200}", 0..10),
        max_tokens in 0u32..4096,
    ) {
        let retrieved = snippets(snippet_texts);
        let plan = budget::pack(&[], &retrieved, None, max_tokens, &BudgetConfig::default());
        let n = plan.retrieved.len();
        prop_assert!(n <= retrieved.len());
        for (kept, original) in plan.retrieved.iter().zip(&retrieved[..n]) {
            prop_assert_eq!(&kept.id, &original.id);
        }
    }
}

// ============================================================================
// Output filter properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// **Idempotency**: filtering a filtered reply changes nothing and
    /// reports zero hits.
    #[test]
    fn filter_idempotent(s in "\\PC{0,400}") {
        let filter = OutputFilter::default();
        let (once, _) = filter.apply(&s);
        let (twice, second_hits) = filter.apply(&once);
        prop_assert_eq!(&once, &twice,
            "Not idempotent!\nInput:  {:?}\nOnce:   {:?}\nTwice:  {:?}", s, once, twice);
        prop_assert_eq!(second_hits.profanity, 0);
    }

    /// Never panics on arbitrary Unicode input.
    #[test]
    fn filter_never_panics(s in "\\PC{0,1000}") {
        let _ = OutputFilter::default().apply(&s);
    }

    /// No email address survives filtering.
    #[test]
    fn filter_removes_emails(
        local in "[a-z0-9]{1,10}",
        domain in "[a-z]{1,10}",
        s in "\\PC{0,80}",
    ) {
        let text = format!("{} {}@{}.com", s, local, domain);
        let needle = format!("{}@{}.com", local, domain);
        let (out, hits) = OutputFilter::default().apply(&text);
        prop_assert!(!out.contains(&needle), "email survived in {:?}", out);
        prop_assert!(hits.pii >= 1);
    }
}

// ============================================================================
// Schema recovery properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Parsing arbitrary model output never panics, it only errs.
    #[test]
    fn schema_parse_never_panics(s in "\\PC{0,500}") {
        let _ = schema::parse_decision(&s);
        let _ = schema::parse_draft(&s);
    }

    /// A decision embedded in arbitrary prose is still recovered.
    #[test]
    fn schema_recovers_embedded_decision(
        prefix in "[^{}`]{0,40}",
        suffix in "[^{}`]{0,40}",
    ) {
        let text = format!("{}{{\"intent\": \"chat\"}}{}", prefix, suffix);
        let decision = schema::parse_decision(&text);
        prop_assert!(decision.is_ok(), "failed on {:?}", text);
        prop_assert_eq!(decision.unwrap().intent, "chat");
    }
}

// ============================================================================
// Token estimator properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Longer text never costs fewer tokens.
    #[test]
    fn tokens_monotonic(s in "\\PC{0,300}", t in "\\PC{0,100}") {
        let combined = format!("{}{}", s, t);
        prop_assert!(estimate_tokens(&combined) >= estimate_tokens(&s));
        prop_assert!(message_cost(&combined) >= message_cost(&s));
    }

    /// The estimate stays within one unit of len/4.
    #[test]
    fn tokens_tracks_byte_length(s in "\\PC{0,300}") {
        let estimate = estimate_tokens(&s);
        let bytes = s.len() as u32;
        prop_assert!(estimate >= bytes / 4);
        prop_assert!(estimate <= bytes / 4 + 1);
    }
}
