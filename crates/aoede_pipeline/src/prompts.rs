//! Prompt assembly for the dispatcher, executor, and refinement calls.
//!
//! All builders return plain strings with `== SECTION ==` markers; the
//! models in question are small and local, so prompts stay terse and every
//! structured reply is demanded as bare JSON.

use crate::budget::BudgetPlan;
use aoede_affect::StylePreset;
use aoede_core::types::{StoredMessage, SuggestionCandidate};
use std::collections::BTreeMap;

pub const DISPATCHER_SYSTEM: &str = r#"You are the routing stage of a personal assistant. Read the context and the user's message, then reply with ONE JSON object and nothing else:
{
  "intent": "chat" | "task" | "recall" | "status" | short free-form label,
  "tools_hint": [tool names the reply stage may need],
  "tools_request": [{"name": "...", "args": {...}} calls that should run regardless],
  "rag_query": "search phrase for memory retrieval, or null to use the message as-is",
  "style_directive": "one short sentence of tone guidance, or null",
  "affect_update": {"levels": {"dopamine": 0-11, ...}} with only the channels that should change,
  "suggestions": [{"kind": "label", "text": "a possible angle for the reply", "confidence": 0.0-1.0}] (at most 3)
}
"intent" is required. Leave out what you are unsure about. Do not wrap the JSON in prose or code fences."#;

pub const EXECUTOR_SYSTEM: &str = r#"You are Aoede, a personal companion with long-term memory. Write the actual reply to the user. Respond with ONE JSON object and nothing else:
{
  "text": "your reply to the user",
  "tool_calls": [{"name": "...", "args": {...}}] for actions you need performed,
  "memory": [{"kind": "fact" | "note", "key": "stable.key or null", "text": "...", "importance": 0.0-1.0}] for things worth remembering,
  "plan": ["short step", ...] if the task spans future turns
}
"text" is required; the other fields may be empty. Do not wrap the JSON in prose or code fences."#;

pub const REFINE_SYSTEM: &str = r#"You are Aoede. You already drafted a reply, then your tools ran. Rewrite the reply so it reflects the actual tool outcomes, keeping the same tone and length. Respond with ONE JSON object: {"text": "..."}. No prose, no code fences."#;

/// Appended after a malformed model reply; the raw output is quoted so the
/// model can see what it got wrong.
pub fn repair_prompt(original_prompt: &str, raw_output: &str, problem: &str) -> String {
    format!(
        "{}\n\n== FORMAT ERROR ==\nYour previous reply could not be used: {}.\nIt was:\n{}\n\nAnswer again with only the JSON object.",
        original_prompt, problem, raw_output
    )
}

pub fn format_history(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_levels(levels: &BTreeMap<&'static str, i64>) -> String {
    levels
        .iter()
        .map(|(name, level)| format!("{} {}", name, level))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_catalog(catalog: &[(String, String)]) -> String {
    if catalog.is_empty() {
        return "(none)".to_string();
    }
    catalog
        .iter()
        .map(|(name, purpose)| format!("- {}: {}", name, purpose))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_dispatch_prompt(
    window: &[StoredMessage],
    user_text: &str,
    levels: &BTreeMap<&'static str, i64>,
    brief: &str,
    catalog: &[(String, String)],
) -> String {
    format!(
        "== ENVIRONMENT ==\n{}\n\n== AFFECT LEVELS ==\n{}\n\n== CAPABILITIES ==\n{}\n\n== RECENT HISTORY ==\n{}\n\n== MESSAGE ==\n{}",
        brief,
        format_levels(levels),
        format_catalog(catalog),
        format_history(window),
        user_text
    )
}

/// Fold the numeric preset into guidance the executor can act on. The
/// directive, when the dispatcher provided one, comes first.
pub fn render_style(preset: &StylePreset, directive: Option<&str>) -> String {
    let mut lines = Vec::new();
    if let Some(directive) = directive {
        lines.push(format!("Tone directive: {}", directive));
    }
    lines.push(format!(
        "Style dials (0 low, 1 high): structure {:.2}, clarifying questions {:.2}, humor {:.2}, politeness {:.2}, energy {:.2}, assertiveness {:.2}, \"we\" phrasing {:.2}, memory writes {:.2}",
        preset.structure_bias,
        preset.ask_clarify_bias,
        preset.humor_bias,
        preset.politeness,
        preset.energy,
        preset.assertiveness,
        preset.we_pronouns,
        preset.memory_write_bias
    ));
    lines.push(format!(
        "Keep the reply under roughly {} tokens.",
        preset.max_output_tokens
    ));
    lines.join("\n")
}

pub fn build_executor_prompt(
    plan: &BudgetPlan,
    user_text: &str,
    style: &str,
    suggestion: Option<&SuggestionCandidate>,
    tool_instructions: &str,
) -> String {
    let mut sections = Vec::new();

    if let Some(metadata) = &plan.metadata {
        sections.push(format!("== ENVIRONMENT ==\n{}", metadata));
    }
    if !plan.retrieved.is_empty() {
        let recalled = plan
            .retrieved
            .iter()
            .map(|s| format!("[{}] {}", s.id, s.text))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("== RECALLED ==\n{}", recalled));
    }
    if !tool_instructions.is_empty() {
        sections.push(format!("== TOOLS AVAILABLE ==\n{}", tool_instructions));
    }
    sections.push(format!("== STYLE ==\n{}", style));
    if let Some(suggestion) = suggestion {
        sections.push(format!(
            "== SUGGESTED ANGLE ==\n({}) {}",
            suggestion.kind, suggestion.text
        ));
    }
    if !plan.history.is_empty() {
        sections.push(format!(
            "== CONVERSATION ==\n{}",
            format_history(&plan.history)
        ));
    }
    sections.push(format!("== MESSAGE ==\n{}", user_text));

    sections.join("\n\n")
}

/// Prompt for the post-tool rewrite. Outcomes arrive pre-serialized as one
/// JSON array string.
pub fn build_refine_prompt(draft_text: &str, outcomes_json: &str, user_text: &str) -> String {
    format!(
        "== USER MESSAGE ==\n{}\n\n== YOUR DRAFT ==\n{}\n\n== TOOL OUTCOMES ==\n{}",
        user_text, draft_text, outcomes_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoede_core::types::Role;

    fn msg(role: Role, text: &str) -> StoredMessage {
        StoredMessage {
            id: 1,
            user_id: "u1".to_string(),
            role,
            text: text.to_string(),
            ts: 0,
            approved: false,
        }
    }

    #[test]
    fn test_dispatch_prompt_carries_all_sections() {
        let window = vec![
            msg(Role::User, "hey"),
            msg(Role::Assistant, "hello! how was the trip?"),
        ];
        let mut levels = BTreeMap::new();
        levels.insert("dopamine", 7i64);
        let catalog = vec![(
            "note.create".to_string(),
            "jot down a short note".to_string(),
        )];
        let prompt = build_dispatch_prompt(
            &window,
            "remind me about the dentist",
            &levels,
            "channel cli, chat u1",
            &catalog,
        );
        assert!(prompt.contains("== ENVIRONMENT =="));
        assert!(prompt.contains("dopamine 7"));
        assert!(prompt.contains("- note.create: jot down a short note"));
        assert!(prompt.contains("user: hey"));
        assert!(prompt.contains("assistant: hello! how was the trip?"));
        assert!(prompt.ends_with("remind me about the dentist"));
    }

    #[test]
    fn test_empty_catalog_renders_placeholder() {
        let prompt = build_dispatch_prompt(&[], "hi", &BTreeMap::new(), "", &[]);
        assert!(prompt.contains("== CAPABILITIES ==\n(none)"));
    }

    #[test]
    fn test_executor_prompt_skips_empty_sections() {
        let plan = BudgetPlan::default();
        let style = render_style(&StylePreset::default(), None);
        let prompt = build_executor_prompt(&plan, "hello", &style, None, "");
        assert!(!prompt.contains("== RECALLED =="));
        assert!(!prompt.contains("== TOOLS AVAILABLE =="));
        assert!(!prompt.contains("== SUGGESTED ANGLE =="));
        assert!(prompt.contains("== STYLE =="));
        assert!(prompt.ends_with("== MESSAGE ==\nhello"));
    }

    #[test]
    fn test_executor_prompt_includes_suggestion() {
        let plan = BudgetPlan::default();
        let suggestion = SuggestionCandidate {
            kind: "mischief".to_string(),
            text: "tease them about the playlist".to_string(),
            confidence: Some(0.8),
        };
        let prompt = build_executor_prompt(&plan, "hi", "style", Some(&suggestion), "");
        assert!(prompt.contains("(mischief) tease them about the playlist"));
    }

    #[test]
    fn test_repair_prompt_quotes_raw_output() {
        let repaired = repair_prompt("original", "not json at all", "no JSON object found");
        assert!(repaired.starts_with("original"));
        assert!(repaired.contains("not json at all"));
        assert!(repaired.contains("no JSON object found"));
    }

    #[test]
    fn test_render_style_mentions_output_allowance() {
        let preset = StylePreset::default();
        let style = render_style(&preset, Some("keep it playful"));
        assert!(style.contains("keep it playful"));
        assert!(style.contains(&preset.max_output_tokens.to_string()));
    }
}
