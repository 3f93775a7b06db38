//! Day summarization for the temp memory tier.
//!
//! The default is extractive and fully deterministic: pick the day's most
//! informative lines, keep them in chronological order, and cap the result
//! at roughly `max_tokens * 4` bytes. The trait seam is where a model-backed
//! summarizer plugs in without touching the consolidation engine.

use anyhow::Result;
use aoede_core::StoredMessage;
use async_trait::async_trait;

#[async_trait]
pub trait DaySummarizer: Send + Sync {
    async fn summarize(&self, date: &str, messages: &[StoredMessage]) -> Result<String>;
}

pub struct ExtractiveSummarizer {
    max_bytes: usize,
}

impl ExtractiveSummarizer {
    /// `max_tokens` uses the same ~4 bytes/token convention as the budget
    /// estimator.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_bytes: max_tokens.saturating_mul(4).max(64),
        }
    }

    fn extract(&self, date: &str, messages: &[StoredMessage]) -> String {
        let mut lines: Vec<(usize, String)> = Vec::new();
        let mut prev: Option<&str> = None;
        for (idx, msg) in messages.iter().enumerate() {
            let text = msg.text.trim();
            if text.len() < 4 {
                continue;
            }
            // Consecutive repeats carry no new information.
            if prev == Some(text) {
                continue;
            }
            prev = Some(text);
            lines.push((idx, format!("{}: {}", msg.role.as_str(), text)));
        }

        if lines.is_empty() {
            return format!("{}: (quiet day)", date);
        }

        let header = format!("{}: ", date);
        let budget = self.max_bytes.saturating_sub(header.len());

        // If everything fits, keep the full day. Otherwise keep the
        // highest-scoring lines and restore chronological order.
        let total: usize = lines.iter().map(|(_, l)| l.len() + 3).sum();
        let chosen: Vec<&(usize, String)> = if total <= budget {
            lines.iter().collect()
        } else {
            let mut ranked: Vec<&(usize, String)> = lines.iter().collect();
            ranked.sort_by(|a, b| score_line(&b.1).cmp(&score_line(&a.1)).then(a.0.cmp(&b.0)));
            let mut used = 0usize;
            let mut kept: Vec<&(usize, String)> = Vec::new();
            for entry in ranked {
                let cost = entry.1.len() + 3;
                if used + cost > budget {
                    continue;
                }
                used += cost;
                kept.push(entry);
            }
            kept.sort_by_key(|(idx, _)| *idx);
            kept
        };

        let body = chosen
            .iter()
            .map(|(_, l)| l.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        truncate_bytes(&format!("{}{}", header, body), self.max_bytes)
    }
}

#[async_trait]
impl DaySummarizer for ExtractiveSummarizer {
    async fn summarize(&self, date: &str, messages: &[StoredMessage]) -> Result<String> {
        Ok(self.extract(date, messages))
    }
}

/// Crude salience: longer lines, questions, and lines with numbers say more
/// about the day than short acknowledgements.
fn score_line(line: &str) -> usize {
    let mut score = line.len().min(240);
    if line.contains('?') {
        score += 40;
    }
    if line.chars().any(|c| c.is_ascii_digit()) {
        score += 20;
    }
    score
}

/// Byte-capped truncation that never splits a UTF-8 character.
pub(crate) fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = 0;
    for (idx, _) in text.char_indices() {
        if idx > max_bytes {
            break;
        }
        end = idx;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoede_core::Role;

    fn msg(id: i64, role: Role, text: &str) -> StoredMessage {
        StoredMessage {
            id,
            user_id: "u1".to_string(),
            role,
            text: text.to_string(),
            ts: 1_700_000_000 + id,
            approved: false,
        }
    }

    #[test]
    fn test_small_day_kept_whole() {
        let s = ExtractiveSummarizer::new(400);
        let out = s.extract(
            "2026-08-20",
            &[
                msg(1, Role::User, "planning the trip to Oslo"),
                msg(2, Role::Assistant, "flights are cheapest on Tuesday"),
            ],
        );
        assert!(out.starts_with("2026-08-20: "));
        assert!(out.contains("Oslo"));
        assert!(out.contains("Tuesday"));
    }

    #[test]
    fn test_cap_respected() {
        let s = ExtractiveSummarizer::new(50); // 200 bytes
        let long = "a detailed message about the quarterly report numbers 123456".repeat(4);
        let out = s.extract("2026-08-20", &[msg(1, Role::User, &long)]);
        assert!(out.len() <= 200, "len={}", out.len());
    }

    #[test]
    fn test_consecutive_duplicates_dropped() {
        let s = ExtractiveSummarizer::new(400);
        let out = s.extract(
            "2026-08-20",
            &[
                msg(1, Role::User, "ping ping ping"),
                msg(2, Role::User, "ping ping ping"),
                msg(3, Role::User, "something else entirely"),
            ],
        );
        assert_eq!(out.matches("ping ping ping").count(), 1);
    }

    #[test]
    fn test_empty_day_placeholder() {
        let s = ExtractiveSummarizer::new(400);
        let out = s.extract("2026-08-20", &[]);
        assert!(out.contains("quiet day"));
    }

    #[test]
    fn test_questions_survive_pressure() {
        let s = ExtractiveSummarizer::new(40); // tight: 160 bytes
        let mut messages: Vec<StoredMessage> = (0..20)
            .map(|i| msg(i, Role::User, "routine filler line with no news"))
            .collect();
        messages.push(msg(
            99,
            Role::User,
            "when does the lease actually expire?",
        ));
        let out = s.extract("2026-08-20", &messages);
        assert!(out.contains("lease"), "question line lost: {}", out);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "résumé résumé résumé";
        let out = truncate_bytes(text, 10);
        assert!(out.len() <= 10);
        assert!(text.starts_with(&out));
    }
}
