//! Memory retrieval for the executor prompt.
//!
//! The collaborator seam is a trait so tests can script results; the stock
//! implementation does plain keyword scoring over the store's summary tiers
//! and recent raw messages. Retrieval failures never surface to the turn,
//! the pipeline degrades to an empty set instead.

use anyhow::Result;
use aoede_memory::SqliteStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One recalled piece of context. Ids are prefixed by tier, `ds:` for day
/// summaries, `ld:` for long-term days, `msg:` for raw messages.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snippet {
    pub id: String,
    pub text: String,
    pub score: f64,
}

#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Best-scoring snippets for the query, highest first, at most `limit`.
    async fn retrieve(&self, query: &str, intent: &str, limit: usize) -> Result<Vec<Snippet>>;
}

/// How many rows each tier contributes to the candidate pool.
const CANDIDATES_PER_TIER: usize = 20;

pub struct StoreRetriever {
    store: Arc<SqliteStore>,
}

impl StoreRetriever {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Retriever for StoreRetriever {
    async fn retrieve(&self, query: &str, _intent: &str, limit: usize) -> Result<Vec<Snippet>> {
        let words = query_words(query);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<Snippet> = Vec::new();
        for summary in self.store.recent_day_summaries(CANDIDATES_PER_TIER).await? {
            candidates.push(Snippet {
                id: format!("ds:{}", summary.date),
                text: summary.text,
                score: 0.0,
            });
        }
        for day in self.store.recent_long_days(CANDIDATES_PER_TIER).await? {
            candidates.push(Snippet {
                id: format!("ld:{}", day.date),
                text: day.summary,
                score: 0.0,
            });
        }
        for message in self.store.latest_messages(CANDIDATES_PER_TIER).await? {
            candidates.push(Snippet {
                id: format!("msg:{}", message.id),
                text: message.text,
                score: 0.0,
            });
        }

        for snippet in &mut candidates {
            snippet.score = overlap_score(&words, &snippet.text);
        }
        candidates.retain(|s| s.score > 0.0);
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

/// Distinct lowercase query words of three letters or more. Short filler
/// words carry no signal for substring matching.
fn query_words(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect()
}

/// Fraction of query words that appear in the text, in [0, 1].
fn overlap_score(words: &[String], text: &str) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
    hits as f64 / words.len() as f64
}
