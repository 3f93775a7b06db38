//! ε-greedy selection over suggestion kinds.
//!
//! Arms are keyed `(intent, kind)` and persisted as REAL win/play counters
//! with a 1/2 Bayesian prior, so an unseen arm scores 0.5 before evidence
//! arrives. Scoring is factored into a pure function over pre-fetched stats;
//! with ε = 0 the whole selection is deterministic, which is what the tests
//! lean on.

use crate::store::SqliteStore;
use anyhow::Result;
use aoede_core::config::BanditConfig;
use aoede_core::SuggestionCandidate;
use rand::Rng;

#[derive(Clone)]
pub struct BanditSelector {
    store: SqliteStore,
    config: BanditConfig,
}

impl BanditSelector {
    pub fn new(store: SqliteStore, config: BanditConfig) -> Self {
        Self { store, config }
    }

    /// Pick one candidate for this intent, or None for an empty list.
    ///
    /// With probability ε the pick is uniformly random (exploration);
    /// otherwise it is the argmax of `win_rate × confidence`, ties broken
    /// by input order.
    pub async fn select(
        &self,
        intent: &str,
        candidates: &[SuggestionCandidate],
    ) -> Result<Option<SuggestionCandidate>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        if self.config.epsilon > 0.0 {
            let roll: f64 = {
                let mut rng = rand::rng();
                rng.random()
            };
            if roll < self.config.epsilon {
                let idx = {
                    let mut rng = rand::rng();
                    rng.random_range(0..candidates.len())
                };
                tracing::debug!(intent, idx, "bandit exploring");
                return Ok(Some(candidates[idx].clone()));
            }
        }

        let mut stats = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            stats.push(self.store.bandit_stats(intent, &candidate.kind).await?);
        }

        let idx = pick_best(candidates, &stats, self.config.default_confidence);
        tracing::debug!(intent, kind = %candidates[idx].kind, "bandit exploiting");
        Ok(Some(candidates[idx].clone()))
    }

    /// Fold one reward in: plays always grows by one, wins only on a
    /// positive reward.
    pub async fn record_outcome(&self, intent: &str, kind: &str, reward: i32) -> Result<()> {
        self.store
            .record_bandit_outcome(intent, kind, reward > 0)
            .await?;
        tracing::info!(intent, kind, reward, "bandit outcome recorded");
        Ok(())
    }

    /// Shrink all arms multiplicatively so stale evidence fades. Returns the
    /// arm count touched.
    pub async fn decay(&self) -> Result<u64> {
        let touched = self
            .store
            .decay_bandit_arms(self.config.decay_factor)
            .await?;
        tracing::info!(factor = self.config.decay_factor, touched, "bandit arms decayed");
        Ok(touched)
    }
}

/// Argmax of `rate × confidence` with first-wins tie-breaking. `stats[i]`
/// is the (wins, plays) pair for `candidates[i]`.
fn pick_best(
    candidates: &[SuggestionCandidate],
    stats: &[(f64, f64)],
    default_confidence: f64,
) -> usize {
    let mut best = 0;
    let mut best_score = f64::MIN;
    for (idx, (candidate, (wins, plays))) in candidates.iter().zip(stats).enumerate() {
        let rate = if *plays > 0.0 { wins / plays } else { 0.0 };
        let confidence = candidate.confidence.unwrap_or(default_confidence);
        let score = rate * confidence;
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}
