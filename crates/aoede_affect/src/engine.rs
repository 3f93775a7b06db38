//! Process-wide owner of the affect state.
//!
//! One engine per process, shared by `Arc` clone. All turns funnel through
//! the same cell, so concurrent turns race on it last-writer-wins; per-user
//! isolation is a deployment topology question, not solved here.

use crate::state::AffectState;
use crate::style::{derive_style, StylePreset};
use aoede_core::AffectUpdate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AffectEngine {
    state: Arc<RwLock<AffectState>>,
}

impl Default for AffectEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AffectEngine {
    pub fn new() -> Self {
        Self::with_state(AffectState::baseline())
    }

    pub fn with_state(state: AffectState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn snapshot(&self) -> AffectState {
        self.state.read().await.clone()
    }

    /// Levels keyed by channel name, the shape prompts and logs want.
    pub async fn levels(&self) -> BTreeMap<&'static str, i64> {
        self.state.read().await.snapshot()
    }

    /// Apply a dispatcher-proposed update (absolute levels) and return the
    /// preset derived from the resulting state.
    pub async fn apply_update(&self, update: &AffectUpdate) -> StylePreset {
        let mut state = self.state.write().await;
        if !update.levels.is_empty() {
            state.set_levels(&update.levels);
            tracing::debug!(levels = ?state.snapshot(), "affect levels updated");
        }
        derive_style(&state)
    }

    pub async fn apply_delta(&self, deltas: &BTreeMap<String, i64>) {
        let mut state = self.state.write().await;
        state.apply_delta(deltas);
    }

    /// One decay step toward baseline, for idle ticks.
    pub async fn decay(&self, rate: f64) {
        let mut state = self.state.write().await;
        state.decay_step(rate);
        tracing::debug!(rate, "affect decay step");
    }

    /// Full reset, run after sleep consolidation.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.reset_to_baseline();
        tracing::info!("affect state reset to baseline");
    }

    pub async fn current_style(&self) -> StylePreset {
        derive_style(&*self.state.read().await)
    }
}
