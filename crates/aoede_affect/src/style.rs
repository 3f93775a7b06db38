//! The affect-to-style derivation.
//!
//! Instead of telling the executor "you are irritable", the levels are folded
//! into sampling parameters and prompt-weighting scalars so the register
//! emerges from the constraints themselves. The derivation is pure and
//! clamped at every output, which is what makes it testable.

use crate::state::{AffectState, Channel};
use serde::{Deserialize, Serialize};

/// Concrete generation knobs for one reply. Recomputed from the affect state
/// every turn, never stored as the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylePreset {
    /// Sampling temperature in [0.10, 1.20].
    pub temperature: f64,
    /// Output allowance in [128, 1024] tokens; also the budget fed to the
    /// context allocator.
    pub max_output_tokens: u32,
    /// Preference for lists and headings over prose, [0, 1].
    pub structure_bias: f64,
    /// Inclination to ask a clarifying question first, [0, 1].
    pub ask_clarify_bias: f64,
    pub humor_bias: f64,
    pub politeness: f64,
    pub energy: f64,
    pub assertiveness: f64,
    /// Inclination toward "we" phrasing, [0, 1].
    pub we_pronouns: f64,
    /// Eagerness to propose durable memory writes, [0, 1].
    pub memory_write_bias: f64,
}

impl Default for StylePreset {
    fn default() -> Self {
        derive_style(&AffectState::baseline())
    }
}

/// Map the current levels to a [`StylePreset`]. Deterministic, total, and
/// monotone per channel: raising a channel never moves an output against the
/// sign of its weight below.
pub fn derive_style(state: &AffectState) -> StylePreset {
    let r = |ch: Channel| state.ratio(ch);

    // === temperature: drive + urgency, damped by inhibition ===
    // Range 0.10 (flat, deliberate) to 1.20 (loose, exploratory).
    let temperature = (0.30 + 0.55 * r(Channel::Dopamine) + 0.20 * r(Channel::Norepinephrine)
        - 0.15 * r(Channel::Gaba))
    .clamp(0.10, 1.20);

    // === max_output_tokens: focus + throughput, cut by fatigue ===
    // Range 128 (curt) to 1024 (expansive).
    let max_output_tokens = (192.0 + 640.0 * r(Channel::Acetylcholine)
        + 320.0 * r(Channel::Glutamate)
        - 256.0 * r(Channel::Histamine))
    .round()
    .clamp(128.0, 1024.0) as u32;

    // === prompt-weighting scalars, each clamped to [0, 1] ===
    let structure_bias = unit(
        0.10 + 0.50 * r(Channel::Acetylcholine) + 0.30 * r(Channel::Gaba)
            - 0.20 * r(Channel::Dopamine),
    );
    let ask_clarify_bias = unit(
        0.05 + 0.45 * r(Channel::Norepinephrine) + 0.25 * r(Channel::Acetylcholine)
            - 0.20 * r(Channel::Dopamine),
    );
    let humor_bias = unit(
        0.50 * r(Channel::Dopamine) + 0.40 * r(Channel::Endorphins)
            - 0.30 * r(Channel::Histamine),
    );
    let politeness = unit(
        0.20 + 0.40 * r(Channel::Serotonin) + 0.30 * r(Channel::Oxytocin)
            - 0.25 * r(Channel::Histamine),
    );
    let energy = unit(
        0.35 * r(Channel::Dopamine) + 0.35 * r(Channel::Norepinephrine)
            + 0.20 * r(Channel::Glutamate)
            - 0.20 * r(Channel::Gaba),
    );
    let assertiveness = unit(
        0.10 + 0.45 * r(Channel::Vasopressin) + 0.30 * r(Channel::Norepinephrine)
            - 0.20 * r(Channel::Gaba),
    );
    let we_pronouns = unit(
        0.60 * r(Channel::Oxytocin) + 0.20 * r(Channel::Serotonin)
            - 0.15 * r(Channel::Vasopressin),
    );
    let memory_write_bias =
        unit(0.10 + 0.45 * r(Channel::Acetylcholine) + 0.30 * r(Channel::Oxytocin));

    StylePreset {
        temperature,
        max_output_tokens,
        structure_bias,
        ask_clarify_bias,
        humor_bias,
        politeness,
        energy,
        assertiveness,
        we_pronouns,
        memory_write_bias,
    }
}

fn unit(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
