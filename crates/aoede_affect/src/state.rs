//! Channel definitions and the bounded affect state.
//!
//! Levels are plain integers in `[LEVEL_MIN, LEVEL_MAX]`. Integer levels keep
//! the state trivially serializable, diffable in logs, and immune to NaN
//! drift; the continuous math happens only inside the style derivation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LEVEL_MIN: i64 = 0;
pub const LEVEL_MAX: i64 = 11;

/// The ten affect channels. Names follow the neuromodulators whose folk
/// roles they mimic; nothing downstream depends on the biology being right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Drive, play, reward seeking.
    Dopamine,
    /// Contentment, patience.
    Serotonin,
    /// Vigilance, urgency.
    Norepinephrine,
    /// Focus, precision.
    Acetylcholine,
    /// Inhibition, calm.
    Gaba,
    /// Throughput, verbosity.
    Glutamate,
    /// Comfort, playfulness.
    Endorphins,
    /// Bonding, warmth.
    Oxytocin,
    /// Territoriality, assertion.
    Vasopressin,
    /// Irritation, fatigue.
    Histamine,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::Dopamine,
        Channel::Serotonin,
        Channel::Norepinephrine,
        Channel::Acetylcholine,
        Channel::Gaba,
        Channel::Glutamate,
        Channel::Endorphins,
        Channel::Oxytocin,
        Channel::Vasopressin,
        Channel::Histamine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Dopamine => "dopamine",
            Channel::Serotonin => "serotonin",
            Channel::Norepinephrine => "norepinephrine",
            Channel::Acetylcholine => "acetylcholine",
            Channel::Gaba => "gaba",
            Channel::Glutamate => "glutamate",
            Channel::Endorphins => "endorphins",
            Channel::Oxytocin => "oxytocin",
            Channel::Vasopressin => "vasopressin",
            Channel::Histamine => "histamine",
        }
    }

    /// Parse a wire-format channel name. Returns `None` for anything
    /// unrecognized; callers drop such keys silently.
    pub fn parse(name: &str) -> Option<Channel> {
        Channel::ALL.iter().copied().find(|c| c.as_str() == name)
    }

    /// Resting level the state decays back to.
    pub fn baseline(&self) -> i64 {
        match self {
            Channel::Dopamine => 6,
            Channel::Serotonin => 6,
            Channel::Norepinephrine => 4,
            Channel::Acetylcholine => 5,
            Channel::Gaba => 5,
            Channel::Glutamate => 5,
            Channel::Endorphins => 4,
            Channel::Oxytocin => 5,
            Channel::Vasopressin => 4,
            Channel::Histamine => 3,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Current levels for all channels. Construction and every mutator keep the
/// clamp invariant, so a level outside the bound is unrepresentable via the
/// public surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectState {
    levels: [i64; 10],
}

impl Default for AffectState {
    fn default() -> Self {
        Self::baseline()
    }
}

impl AffectState {
    /// State with every channel at its resting level.
    pub fn baseline() -> Self {
        let mut levels = [0; 10];
        for ch in Channel::ALL {
            levels[ch.index()] = ch.baseline();
        }
        Self { levels }
    }

    pub fn level(&self, channel: Channel) -> i64 {
        self.levels[channel.index()]
    }

    /// Level as a fraction of the full range, for the style math.
    pub fn ratio(&self, channel: Channel) -> f64 {
        self.level(channel) as f64 / LEVEL_MAX as f64
    }

    /// Absolute assignment from a wire map. Unknown keys are skipped,
    /// values clamped into range.
    pub fn set_levels(&mut self, levels: &BTreeMap<String, i64>) {
        for (name, value) in levels {
            match Channel::parse(name) {
                Some(ch) => self.levels[ch.index()] = clamp_level(*value),
                None => tracing::debug!("ignoring unknown affect channel '{}'", name),
            }
        }
    }

    /// Additive nudge from a wire map, same tolerance rules as
    /// [`set_levels`](Self::set_levels).
    pub fn apply_delta(&mut self, deltas: &BTreeMap<String, i64>) {
        for (name, delta) in deltas {
            if let Some(ch) = Channel::parse(name) {
                let idx = ch.index();
                self.levels[idx] = clamp_level(self.levels[idx] + delta);
            }
        }
    }

    /// One linear step toward baseline: `next = cur + (base - cur) * rate`,
    /// rounded to the nearest integer. `rate` is clamped to [0, 1], so the
    /// step never overshoots the baseline.
    pub fn decay_step(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for ch in Channel::ALL {
            let idx = ch.index();
            let cur = self.levels[idx];
            let step = ((ch.baseline() - cur) as f64 * rate).round() as i64;
            self.levels[idx] = clamp_level(cur + step);
        }
    }

    pub fn reset_to_baseline(&mut self) {
        *self = Self::baseline();
    }

    /// Levels keyed by channel name, for prompts, logs, and exports.
    pub fn snapshot(&self) -> BTreeMap<&'static str, i64> {
        Channel::ALL
            .iter()
            .map(|ch| (ch.as_str(), self.level(*ch)))
            .collect()
    }
}

fn clamp_level(v: i64) -> i64 {
    v.clamp(LEVEL_MIN, LEVEL_MAX)
}
