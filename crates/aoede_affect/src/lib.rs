//! # Aoede Affect Engine
//!
//! Ten bounded integer channels, loosely named after neuromodulators, that
//! drift with each conversation turn and are folded into concrete sampling
//! parameters before every reply.
//!
//! The contract is deliberately narrow:
//!
//! 1. Channels live in a closed integer range and can be set, nudged,
//!    decayed toward baseline, or reset. Every mutator is total.
//! 2. [`derive_style`] is a pure function of the state. Same levels in,
//!    same [`StylePreset`] out, no clock and no randomness.
//! 3. Behavior emerges from the numbers flowing into sampling parameters
//!    and prompt biases, not from prose instructions about mood.

mod engine;
mod state;
mod style;

pub use engine::AffectEngine;
pub use state::{AffectState, Channel, LEVEL_MAX, LEVEL_MIN};
pub use style::{derive_style, StylePreset};
