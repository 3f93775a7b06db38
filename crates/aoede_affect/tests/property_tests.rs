//! Property-based tests for the affect state and style derivation.
//!
//! Verifies that levels stay within the documented bound under arbitrary
//! mutation sequences, and that derive_style output never leaves its
//! declared ranges for any reachable state.

use aoede_affect::{derive_style, AffectState, Channel, LEVEL_MAX, LEVEL_MIN};
use proptest::prelude::*;
use std::collections::BTreeMap;

// ============================================================================
// Strategies
// ============================================================================

fn arb_channel_name() -> impl Strategy<Value = String> {
    prop_oneof![
        // Real channels, weighted heavily
        8 => prop::sample::select(
            Channel::ALL.iter().map(|c| c.as_str().to_string()).collect::<Vec<_>>()
        ),
        // Garbage keys that must be ignored
        1 => "[a-z]{3,12}",
    ]
}

fn arb_level_map() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map(arb_channel_name(), -50i64..=50, 0..8)
}

/// One mutation of the state machine.
#[derive(Debug, Clone)]
enum Op {
    Set(BTreeMap<String, i64>),
    Delta(BTreeMap<String, i64>),
    Decay(f64),
    Reset,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_level_map().prop_map(Op::Set),
        arb_level_map().prop_map(Op::Delta),
        (0.0f64..=1.5).prop_map(Op::Decay),
        Just(Op::Reset),
    ]
}

fn apply(state: &mut AffectState, op: &Op) {
    match op {
        Op::Set(m) => state.set_levels(m),
        Op::Delta(m) => state.apply_delta(m),
        Op::Decay(rate) => state.decay_step(*rate),
        Op::Reset => state.reset_to_baseline(),
    }
}

// ============================================================================
// State invariants
// ============================================================================

proptest! {
    /// **Core invariant**: any sequence of mutators leaves every channel an
    /// integer within [LEVEL_MIN, LEVEL_MAX].
    #[test]
    fn levels_always_in_bounds(ops in prop::collection::vec(arb_op(), 0..32)) {
        let mut state = AffectState::baseline();
        for op in &ops {
            apply(&mut state, op);
            for ch in Channel::ALL {
                let level = state.level(ch);
                prop_assert!(
                    (LEVEL_MIN..=LEVEL_MAX).contains(&level),
                    "{} out of bounds: {} after {:?}",
                    ch.as_str(), level, op
                );
            }
        }
    }

    /// **Decay contracts toward baseline**: one step never increases any
    /// channel's distance to its baseline, and never crosses it.
    #[test]
    fn decay_never_diverges(
        levels in arb_level_map(),
        rate in 0.0f64..=1.0,
    ) {
        let mut state = AffectState::baseline();
        state.set_levels(&levels);
        let before = state.clone();
        state.decay_step(rate);
        for ch in Channel::ALL {
            let base = ch.baseline();
            let d_before = (before.level(ch) - base).abs();
            let d_after = (state.level(ch) - base).abs();
            prop_assert!(
                d_after <= d_before,
                "{} moved away from baseline: {} -> {}",
                ch.as_str(), before.level(ch), state.level(ch)
            );
            // No overshoot: the sign of (level - base) never flips.
            prop_assert!(
                (before.level(ch) - base).signum() * (state.level(ch) - base).signum() >= 0
            );
        }
    }

    /// **Unknown keys are inert**: a map of garbage keys changes nothing.
    #[test]
    fn unknown_keys_ignored(
        keys in prop::collection::vec("[A-Z]{4,10}", 1..6),
        value in -20i64..=20,
    ) {
        let mut state = AffectState::baseline();
        let before = state.clone();
        let map: BTreeMap<String, i64> = keys.into_iter().map(|k| (k, value)).collect();
        state.set_levels(&map);
        state.apply_delta(&map);
        prop_assert_eq!(state, before);
    }
}

// ============================================================================
// Derivation properties
// ============================================================================

proptest! {
    /// **derive_style output always in declared ranges**, for any reachable
    /// state, and all fields finite.
    #[test]
    fn style_always_in_bounds(ops in prop::collection::vec(arb_op(), 0..16)) {
        let mut state = AffectState::baseline();
        for op in &ops {
            apply(&mut state, op);
        }
        let preset = derive_style(&state);

        prop_assert!(preset.temperature >= 0.10 && preset.temperature <= 1.20,
            "temperature out of range: {}", preset.temperature);
        prop_assert!(preset.temperature.is_finite());
        prop_assert!(preset.max_output_tokens >= 128 && preset.max_output_tokens <= 1024,
            "max_output_tokens out of range: {}", preset.max_output_tokens);

        for (name, bias) in [
            ("structure_bias", preset.structure_bias),
            ("ask_clarify_bias", preset.ask_clarify_bias),
            ("humor_bias", preset.humor_bias),
            ("politeness", preset.politeness),
            ("energy", preset.energy),
            ("assertiveness", preset.assertiveness),
            ("we_pronouns", preset.we_pronouns),
            ("memory_write_bias", preset.memory_write_bias),
        ] {
            prop_assert!((0.0..=1.0).contains(&bias), "{} out of range: {}", name, bias);
            prop_assert!(bias.is_finite());
        }
    }

    /// **Purity**: deriving twice from the same state gives identical presets.
    #[test]
    fn derivation_is_pure(levels in arb_level_map()) {
        let mut state = AffectState::baseline();
        state.set_levels(&levels);
        prop_assert_eq!(derive_style(&state), derive_style(&state));
    }

    /// **Monotonicity**: higher dopamine → temperature never lower
    /// (all else equal).
    #[test]
    fn temperature_monotonic_in_dopamine(
        levels in arb_level_map(),
        lo in 0i64..=5,
        hi in 6i64..=11,
    ) {
        let mut base = AffectState::baseline();
        base.set_levels(&levels);

        let mut low = base.clone();
        low.set_levels(&BTreeMap::from([("dopamine".to_string(), lo)]));
        let mut high = base;
        high.set_levels(&BTreeMap::from([("dopamine".to_string(), hi)]));

        let t_lo = derive_style(&low).temperature;
        let t_hi = derive_style(&high).temperature;
        prop_assert!(t_hi >= t_lo,
            "dopamine {} → temp {}, dopamine {} → temp {} (not monotonic)",
            lo, t_lo, hi, t_hi);
    }
}
