//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so downstream
//! crates can opt in through the `test-utils` feature.

use crate::chain::ChainGraph;
use crate::id::CurrencyId;
use crate::progression::*;

// ===========================================================================
// Definition builders
// ===========================================================================

/// Root type with the default exponential cost (1000 * 1.15^n).
pub fn root(id: &str, limit: u64) -> ProgressionType {
    let mut def = ProgressionType::new(id);
    def.level_limit = limit;
    def
}

/// Type following `follows`, requiring it at its limit.
pub fn follower(id: &str, follows: &str, limit: u64) -> ProgressionType {
    let mut def = root(id, limit);
    def.follows = Some(follows.to_string());
    def
}

pub fn multiplicative(scale_with: &str, value: f64) -> CostScaling {
    CostScaling {
        scale_with: scale_with.to_string(),
        mode: ScalingMode::Multiplicative,
        value,
    }
}

pub fn linear(base: u64, per_level: u64) -> CostModel {
    CostModel::Linear { base, per_level }
}

pub fn money() -> CurrencyId {
    CurrencyId::new("money")
}

// ===========================================================================
// Canonical chains
// ===========================================================================

/// `rankup` (limit 5) → `prestige` (limit 3, resets rankup) → `rebirth`
/// (limit 2, resets prestige). Every type allows buy-max and auto-advance.
pub fn standard_defs() -> Vec<ProgressionType> {
    let mut rankup = root("rankup", 5);
    rankup.max_advance_enabled = true;
    rankup.auto_advance_enabled = true;
    rankup.auto_advance_delay_ticks = 1;

    let mut prestige = follower("prestige", "rankup", 3);
    prestige.reset_on_advance.reset_previous = true;
    prestige.max_advance_enabled = true;
    prestige.auto_advance_enabled = true;
    prestige.auto_advance_delay_ticks = 1;

    let mut rebirth = follower("rebirth", "prestige", 2);
    rebirth.reset_on_advance.reset_previous = true;
    rebirth.auto_advance_enabled = true;
    rebirth.auto_advance_delay_ticks = 1;

    vec![rankup, prestige, rebirth]
}

pub fn standard_chain() -> ChainGraph {
    match ChainGraph::build(standard_defs()) {
        Ok(chain) => chain,
        Err(e) => panic!("standard chain must build: {e}"),
    }
}
