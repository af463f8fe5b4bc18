//! Ladder Core -- the synchronous model of a multi-stage progression economy.
//!
//! Entities (players) advance through an ordered chain of progression types
//! (rank, prestige, rebirth, ...). Each level is bought with a currency and
//! unlocks configured rewards. This crate holds everything that can be
//! decided without I/O: the type definitions, the dependency chain, the
//! price function and the per-entity state shape.
//!
//! # Pipeline
//!
//! 1. **Load** -- [`progression::ProgressionType`] definitions arrive from
//!    configuration (see the `ladder-data` crate).
//! 2. **Validate** -- [`chain::ChainGraph::build`] orders them with Kahn's
//!    algorithm and rejects cycles and dangling `follows` references.
//! 3. **Price** -- [`cost::CostEngine`] memoizes prices per type.
//! 4. **Mutate** -- [`state::EntityProgressionState`] records levels, auto
//!    flags and claimed one-time rewards.
//! 5. **Reward** -- [`reward::resolve_range`] resolves reward rules into
//!    concrete actions for a purchased level range.
//!
//! Nothing here is mutated after load. A configuration reload builds a new
//! [`chain::ChainGraph`] and a new [`cost::CostEngine`] and swaps them in
//! wholesale.
//!
//! # Key Types
//!
//! - [`chain::ChainGraph`] -- validated, topologically ordered forest.
//! - [`cost::CostEngine`] -- bounded LRU price cache per progression type.
//! - [`money::Money`] -- non-negative amount in a currency's minimum unit.
//! - [`commands::CommandTable`] -- declarative command labels derived from
//!   the chain.

pub mod chain;
pub mod commands;
pub mod cost;
pub mod id;
pub mod money;
pub mod progression;
pub mod reward;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
