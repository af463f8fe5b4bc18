//! Progression type definitions.
//!
//! A [`ProgressionType`] is one advancement ladder (rank, prestige, ...).
//! Definitions are built at configuration load, shared read-only behind the
//! chain graph and replaced wholesale on reload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::id::CurrencyId;

// ---------------------------------------------------------------------------
// Cost models
// ---------------------------------------------------------------------------

/// How the base price of the next level grows with the current level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CostModel {
    /// `base + per_level * level`.
    Linear { base: u64, per_level: u64 },

    /// `base * multiplier^level`, computed in `f64` and rounded half-up.
    /// Precision degrades for very large exponents; cap the level limit or
    /// use `Linear` when exact growth matters.
    Exponential { base: u64, multiplier: f64 },
}

/// How a cross-chain scaling level is folded into the base price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMode {
    /// `base * (1 + value * scaling_level)`.
    Multiplicative,
    /// `base + value * scaling_level`.
    Additive,
}

/// Cross-chain scaling: the price of this type grows with the entity's level
/// in another type (e.g. rank costs more after every prestige).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostScaling {
    /// String id of the progression type whose level drives the scaling.
    pub scale_with: String,
    pub mode: ScalingMode,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Resets
// ---------------------------------------------------------------------------

/// What is zeroed after a successful advance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPolicy {
    /// Currencies whose ledger balance is set to zero.
    pub currencies: BTreeSet<CurrencyId>,
    /// Whether the level of the type this one follows is reset to 0.
    pub reset_previous: bool,
}

impl ResetPolicy {
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty() && !self.reset_previous
    }
}

// ---------------------------------------------------------------------------
// Rewards
// ---------------------------------------------------------------------------

/// A reward rule evaluated for each newly reached level.
///
/// Commands are opaque action strings for the external executor. The
/// placeholders `{entity}`, `{level}` and `{type}` are substituted when the
/// rule is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardRule {
    /// Fires on every level.
    EveryLevel(Vec<String>),

    /// Fires when `new_level % n == 0`. `n` is never zero after load.
    Interval { n: u64, commands: Vec<String> },

    /// Fires once per entity when `level` is first reached. Guarded by the
    /// claimed-reward key `type_id:level`.
    FirstTime { level: u64, commands: Vec<String> },
}

// ---------------------------------------------------------------------------
// ProgressionType
// ---------------------------------------------------------------------------

/// One advancement ladder. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionType {
    /// Unique string id (`"rankup"`, `"prestige"`).
    pub id: String,

    /// Human-readable name for messages and listings.
    pub display_name: String,

    /// Primary command label; defaults to the id.
    pub command: String,

    /// Optional secondary command label.
    pub command_alias: Option<String>,

    /// Id of the type this one follows. `None` marks a root.
    pub follows: Option<String>,

    /// Highest reachable level.
    pub level_limit: u64,

    pub enabled: bool,

    /// If true, advancing requires the followed type to be at its limit.
    /// Otherwise level 1 in the followed type is enough.
    pub requires_prior_max_level: bool,

    /// Currency the price is paid in.
    pub currency: CurrencyId,

    pub cost_model: CostModel,

    pub scaling: Option<CostScaling>,

    pub reset_on_advance: ResetPolicy,

    /// Whether the type may be advanced by the scheduler at all.
    pub auto_advance_enabled: bool,

    /// Per-entity cooldown, in scheduler ticks, after an auto attempt.
    pub auto_advance_delay_ticks: u64,

    /// Whether buy-max is offered for this type.
    pub max_advance_enabled: bool,

    pub reward_rules: Vec<RewardRule>,
}

impl ProgressionType {
    /// A definition with the defaults the configuration layer applies:
    /// enabled, limit 50, requires prior max level, exponential 1000 * 1.15^n
    /// in `"money"`, no scaling, no resets, no rewards.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            command: id.clone(),
            command_alias: None,
            follows: None,
            level_limit: 50,
            enabled: true,
            requires_prior_max_level: true,
            currency: CurrencyId::new("money"),
            cost_model: CostModel::Exponential {
                base: 1000,
                multiplier: 1.15,
            },
            scaling: None,
            reset_on_advance: ResetPolicy::default(),
            auto_advance_enabled: false,
            auto_advance_delay_ticks: 20,
            max_advance_enabled: false,
            reward_rules: Vec::new(),
            id,
        }
    }

    pub fn is_root(&self) -> bool {
        self.follows.is_none()
    }

    /// Key guarding a first-time reward for `level` of this type.
    pub fn first_time_key(&self, level: u64) -> String {
        format!("{}:{}", self.id, level)
    }
}
