//! Serde data file structs for progression definitions.
//!
//! These structs define the on-disk format. They are deserialized from RON,
//! JSON, or TOML data files and then resolved into `ladder-core` types by
//! the loader.

use serde::Deserialize;
use std::collections::BTreeMap;

// ===========================================================================
// Progressions
// ===========================================================================

/// One progression type in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressionData {
    pub name: String,
    #[serde(default)]
    pub follows: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Command label; defaults to `name`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub command_alias: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default = "default_true")]
    pub requires_max_level: bool,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub cost: CostData,
    #[serde(default)]
    pub scaling: Option<ScalingData>,
    #[serde(default)]
    pub resets: ResetData,
    #[serde(default)]
    pub auto: AutoData,
    #[serde(default)]
    pub max_enabled: bool,
    #[serde(default)]
    pub rewards: RewardsData,
}

/// Cost model of a progression.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostData {
    Linear { base: u64, per_level: u64 },
    Exponential { base: u64, multiplier: f64 },
}

impl Default for CostData {
    fn default() -> Self {
        CostData::Exponential {
            base: 1000,
            multiplier: 1.15,
        }
    }
}

/// Cross-chain price scaling.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalingData {
    /// Name of the progression whose level drives the scaling.
    pub with: String,
    #[serde(default)]
    pub mode: ScalingModeData,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingModeData {
    #[default]
    Multiplier,
    Additive,
}

/// What a successful advance zeroes.
#[derive(Debug, Clone, Deserialize)]
pub struct ResetData {
    #[serde(default)]
    pub currencies: Vec<String>,
    /// Reset the level of the followed progression.
    #[serde(default = "default_true")]
    pub previous: bool,
}

impl Default for ResetData {
    fn default() -> Self {
        Self {
            currencies: Vec::new(),
            previous: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoData {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_delay")]
    pub delay_ticks: u64,
}

impl Default for AutoData {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ticks: default_delay(),
        }
    }
}

/// Reward commands. Map keys are level numbers written as strings so the
/// same shape works in every format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewardsData {
    #[serde(default)]
    pub every_level: Vec<String>,
    /// `n -> commands`, fired when the new level is a multiple of `n`.
    #[serde(default)]
    pub interval: BTreeMap<String, Vec<String>>,
    /// `level -> commands`, fired once per entity.
    #[serde(default)]
    pub first_time: BTreeMap<String, Vec<String>>,
}

/// Wrapper for a list of progressions in TOML format.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlProgressions {
    pub progressions: Vec<ProgressionData>,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> u64 {
    50
}

fn default_currency() -> String {
    "money".to_string()
}

fn default_delay() -> u64 {
    20
}

// ===========================================================================
// Tests
// ===========================================================================
