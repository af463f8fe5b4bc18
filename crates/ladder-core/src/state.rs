//! Per-entity progression state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::id::EntityId;

/// Everything one entity has accumulated across all progression types.
///
/// Keys are progression type string ids so the state survives reloads that
/// renumber [`ProgressionId`](crate::id::ProgressionId)s. A missing level
/// reads as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProgressionState {
    pub entity: EntityId,
    levels: BTreeMap<String, u64>,
    auto_enabled: BTreeSet<String>,
    claimed_rewards: BTreeSet<String>,
}

impl EntityProgressionState {
    /// Zero levels, no auto flags, no claimed rewards.
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            levels: BTreeMap::new(),
            auto_enabled: BTreeSet::new(),
            claimed_rewards: BTreeSet::new(),
        }
    }

    pub fn from_parts(
        entity: EntityId,
        levels: BTreeMap<String, u64>,
        auto_enabled: BTreeSet<String>,
        claimed_rewards: BTreeSet<String>,
    ) -> Self {
        Self {
            entity,
            levels,
            auto_enabled,
            claimed_rewards,
        }
    }

    // -- Levels --

    pub fn level(&self, type_id: &str) -> u64 {
        self.levels.get(type_id).copied().unwrap_or(0)
    }

    /// Set a level, clamped into `[0, limit]`. Returns the stored value.
    pub fn set_level_clamped(&mut self, type_id: &str, level: u64, limit: u64) -> u64 {
        let level = level.min(limit);
        if level == 0 {
            self.levels.remove(type_id);
        } else {
            self.levels.insert(type_id.to_string(), level);
        }
        level
    }

    /// Increment by one without passing `limit`. Returns the new level.
    pub fn increment_level(&mut self, type_id: &str, limit: u64) -> u64 {
        let next = self.level(type_id).saturating_add(1);
        self.set_level_clamped(type_id, next, limit)
    }

    pub fn levels(&self) -> &BTreeMap<String, u64> {
        &self.levels
    }

    // -- Auto-advance flags --

    pub fn is_auto_enabled(&self, type_id: &str) -> bool {
        self.auto_enabled.contains(type_id)
    }

    pub fn set_auto_enabled(&mut self, type_id: &str, enabled: bool) {
        if enabled {
            self.auto_enabled.insert(type_id.to_string());
        } else {
            self.auto_enabled.remove(type_id);
        }
    }

    pub fn auto_enabled(&self) -> &BTreeSet<String> {
        &self.auto_enabled
    }

    // -- One-time rewards --

    pub fn has_claimed(&self, key: &str) -> bool {
        self.claimed_rewards.contains(key)
    }

    /// Record a claimed key. Returns false if it was already claimed.
    pub fn claim(&mut self, key: impl Into<String>) -> bool {
        self.claimed_rewards.insert(key.into())
    }

    pub fn claimed_rewards(&self) -> &BTreeSet<String> {
        &self.claimed_rewards
    }

    /// True when nothing distinguishes this state from a fresh entity.
    pub fn is_default(&self) -> bool {
        self.levels.is_empty() && self.auto_enabled.is_empty() && self.claimed_rewards.is_empty()
    }
}
