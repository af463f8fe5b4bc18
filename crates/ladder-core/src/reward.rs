//! Resolution of reward rules into concrete actions.
//!
//! Resolution is pure apart from claiming first-time keys on the state it
//! is handed. Dispatch is someone else's job: the resolved actions are
//! handed to the runtime's reward batcher as-is.

use serde::{Deserialize, Serialize};

use crate::progression::{ProgressionType, RewardRule};
use crate::state::EntityProgressionState;

/// One opaque action string for the external executor, with the level
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAction {
    pub progression: String,
    pub level: u64,
    pub command: String,
}

/// Actions to dispatch plus the first-time keys newly claimed on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRewards {
    pub actions: Vec<RewardAction>,
    pub claimed: Vec<String>,
}

impl ResolvedRewards {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.claimed.is_empty()
    }

    fn extend(&mut self, other: ResolvedRewards) {
        self.actions.extend(other.actions);
        self.claimed.extend(other.claimed);
    }
}

/// Substitute `{entity}`, `{level}` and `{type}`.
pub fn substitute(command: &str, entity: &str, level: u64, type_id: &str) -> String {
    command
        .replace("{entity}", entity)
        .replace("{level}", &level.to_string())
        .replace("{type}", type_id)
}

/// Resolve every rule of `def` that fires on reaching `new_level`.
///
/// First-time rules whose key is already claimed on `state` are skipped;
/// the ones that fire are claimed on `state` and reported in `claimed` so
/// the caller can persist them.
pub fn resolve_level(
    def: &ProgressionType,
    new_level: u64,
    state: &mut EntityProgressionState,
) -> ResolvedRewards {
    let entity = state.entity.to_string();
    let mut out = ResolvedRewards::default();

    for rule in &def.reward_rules {
        let commands = match rule {
            RewardRule::EveryLevel(commands) => commands,
            RewardRule::Interval { n, commands } => {
                if *n == 0 || new_level % n != 0 {
                    continue;
                }
                commands
            }
            RewardRule::FirstTime { level, commands } => {
                if *level != new_level {
                    continue;
                }
                let key = def.first_time_key(new_level);
                if !state.claim(key.clone()) {
                    continue;
                }
                out.claimed.push(key);
                commands
            }
        };
        out.actions.extend(commands.iter().map(|c| RewardAction {
            progression: def.id.clone(),
            level: new_level,
            command: substitute(c, &entity, new_level, &def.id),
        }));
    }
    out
}

/// Resolve rewards for every level in `(from, to]`, in ascending order.
pub fn resolve_range(
    def: &ProgressionType,
    from: u64,
    to: u64,
    state: &mut EntityProgressionState,
) -> ResolvedRewards {
    let mut out = ResolvedRewards::default();
    if def.reward_rules.is_empty() {
        return out;
    }
    for level in from.saturating_add(1)..=to {
        out.extend(resolve_level(def, level, state));
    }
    out
}
