//! Declarative command table derived from a validated chain.
//!
//! Labels are resolved to [`ProgressionId`]s once, at build time, so the
//! presentation layer never dispatches on raw strings after load.

use std::collections::BTreeMap;

use crate::chain::ChainGraph;
use crate::id::ProgressionId;

/// Which advancement protocol a label invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    Single,
    Max,
    AutoToggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBinding {
    pub progression: ProgressionId,
    pub action: CommandAction,
}

/// Label → binding. Built from a [`ChainGraph`] and rebuilt with it.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    bindings: BTreeMap<String, CommandBinding>,
}

impl CommandTable {
    /// For each enabled type, bind `command` (and its alias) to
    /// [`CommandAction::Single`], `"<label> max"` when buy-max is enabled,
    /// and `"<label> auto"` when auto-advance is enabled.
    ///
    /// Labels are matched case-insensitively. When two types claim the same
    /// label, the one earlier in chain order keeps it.
    pub fn build(chain: &ChainGraph) -> Self {
        let mut bindings = BTreeMap::new();
        for (id, def) in chain.ordered_types() {
            if !def.enabled {
                continue;
            }
            let labels = std::iter::once(def.command.as_str()).chain(def.command_alias.as_deref());
            for label in labels {
                let label = label.trim().to_lowercase();
                if label.is_empty() {
                    continue;
                }
                let mut bind = |key: String, action| {
                    bindings.entry(key).or_insert(CommandBinding {
                        progression: id,
                        action,
                    });
                };
                bind(label.clone(), CommandAction::Single);
                if def.max_advance_enabled {
                    bind(format!("{label} max"), CommandAction::Max);
                }
                if def.auto_advance_enabled {
                    bind(format!("{label} auto"), CommandAction::AutoToggle);
                }
            }
        }
        Self { bindings }
    }

    /// Resolve an input line; whitespace between words is normalized.
    pub fn resolve(&self, input: &str) -> Option<CommandBinding> {
        let normalized = input
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        self.bindings.get(&normalized).copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
