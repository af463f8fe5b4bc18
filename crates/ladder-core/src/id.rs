use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Dense index of a progression type inside one [`ChainGraph`] build.
///
/// Only meaningful for the graph that produced it. Anything that outlives a
/// reload (persisted state, command labels) uses the string id instead.
///
/// [`ChainGraph`]: crate::chain::ChainGraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgressionId(pub u32);

impl ProgressionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies an entity (player) across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name of a currency held by an external ledger (e.g. `"money"`, `"tokens"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyId(pub String);

impl CurrencyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
