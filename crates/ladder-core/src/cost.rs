//! Level pricing.
//!
//! [`price`] is the pure cost function. [`CostEngine`] wraps it with one
//! bounded LRU cache per progression type so hot lookups (buy-max loops,
//! scheduler sweeps) skip the float math.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

use crate::chain::ChainGraph;
use crate::id::ProgressionId;
use crate::money::Money;
use crate::progression::{CostModel, CostScaling, ProgressionType, ScalingMode};
use crate::state::EntityProgressionState;

/// Default per-type cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Pure pricing
// ---------------------------------------------------------------------------

impl CostModel {
    /// Unscaled price of the level after `level`.
    pub fn base_cost(&self, level: u64) -> Money {
        match *self {
            CostModel::Linear { base, per_level } => {
                Money(base.saturating_add(per_level.saturating_mul(level)))
            }
            CostModel::Exponential { base, multiplier } => {
                Money::from_f64_half_up(base as f64 * multiplier.powf(level as f64))
            }
        }
    }
}

impl CostScaling {
    /// Fold `scaling_level` into a base price.
    pub fn apply(&self, base: Money, scaling_level: u64) -> Money {
        if scaling_level == 0 {
            return base;
        }
        let lvl = scaling_level as f64;
        match self.mode {
            ScalingMode::Multiplicative => {
                Money::from_f64_half_up(base.as_f64() * (1.0 + self.value * lvl))
            }
            ScalingMode::Additive => Money::from_f64_half_up(base.as_f64() + self.value * lvl),
        }
    }
}

/// Price to go from `current_level` to `current_level + 1`.
///
/// Pure and deterministic. `scaling_level` is the entity's level in the
/// type named by the definition's scaling rule (ignored without one).
pub fn price(def: &ProgressionType, current_level: u64, scaling_level: u64) -> Money {
    let base = def.cost_model.base_cost(current_level);
    match &def.scaling {
        Some(scaling) => scaling.apply(base, scaling_level),
        None => base,
    }
}

// ---------------------------------------------------------------------------
// Cached engine
// ---------------------------------------------------------------------------

/// Hit/miss counters, for introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Pricing {
    model: CostModel,
    scaling: Option<CostScaling>,
    cache: Option<Mutex<LruCache<(u64, u64), Money>>>,
}

/// Memoizing pricer bound to one [`ChainGraph`] build.
///
/// A reload builds a fresh engine next to the fresh graph, so stale
/// entries can never outlive the definitions they were computed from.
#[derive(Debug)]
pub struct CostEngine {
    pricing: Vec<Pricing>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CostEngine {
    /// One cache of `capacity` entries per type. A capacity of 0 disables
    /// caching entirely.
    pub fn new(chain: &ChainGraph, capacity: usize) -> Self {
        let pricing = chain
            .types()
            .iter()
            .map(|def| Pricing {
                model: def.cost_model.clone(),
                scaling: def.scaling.clone(),
                cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            })
            .collect();
        Self {
            pricing,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Price to advance `id` from `current_level`. `None` for ids this
    /// engine was not built with.
    pub fn cost(&self, id: ProgressionId, current_level: u64, scaling_level: u64) -> Option<Money> {
        let pricing = self.pricing.get(id.index())?;
        // Scaling level only affects the key when a rule consumes it.
        let key = (
            current_level,
            if pricing.scaling.is_some() { scaling_level } else { 0 },
        );

        let Some(cache) = &pricing.cache else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Some(compute(pricing, key.0, key.1));
        };

        if let Some(hit) = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute(pricing, key.0, key.1);
        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, value);
        Some(value)
    }

    /// The entity's level in the type that drives `id`'s scaling rule, or 0.
    pub fn scaling_level(&self, id: ProgressionId, state: &EntityProgressionState) -> u64 {
        self.pricing
            .get(id.index())
            .and_then(|p| p.scaling.as_ref())
            .map(|s| state.level(&s.scale_with))
            .unwrap_or(0)
    }

    /// Drop every cached entry. Counters are kept.
    pub fn clear(&self) {
        for p in &self.pricing {
            if let Some(cache) = &p.cache {
                cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
            }
        }
    }

    pub fn stats(&self) -> CostCacheStats {
        let entries = self
            .pricing
            .iter()
            .filter_map(|p| p.cache.as_ref())
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum();
        CostCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

fn compute(pricing: &Pricing, level: u64, scaling_level: u64) -> Money {
    let base = pricing.model.base_cost(level);
    match &pricing.scaling {
        Some(scaling) => scaling.apply(base, scaling_level),
        None => base,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
