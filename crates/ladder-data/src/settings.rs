//! Runtime tuning knobs, read from an optional `settings.*` file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler, cache and dispatch settings. Every field is optional in the
/// file and falls back to the value in [`RuntimeSettings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Scheduler period.
    pub tick_interval_ms: u64,
    /// Ticks between eviction sweeps.
    pub maintenance_interval_ticks: u64,
    pub summary_enabled: bool,
    /// Ticks between auto-advance summaries.
    pub summary_interval_ticks: u64,
    /// Ticks between periodic flushes of every cached state.
    pub flush_interval_ticks: u64,
    pub cache_ttl_secs: u64,
    /// 0 means unbounded.
    pub max_cached_entities: usize,
    /// Per-type price cache capacity. 0 disables price caching.
    pub cost_cache_capacity: usize,
    pub reward_batch_size: usize,
    pub reward_batch_delay_ms: u64,
    /// Upper bound on levels one auto pass may buy.
    pub max_auto_steps_per_tick: u64,
    /// Upper bound on levels one buy-max purchase may buy.
    pub max_levels_per_purchase: u64,
    /// Width of the scheduler's worker pool.
    pub max_concurrent_attempts: usize,
    pub ledger_timeout_ms: u64,
    pub summary: SummaryFormat,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            maintenance_interval_ticks: 300,
            summary_enabled: true,
            summary_interval_ticks: 120,
            flush_interval_ticks: 600,
            cache_ttl_secs: 30 * 60,
            max_cached_entities: 0,
            cost_cache_capacity: 1000,
            reward_batch_size: 5,
            reward_batch_delay_ms: 100,
            max_auto_steps_per_tick: 64,
            max_levels_per_purchase: 1000,
            max_concurrent_attempts: 64,
            ledger_timeout_ms: 5000,
            summary: SummaryFormat::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn reward_batch_delay(&self) -> Duration {
        Duration::from_millis(self.reward_batch_delay_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

/// Text of the periodic auto-advance summary. `{type}` and `{count}` are
/// substituted per line; `{total}` in header and footer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryFormat {
    pub header: String,
    pub line: String,
    pub footer: String,
}

impl Default for SummaryFormat {
    fn default() -> Self {
        Self {
            header: "Auto-advance summary:".to_string(),
            line: "  {type}: +{count}".to_string(),
            footer: "  total: {total}".to_string(),
        }
    }
}
