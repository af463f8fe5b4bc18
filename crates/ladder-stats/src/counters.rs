use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an attempt did not advance, as far as the counters care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    Busy,
    Ineligible,
    AtLimit,
    InsufficientFunds,
    WithdrawFailed,
    LedgerUnavailable,
    Disabled,
}

impl Rejection {
    const COUNT: usize = 7;

    fn slot(self) -> usize {
        match self {
            Rejection::Busy => 0,
            Rejection::Ineligible => 1,
            Rejection::AtLimit => 2,
            Rejection::InsufficientFunds => 3,
            Rejection::WithdrawFailed => 4,
            Rejection::LedgerUnavailable => 5,
            Rejection::Disabled => 6,
        }
    }
}

/// Runtime counters. All updates are relaxed atomics; readers get a
/// best-effort view through [`PerfCounters::snapshot`].
#[derive(Debug, Default)]
pub struct PerfCounters {
    attempts: AtomicU64,
    advances: AtomicU64,
    levels_gained: AtomicU64,
    rejections: [AtomicU64; Rejection::COUNT],
    loads: AtomicU64,
    load_failures: AtomicU64,
    saves: AtomicU64,
    save_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rewards_dispatched: AtomicU64,
    reward_failures: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// One successful transaction that bought `levels` levels.
    pub fn advanced(&self, levels: u64) {
        self.advances.fetch_add(1, Ordering::Relaxed);
        self.levels_gained.fetch_add(levels, Ordering::Relaxed);
    }

    pub fn rejected(&self, why: Rejection) {
        self.rejections[why.slot()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn load(&self, ok: bool) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn save(&self, ok: bool) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.save_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reward(&self, ok: bool) {
        if ok {
            self.rewards_dispatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reward_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        let r = |why: Rejection| self.rejections[why.slot()].load(Ordering::Relaxed);
        PerfSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            advances: self.advances.load(Ordering::Relaxed),
            levels_gained: self.levels_gained.load(Ordering::Relaxed),
            rejected_busy: r(Rejection::Busy),
            rejected_ineligible: r(Rejection::Ineligible),
            rejected_at_limit: r(Rejection::AtLimit),
            rejected_insufficient_funds: r(Rejection::InsufficientFunds),
            withdraw_failed: r(Rejection::WithdrawFailed),
            ledger_unavailable: r(Rejection::LedgerUnavailable),
            rejected_disabled: r(Rejection::Disabled),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            rewards_dispatched: self.rewards_dispatched.load(Ordering::Relaxed),
            reward_failures: self.reward_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PerfCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerfSnapshot {
    pub attempts: u64,
    pub advances: u64,
    pub levels_gained: u64,
    pub rejected_busy: u64,
    pub rejected_ineligible: u64,
    pub rejected_at_limit: u64,
    pub rejected_insufficient_funds: u64,
    pub withdraw_failed: u64,
    pub ledger_unavailable: u64,
    pub rejected_disabled: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rewards_dispatched: u64,
    pub reward_failures: u64,
}

impl PerfSnapshot {
    /// State cache hit ratio in `[0, 1]`; 0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn total_rejections(&self) -> u64 {
        self.rejected_busy
            + self.rejected_ineligible
            + self.rejected_at_limit
            + self.rejected_insufficient_funds
            + self.withdraw_failed
            + self.ledger_unavailable
            + self.rejected_disabled
    }

    /// Ledger disagreements and outages.
    pub fn ledger_anomalies(&self) -> u64 {
        self.withdraw_failed + self.ledger_unavailable
    }
}

impl fmt::Display for PerfSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempts={} advances={} levels={} rejected={} anomalies={} loads={} saves={} save_failures={} hit_ratio={:.2}",
            self.attempts,
            self.advances,
            self.levels_gained,
            self.total_rejections(),
            self.ledger_anomalies(),
            self.loads,
            self.saves,
            self.save_failures,
            self.hit_ratio(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_attempts_and_levels() {
        let c = PerfCounters::new();
        c.attempt();
        c.attempt();
        c.advanced(3);
        let s = c.snapshot();
        assert_eq!(s.attempts, 2);
        assert_eq!(s.advances, 1);
        assert_eq!(s.levels_gained, 3);
    }

    #[test]
    fn rejections_bucketed() {
        let c = PerfCounters::new();
        c.rejected(Rejection::InsufficientFunds);
        c.rejected(Rejection::InsufficientFunds);
        c.rejected(Rejection::WithdrawFailed);
        c.rejected(Rejection::LedgerUnavailable);
        let s = c.snapshot();
        assert_eq!(s.rejected_insufficient_funds, 2);
        assert_eq!(s.total_rejections(), 4);
        assert_eq!(s.ledger_anomalies(), 2);
    }

    #[test]
    fn hit_ratio() {
        let c = PerfCounters::new();
        assert_eq!(c.snapshot().hit_ratio(), 0.0);
        c.cache_lookup(true);
        c.cache_lookup(true);
        c.cache_lookup(true);
        c.cache_lookup(false);
        assert!((c.snapshot().hit_ratio() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn failures_tracked_separately() {
        let c = PerfCounters::new();
        c.load(true);
        c.load(false);
        c.save(false);
        c.reward(true);
        c.reward(false);
        let s = c.snapshot();
        assert_eq!((s.loads, s.load_failures), (2, 1));
        assert_eq!((s.saves, s.save_failures), (1, 1));
        assert_eq!((s.rewards_dispatched, s.reward_failures), (1, 1));
    }

    #[test]
    fn snapshot_serializes() {
        let c = PerfCounters::new();
        c.attempt();
        let json = serde_json::to_string(&c.snapshot()).unwrap();
        assert!(json.contains("\"attempts\":1"));
    }
}
