//! Fixed-period driver for auto-advance and housekeeping.
//!
//! Each tick walks the online entities and hands every eligible one to a
//! bounded worker pool. An auto pass tries the entity's auto-enabled types
//! in chain order and stops at the first type that reached the ledger; the
//! entity then cools down for that type's `auto_advance_delay_ticks`.
//!
//! Longer periods drive the eviction sweep, the auto-advance summary and
//! the periodic flush. The driving loop never awaits an attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ladder_core::id::EntityId;
use ladder_data::RuntimeSettings;
use ladder_data::SummaryFormat;
use ladder_stats::AutoSummary;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{AdvancementEngine, RejectReason};
use crate::store::FlushReport;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Summary delivery
// ---------------------------------------------------------------------------

/// Rendered auto-advance summary for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryReport {
    pub entity: EntityId,
    pub levels: u64,
    pub text: String,
}

/// Where summaries go (chat message, mail, log).
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn deliver(&self, report: SummaryReport);
}

#[derive(Debug, Default)]
pub struct LogSummarySink;

#[async_trait]
impl SummarySink for LogSummarySink {
    async fn deliver(&self, report: SummaryReport) {
        info!(entity = %report.entity, levels = report.levels, "{}", report.text);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Periods are in ticks. A period of 0 disables that job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub maintenance_interval_ticks: u64,
    pub summary_enabled: bool,
    pub summary_interval_ticks: u64,
    pub flush_interval_ticks: u64,
    pub max_concurrent_attempts: usize,
    pub summary: SummaryFormat,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval(),
            maintenance_interval_ticks: settings.maintenance_interval_ticks,
            summary_enabled: settings.summary_enabled,
            summary_interval_ticks: settings.summary_interval_ticks,
            flush_interval_ticks: settings.flush_interval_ticks,
            max_concurrent_attempts: settings.max_concurrent_attempts.max(1),
            summary: settings.summary.clone(),
        }
    }
}

fn due(tick: u64, every: u64) -> bool {
    every > 0 && tick % every == 0
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Auto passes handed to the worker pool.
    pub dispatched: usize,
    pub skipped_busy: usize,
    pub cooling_down: usize,
    pub evicted: usize,
    pub summaries: usize,
    pub flushed: Option<FlushReport>,
}

struct SchedulerInner {
    engine: Arc<AdvancementEngine>,
    sink: Arc<dyn SummarySink>,
    config: SchedulerConfig,
    tick: AtomicU64,
    /// Entity → first tick at which it may run again.
    cooldowns: Mutex<HashMap<EntityId, u64>>,
    summary: Mutex<AutoSummary>,
    permits: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(engine: Arc<AdvancementEngine>, sink: Arc<dyn SummarySink>, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_attempts.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                engine,
                sink,
                config,
                tick: AtomicU64::new(0),
                cooldowns: Mutex::new(HashMap::new()),
                summary: Mutex::new(AutoSummary::new()),
                permits,
            }),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.inner.tick.load(Ordering::Acquire)
    }

    /// Levels recorded for `entity` since the last summary.
    pub fn pending_summary(&self, entity: EntityId) -> u64 {
        lock(&self.inner.summary)
            .peek(entity)
            .map(|s| s.total())
            .unwrap_or(0)
    }

    /// Run one tick and wait for every attempt it started.
    pub async fn tick_once(&self) -> TickReport {
        let tick = self.inner.tick.fetch_add(1, Ordering::AcqRel) + 1;
        let mut attempts = JoinSet::new();
        let mut report = self.dispatch(tick, &mut attempts);
        while let Some(joined) = attempts.join_next().await {
            if let Err(e) = joined {
                warn!(tick, error = %e, "auto pass panicked");
            }
        }
        self.inner.housekeeping(tick, &mut report).await;
        report
    }

    /// Drive ticks until `shutdown` resolves, then wait for in-flight
    /// attempts. Housekeeping runs on its own task so a slow flush never
    /// delays the next tick.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.inner.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut attempts = JoinSet::new();
        let mut chores: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);
        info!(interval = ?self.inner.config.tick_interval, "scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let tick = self.inner.tick.fetch_add(1, Ordering::AcqRel) + 1;
                    let mut report = self.dispatch(tick, &mut attempts);
                    while let Some(joined) = attempts.try_join_next() {
                        if let Err(e) = joined {
                            warn!(tick, error = %e, "auto pass panicked");
                        }
                    }
                    while chores.try_join_next().is_some() {}
                    if self.inner.has_housekeeping(tick) {
                        let inner = Arc::clone(&self.inner);
                        chores.spawn(async move { inner.housekeeping(tick, &mut report).await });
                    } else if report.dispatched > 0 {
                        debug!(tick, dispatched = report.dispatched, "tick");
                    }
                }
            }
        }

        while attempts.join_next().await.is_some() {}
        while chores.join_next().await.is_some() {}
        info!(tick = self.current_tick(), "scheduler stopped");
    }

    fn dispatch(&self, tick: u64, attempts: &mut JoinSet<()>) -> TickReport {
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        let engine = &self.inner.engine;
        let catalog = engine.catalog();

        for entity in engine.store().online() {
            if lock(&self.inner.cooldowns)
                .get(&entity)
                .is_some_and(|&ready| ready > tick)
            {
                report.cooling_down += 1;
                continue;
            }
            let Some(handle) = engine.store().cached_handle(entity) else {
                continue;
            };
            if handle.is_busy() {
                report.skipped_busy += 1;
                continue;
            }
            let types: Vec<String> = handle.with_state(|s| {
                catalog
                    .chain
                    .ordered_types()
                    .filter(|(_, def)| def.auto_advance_enabled && s.is_auto_enabled(&def.id))
                    .map(|(_, def)| def.id.clone())
                    .collect()
            });
            if types.is_empty() {
                continue;
            }

            let inner = Arc::clone(&self.inner);
            let permits = Arc::clone(&self.inner.permits);
            attempts.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                inner.auto_pass(tick, entity, types).await;
            });
            report.dispatched += 1;
        }
        report
    }
}

impl SchedulerInner {
    async fn auto_pass(&self, tick: u64, entity: EntityId, types: Vec<String>) {
        for type_id in types {
            let out = match self.engine.auto_advance(entity, &type_id).await {
                Ok(out) => out,
                Err(e) => {
                    // The type went away in a reload since dispatch.
                    debug!(entity = %entity, error = %e, "auto pass skipped type");
                    continue;
                }
            };
            if out.levels > 0 {
                let label = self
                    .engine
                    .catalog()
                    .chain
                    .get_by_name(&type_id)
                    .map(|def| def.display_name.clone())
                    .unwrap_or_else(|| type_id.clone());
                lock(&self.summary).record(entity, &label, out.levels);
            }
            if out.stopped == Some(RejectReason::Busy) {
                return;
            }
            if out.attempted {
                let delay = self
                    .engine
                    .catalog()
                    .chain
                    .get_by_name(&type_id)
                    .map(|def| def.auto_advance_delay_ticks)
                    .unwrap_or(0);
                lock(&self.cooldowns).insert(entity, tick.saturating_add(delay));
                return;
            }
        }
    }

    fn has_housekeeping(&self, tick: u64) -> bool {
        due(tick, self.config.maintenance_interval_ticks)
            || (self.config.summary_enabled && due(tick, self.config.summary_interval_ticks))
            || due(tick, self.config.flush_interval_ticks)
    }

    async fn housekeeping(&self, tick: u64, report: &mut TickReport) {
        let store = self.engine.store();

        if due(tick, self.config.maintenance_interval_ticks) {
            report.evicted = store.evict_expired().await;
            let online: std::collections::HashSet<_> = store.online().into_iter().collect();
            lock(&self.cooldowns).retain(|entity, _| online.contains(entity));
        }

        if self.config.summary_enabled && due(tick, self.config.summary_interval_ticks) {
            let drained = lock(&self.summary).drain_all();
            let fmt = &self.config.summary;
            for (entity, summary) in drained {
                let report_text = summary.render(&fmt.header, &fmt.line, &fmt.footer);
                self.sink
                    .deliver(SummaryReport {
                        entity,
                        levels: summary.total(),
                        text: report_text,
                    })
                    .await;
                report.summaries += 1;
            }
        }

        if due(tick, self.config.flush_interval_ticks) {
            report.flushed = Some(store.save_all().await);
        }

        if report.evicted > 0 || report.summaries > 0 || report.flushed.is_some() {
            debug!(
                tick,
                evicted = report.evicted,
                summaries = report.summaries,
                flushed = ?report.flushed,
                "housekeeping"
            );
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.current_tick())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Catalog, EngineConfig};
    use crate::ledger::LedgerRegistry;
    use crate::rewards::RewardBatcher;
    use crate::store::{EntityStateStore, StoreConfig};
    use crate::test_utils::{CountingPersistence, RecordingExecutor, ScriptedLedger};
    use ladder_core::chain::ChainGraph;
    use ladder_core::money::Money;
    use ladder_core::progression::ProgressionType;
    use ladder_core::test_utils::*;
    use ladder_stats::PerfCounters;

    #[derive(Default)]
    struct CollectingSink {
        reports: Mutex<Vec<SummaryReport>>,
    }

    #[async_trait]
    impl SummarySink for CollectingSink {
        async fn deliver(&self, report: SummaryReport) {
            self.reports.lock().unwrap().push(report);
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        engine: Arc<AdvancementEngine>,
        ledger: Arc<ScriptedLedger>,
        sink: Arc<CollectingSink>,
    }

    fn fixture(defs: Vec<ProgressionType>, config: SchedulerConfig) -> Fixture {
        let counters = Arc::new(PerfCounters::new());
        let ledger = Arc::new(ScriptedLedger::new());
        let store = EntityStateStore::new(
            Arc::new(CountingPersistence::new()),
            StoreConfig::default(),
            Arc::clone(&counters),
        );
        let rewards = RewardBatcher::spawn(
            Arc::new(RecordingExecutor::new()),
            10,
            Duration::ZERO,
            Arc::clone(&counters),
        );
        let engine = Arc::new(AdvancementEngine::new(
            Arc::new(Catalog::new(ChainGraph::build(defs).unwrap(), 64)),
            store,
            LedgerRegistry::single(ledger.clone()),
            rewards,
            counters,
            EngineConfig::default(),
        ));
        let sink = Arc::new(CollectingSink::default());
        let scheduler = Scheduler::new(Arc::clone(&engine), sink.clone(), config);
        Fixture {
            scheduler,
            engine,
            ledger,
            sink,
        }
    }

    fn quiet() -> SchedulerConfig {
        SchedulerConfig {
            maintenance_interval_ticks: 0,
            summary_interval_ticks: 0,
            flush_interval_ticks: 0,
            ..SchedulerConfig::default()
        }
    }

    fn player(n: u128) -> EntityId {
        EntityId::from_u128(n)
    }

    async fn online_with_auto(f: &Fixture, entity: EntityId, types: &[&str], balance: u64) {
        f.engine.store().connect(entity).await;
        f.ledger.put(entity, &money(), Money(balance));
        for t in types {
            assert!(f.engine.set_auto_enabled(entity, t, true).await.unwrap());
        }
    }

    fn level(f: &Fixture, entity: EntityId, type_id: &str) -> u64 {
        f.engine
            .store()
            .get_cached(entity)
            .map(|s| s.level(type_id))
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn tick_advances_online_entities() {
        let f = fixture(standard_defs(), quiet());
        online_with_auto(&f, player(1), &["rankup"], 2150).await;
        online_with_auto(&f, player(2), &["rankup"], 1000).await;

        let report = f.scheduler.tick_once().await;
        assert_eq!(report.dispatched, 2);
        assert_eq!(level(&f, player(1), "rankup"), 2);
        assert_eq!(level(&f, player(2), "rankup"), 1);
    }

    #[tokio::test]
    async fn offline_entities_are_ignored() {
        let f = fixture(standard_defs(), quiet());
        f.ledger.put(player(1), &money(), Money(100_000));
        f.engine.set_auto_enabled(player(1), "rankup", true).await.unwrap();

        assert_eq!(f.scheduler.tick_once().await.dispatched, 0);
        assert_eq!(level(&f, player(1), "rankup"), 0);
    }

    #[tokio::test]
    async fn earliest_chain_link_goes_first() {
        let f = fixture(standard_defs(), quiet());
        online_with_auto(&f, player(1), &["rankup", "prestige"], 100_000).await;

        // Tick 1: rankup reaches its limit; prestige waits for the next tick.
        f.scheduler.tick_once().await;
        assert_eq!(level(&f, player(1), "rankup"), 5);
        assert_eq!(level(&f, player(1), "prestige"), 0);

        // Tick 2: rankup is at its limit (no ledger call), so prestige runs
        // and resets rankup.
        f.scheduler.tick_once().await;
        assert_eq!(level(&f, player(1), "prestige"), 1);
        assert_eq!(level(&f, player(1), "rankup"), 0);
    }

    #[tokio::test]
    async fn cooldown_spaces_attempts() {
        let mut defs = standard_defs();
        defs[0].auto_advance_delay_ticks = 3;
        let f = fixture(defs, quiet());
        online_with_auto(&f, player(1), &["rankup"], 500).await;

        assert_eq!(f.scheduler.tick_once().await.dispatched, 1);
        f.ledger.put(player(1), &money(), Money(100_000));
        let second = f.scheduler.tick_once().await;
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.cooling_down, 1);
        f.scheduler.tick_once().await;
        assert_eq!(f.scheduler.tick_once().await.dispatched, 1);
        assert_eq!(level(&f, player(1), "rankup"), 5);
    }

    #[tokio::test]
    async fn busy_entities_are_skipped() {
        let f = fixture(standard_defs(), quiet());
        online_with_auto(&f, player(1), &["rankup"], 100_000).await;
        let handle = f.engine.store().cached_handle(player(1)).unwrap();
        let guard = handle.try_begin_attempt().unwrap();

        let report = f.scheduler.tick_once().await;
        assert_eq!(report.skipped_busy, 1);
        assert_eq!(level(&f, player(1), "rankup"), 0);
        drop(guard);
    }

    #[tokio::test]
    async fn summary_drains_recorded_levels() {
        let config = SchedulerConfig {
            summary_interval_ticks: 2,
            ..quiet()
        };
        let f = fixture(standard_defs(), config);
        online_with_auto(&f, player(1), &["rankup"], 2150).await;

        f.scheduler.tick_once().await;
        assert_eq!(f.scheduler.pending_summary(player(1)), 2);
        let report = f.scheduler.tick_once().await;
        assert_eq!(report.summaries, 1);
        assert_eq!(f.scheduler.pending_summary(player(1)), 0);

        let reports = f.sink.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].levels, 2);
        assert!(reports[0].text.contains("rankup: +2"));
    }

    #[tokio::test]
    async fn summary_lines_use_display_names() {
        let mut defs = standard_defs();
        defs[0].display_name = "Rank".into();
        let config = SchedulerConfig {
            summary_interval_ticks: 1,
            ..quiet()
        };
        let f = fixture(defs, config);
        online_with_auto(&f, player(1), &["rankup"], 2150).await;

        f.scheduler.tick_once().await;

        let reports = f.sink.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].text.contains("Rank: +2"));
        assert!(!reports[0].text.contains("rankup"));
    }

    #[tokio::test]
    async fn flush_runs_on_schedule() {
        let config = SchedulerConfig {
            flush_interval_ticks: 1,
            ..quiet()
        };
        let f = fixture(standard_defs(), config);
        online_with_auto(&f, player(1), &["rankup"], 1000).await;

        let report = f.scheduler.tick_once().await;
        assert_eq!(report.flushed.map(|r| r.saved), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let config = SchedulerConfig {
            tick_interval: Duration::from_millis(100),
            ..quiet()
        };
        let f = fixture(standard_defs(), config);
        online_with_auto(&f, player(1), &["rankup"], 100_000).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let scheduler = f.scheduler.clone();
        let running = tokio::spawn(async move {
            scheduler
                .run(async {
                    let _ = rx.await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(()).unwrap();
        running.await.unwrap();

        assert!(f.scheduler.current_tick() >= 3);
        assert_eq!(level(&f, player(1), "rankup"), 5);
    }
}
