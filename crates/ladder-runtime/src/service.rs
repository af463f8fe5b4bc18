//! Wiring: builds every component from definitions, settings and the
//! external collaborators, and owns reload and shutdown.

use std::path::Path;
use std::sync::Arc;

use ladder_core::chain::{ChainError, ChainGraph};
use ladder_core::id::EntityId;
use ladder_core::progression::ProgressionType;
use ladder_data::{DataLoadError, RuntimeSettings, load_ladder_data};
use ladder_stats::{PerfCounters, PerfSnapshot};
use tracing::{error, info, warn};

use crate::engine::{AdvancementEngine, Catalog, EngineConfig};
use crate::ledger::LedgerRegistry;
use crate::persistence::{Persistence, StorageError};
use crate::rewards::{RewardBatcher, RewardExecutor};
use crate::scheduler::{Scheduler, SchedulerConfig, SummarySink};
use crate::store::{EntityHandle, EntityStateStore, FlushReport, StoreConfig};

/// The systems the runtime talks to but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub ledgers: LedgerRegistry,
    pub persistence: Arc<dyn Persistence>,
    pub executor: Arc<dyn RewardExecutor>,
    pub sink: Arc<dyn SummarySink>,
}

/// Outcome of building a chain from definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Types active after the reload.
    pub active: usize,
    pub errors: Vec<ChainError>,
    /// True when nothing valid was left and the previous chain was kept.
    pub kept_prior: bool,
}

pub struct LadderService {
    engine: Arc<AdvancementEngine>,
    scheduler: Scheduler,
    settings: RuntimeSettings,
    counters: Arc<PerfCounters>,
}

impl LadderService {
    /// Build every component. Must run inside a tokio runtime: the reward
    /// batcher task is spawned here. Offending definitions are left out and
    /// reported; the rest start normally.
    pub fn start(
        defs: Vec<ProgressionType>,
        settings: RuntimeSettings,
        collaborators: Collaborators,
    ) -> (Self, ReloadReport) {
        let (chain, errors) = ChainGraph::rebuild(defs, None);
        log_chain_errors(&errors);
        let report = ReloadReport {
            active: chain.len(),
            errors,
            kept_prior: false,
        };

        let counters = Arc::new(PerfCounters::new());
        let store = EntityStateStore::new(
            collaborators.persistence,
            StoreConfig::from_settings(&settings),
            Arc::clone(&counters),
        );
        let rewards = RewardBatcher::spawn(
            collaborators.executor,
            settings.reward_batch_size,
            settings.reward_batch_delay(),
            Arc::clone(&counters),
        );
        let engine = Arc::new(AdvancementEngine::new(
            Arc::new(Catalog::new(chain, settings.cost_cache_capacity)),
            store,
            collaborators.ledgers,
            rewards,
            Arc::clone(&counters),
            EngineConfig::from_settings(&settings),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&engine),
            collaborators.sink,
            SchedulerConfig::from_settings(&settings),
        );

        info!(
            types = report.active,
            rejected = report.errors.len(),
            order = ?engine.catalog().chain.summary().order,
            "ladder service started"
        );
        (
            Self {
                engine,
                scheduler,
                settings,
                counters,
            },
            report,
        )
    }

    pub fn engine(&self) -> &Arc<AdvancementEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &EntityStateStore {
        self.engine.store()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn stats(&self) -> PerfSnapshot {
        self.counters.snapshot()
    }

    // -- Reload --

    /// Replace the definitions wholesale. Offending types are rejected; a
    /// rejected id with a valid previous definition keeps that definition.
    /// Price caches start empty.
    pub fn reload(&self, defs: Vec<ProgressionType>) -> ReloadReport {
        let prior = self.engine.catalog();
        let (chain, errors) = ChainGraph::rebuild(defs, Some(&prior.chain));
        log_chain_errors(&errors);

        if chain.is_empty() && !prior.chain.is_empty() && !errors.is_empty() {
            error!(
                errors = errors.len(),
                "reload produced no valid progression types, keeping the previous chain"
            );
            return ReloadReport {
                active: prior.chain.len(),
                errors,
                kept_prior: true,
            };
        }

        let active = chain.len();
        self.engine.install_catalog(Arc::new(Catalog::new(
            chain,
            self.settings.cost_cache_capacity,
        )));
        info!(types = active, rejected = errors.len(), "progression types reloaded");
        ReloadReport {
            active,
            errors,
            kept_prior: false,
        }
    }

    /// Reload progression definitions from a data directory. Runtime
    /// settings are read at start only.
    pub fn reload_from_dir(&self, dir: &Path) -> Result<ReloadReport, DataLoadError> {
        let data = load_ladder_data(dir)?;
        if data.settings != self.settings {
            warn!("runtime settings changed on disk; they apply on restart");
        }
        Ok(self.reload(data.progressions))
    }

    // -- Entity lifecycle --

    pub async fn connect(&self, entity: EntityId) -> EntityHandle {
        self.store().connect(entity).await
    }

    pub async fn disconnect(&self, entity: EntityId) -> Result<(), StorageError> {
        self.store().disconnect(entity).await
    }

    /// Save every cached state and drain queued rewards.
    pub async fn shutdown(&self) -> FlushReport {
        let report = self.store().save_all().await;
        self.engine.rewards().shutdown().await;
        info!(
            saved = report.saved,
            failed = report.failed,
            stats = %self.stats(),
            "ladder service stopped"
        );
        report
    }
}

impl std::fmt::Debug for LadderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LadderService")
            .field("engine", &self.engine)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

fn log_chain_errors(errors: &[ChainError]) {
    for e in errors {
        error!(types = ?e.implicated(), "{e}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
