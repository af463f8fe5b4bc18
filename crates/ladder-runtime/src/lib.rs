//! Async runtime for the Ladder progression economy.
//!
//! The pure model lives in `ladder-core`. This crate adds everything that
//! waits on something:
//!
//! - [`ledger`] and [`persistence`]: the seams to the external currency
//!   ledger and state storage, with in-memory and file-backed
//!   implementations.
//! - [`store`]: the per-entity state cache with single-flight loads,
//!   TTL eviction and the per-entity exclusion lock.
//! - [`rewards`]: rate-limited dispatch of resolved reward actions.
//! - [`engine`]: the single-step, buy-max and auto-repeat protocols.
//! - [`scheduler`]: the periodic driver for auto-advance and housekeeping.
//! - [`service`]: wiring, reload and shutdown.

pub mod engine;
pub mod ledger;
pub mod persistence;
pub mod rewards;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::{
    AdvancementEngine, Advancement, AutoOutcome, Catalog, CommandOutcome, EngineConfig,
    EngineError, Outcome, RejectReason, Requirement,
};
pub use ledger::{Ledger, LedgerError, LedgerRegistry, MemoryLedger};
pub use persistence::{FilePersistence, MemoryPersistence, Persistence, StorageError};
pub use rewards::{LogExecutor, RewardBatcher, RewardError, RewardExecutor};
pub use scheduler::{LogSummarySink, Scheduler, SchedulerConfig, SummaryReport, SummarySink, TickReport};
pub use service::{Collaborators, LadderService, ReloadReport};
pub use store::{EntityHandle, EntityStateStore, FlushReport, StateView, StoreConfig};
