//! Cache of per-entity progression state in front of [`Persistence`].
//!
//! The store owns every cached [`EntityProgressionState`]. Callers get an
//! [`EntityHandle`], which also carries the entity's exclusion lock: state
//! is only mutated while an [`AttemptGuard`] for that entity is held.
//!
//! Loads are single-flight. Concurrent callers for an uncached entity share
//! one in-flight load, and a failed load degrades to the default state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use ladder_core::id::EntityId;
use ladder_core::state::EntityProgressionState;
use ladder_data::RuntimeSettings;
use ladder_stats::PerfCounters;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::persistence::{Persistence, StorageError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

struct EntityEntry {
    entity: EntityId,
    state: Mutex<EntityProgressionState>,
    attempt: Arc<tokio::sync::Mutex<()>>,
    touched: Mutex<Instant>,
    dirty: AtomicBool,
    evicted: AtomicBool,
    /// Flushes currently writing this entry. Eviction waits for zero.
    saving: AtomicUsize,
}

/// Shared reference to one cached entity.
#[derive(Clone)]
pub struct EntityHandle(Arc<EntityEntry>);

/// Proof that the holder owns the entity's exclusion lock.
pub struct AttemptGuard {
    entity: EntityId,
    _lock: OwnedMutexGuard<()>,
}

impl AttemptGuard {
    pub fn entity(&self) -> EntityId {
        self.entity
    }
}

impl EntityHandle {
    fn new(state: EntityProgressionState) -> Self {
        Self(Arc::new(EntityEntry {
            entity: state.entity,
            state: Mutex::new(state),
            attempt: Arc::new(tokio::sync::Mutex::new(())),
            touched: Mutex::new(Instant::now()),
            dirty: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            saving: AtomicUsize::new(0),
        }))
    }

    pub fn entity(&self) -> EntityId {
        self.0.entity
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> EntityProgressionState {
        lock(&self.0.state).clone()
    }

    /// Read the state without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&EntityProgressionState) -> R) -> R {
        f(&lock(&self.0.state))
    }

    /// Mutate the state. Requires the entity's attempt guard.
    pub fn mutate<R>(
        &self,
        guard: &AttemptGuard,
        f: impl FnOnce(&mut EntityProgressionState) -> R,
    ) -> R {
        debug_assert_eq!(guard.entity, self.0.entity, "guard belongs to another entity");
        let out = f(&mut lock(&self.0.state));
        self.0.dirty.store(true, Ordering::Release);
        self.touch();
        out
    }

    /// The exclusion lock, or `None` while another attempt holds it.
    pub fn try_begin_attempt(&self) -> Option<AttemptGuard> {
        let lock = Arc::clone(&self.0.attempt).try_lock_owned().ok()?;
        Some(AttemptGuard {
            entity: self.0.entity,
            _lock: lock,
        })
    }

    /// Wait for the exclusion lock.
    pub async fn begin_attempt(&self) -> AttemptGuard {
        let lock = Arc::clone(&self.0.attempt).lock_owned().await;
        AttemptGuard {
            entity: self.0.entity,
            _lock: lock,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.0.attempt.try_lock().is_err()
    }

    /// True once the entry has been saved and dropped from the cache.
    /// Mutations through an evicted handle would be lost.
    pub fn is_evicted(&self) -> bool {
        self.0.evicted.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *lock(&self.0.touched) = Instant::now();
    }

    fn touched(&self) -> Instant {
        *lock(&self.0.touched)
    }

    fn replace(&self, state: EntityProgressionState) {
        *lock(&self.0.state) = state;
        self.0.dirty.store(true, Ordering::Release);
        self.touch();
    }

    fn take_dirty(&self) -> bool {
        self.0.dirty.swap(false, Ordering::AcqRel)
    }

    fn mark_dirty(&self) {
        self.0.dirty.store(true, Ordering::Release);
    }

    fn mark_evicted(&self) {
        self.0.evicted.store(true, Ordering::Release);
    }

    fn begin_save(&self) {
        self.0.saving.fetch_add(1, Ordering::AcqRel);
    }

    fn end_save(&self) {
        self.0.saving.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_saving(&self) -> bool {
        self.0.saving.load(Ordering::Acquire) > 0
    }
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("entity", &self.0.entity)
            .field("dirty", &self.is_dirty())
            .field("evicted", &self.is_evicted())
            .finish()
    }
}

/// State handed to readers that must not wait for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateView {
    pub state: EntityProgressionState,
    /// False for the default placeholder served while a load is pending.
    pub loaded: bool,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of [`EntityStateStore::save_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
    /// Cached entries with nothing new to write.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub cached: usize,
    pub online: usize,
    pub loading: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub ttl: Duration,
    /// 0 means unbounded.
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_entries: 0,
        }
    }
}

impl StoreConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            ttl: settings.cache_ttl(),
            max_entries: settings.max_cached_entities,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

type PendingLoad = Shared<BoxFuture<'static, EntityHandle>>;

struct StoreInner {
    persistence: Arc<dyn Persistence>,
    entries: Mutex<HashMap<EntityId, EntityHandle>>,
    loading: Mutex<HashMap<EntityId, PendingLoad>>,
    online: Mutex<HashSet<EntityId>>,
    /// Bumped by `clear`; loads started before it are discarded.
    generation: AtomicU64,
    config: StoreConfig,
    counters: Arc<PerfCounters>,
}

/// Cloneable handle to the shared cache.
#[derive(Clone)]
pub struct EntityStateStore {
    inner: Arc<StoreInner>,
}

impl EntityStateStore {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        config: StoreConfig,
        counters: Arc<PerfCounters>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                persistence,
                entries: Mutex::new(HashMap::new()),
                loading: Mutex::new(HashMap::new()),
                online: Mutex::new(HashSet::new()),
                generation: AtomicU64::new(0),
                config,
                counters,
            }),
        }
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    // -- Reads --

    /// Cached state, if any. Never touches storage.
    pub fn get_cached(&self, entity: EntityId) -> Option<EntityProgressionState> {
        self.cached_handle(entity).map(|h| h.snapshot())
    }

    pub fn cached_handle(&self, entity: EntityId) -> Option<EntityHandle> {
        lock(&self.inner.entries).get(&entity).cloned()
    }

    /// Cached state, or the default placeholder while a background load
    /// fills the cache. Never waits on storage.
    pub fn snapshot_or_default(&self, entity: EntityId) -> StateView {
        if let Some(handle) = self.cached_handle(entity) {
            return StateView {
                state: handle.snapshot(),
                loaded: true,
            };
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let store = self.clone();
                rt.spawn(async move {
                    store.get_or_load(entity).await;
                });
            }
            Err(_) => debug!(entity = %entity, "no runtime for background load"),
        }
        StateView {
            state: EntityProgressionState::new(entity),
            loaded: false,
        }
    }

    /// Cached handle, loading it first if needed. Concurrent callers for
    /// the same entity share a single backing load.
    pub async fn get_or_load(&self, entity: EntityId) -> EntityHandle {
        if let Some(handle) = self.cached_handle(entity) {
            handle.touch();
            self.inner.counters.cache_lookup(true);
            return handle;
        }

        let pending = {
            let mut loading = lock(&self.inner.loading);
            // A load may have completed between the check above and here.
            if let Some(handle) = self.cached_handle(entity) {
                self.inner.counters.cache_lookup(true);
                return handle;
            }
            match loading.get(&entity) {
                Some(pending) => pending.clone(),
                None => {
                    self.inner.counters.cache_lookup(false);
                    let generation = self.inner.generation.load(Ordering::Acquire);
                    let pending = self.clone().load(entity, generation).boxed().shared();
                    loading.insert(entity, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn load(self, entity: EntityId, generation: u64) -> EntityHandle {
        let persistence = &self.inner.persistence;
        let mut state = match persistence.load(entity).await {
            Ok(found) => {
                self.inner.counters.load(true);
                found.unwrap_or_else(|| EntityProgressionState::new(entity))
            }
            Err(e) => {
                self.inner.counters.load(false);
                error!(entity = %entity, error = %e, "state load failed, using default state");
                EntityProgressionState::new(entity)
            }
        };
        match persistence.load_claimed_rewards(entity).await {
            Ok(keys) => {
                for key in keys {
                    state.claim(key);
                }
            }
            Err(e) => error!(entity = %entity, error = %e, "claimed reward load failed"),
        }

        let mut entries = lock(&self.inner.entries);
        if self.inner.generation.load(Ordering::Acquire) != generation {
            // The cache was cleared while this load ran.
            drop(entries);
            debug!(entity = %entity, "discarding load that outlived a clear");
            let handle = EntityHandle::new(state);
            handle.mark_evicted();
            return handle;
        }
        let handle = entries
            .entry(entity)
            .or_insert_with(|| EntityHandle::new(state))
            .clone();
        drop(entries);
        lock(&self.inner.loading).remove(&entity);
        handle
    }

    // -- Writes --

    /// Insert or replace the cached state for `state.entity`.
    pub fn put(&self, state: EntityProgressionState) -> EntityHandle {
        let mut entries = lock(&self.inner.entries);
        match entries.get(&state.entity) {
            Some(handle) => {
                handle.replace(state);
                handle.clone()
            }
            None => {
                let handle = EntityHandle::new(state);
                handle.mark_dirty();
                entries.insert(handle.entity(), handle.clone());
                handle
            }
        }
    }

    // -- Liveness --

    /// Mark the entity online and make sure its state is loaded.
    pub async fn connect(&self, entity: EntityId) -> EntityHandle {
        lock(&self.inner.online).insert(entity);
        self.get_or_load(entity).await
    }

    pub fn is_online(&self, entity: EntityId) -> bool {
        lock(&self.inner.online).contains(&entity)
    }

    /// Online entities, sorted for deterministic sweeps.
    pub fn online(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = lock(&self.inner.online).iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Mark the entity offline, let any in-flight load or attempt settle,
    /// then save and evict. A failed save keeps the entry cached for the
    /// next flush.
    pub async fn disconnect(&self, entity: EntityId) -> Result<(), StorageError> {
        lock(&self.inner.online).remove(&entity);

        let pending = lock(&self.inner.loading).get(&entity).cloned();
        if let Some(pending) = pending {
            pending.await;
        }
        let Some(handle) = self.cached_handle(entity) else {
            return Ok(());
        };

        let _guard = handle.begin_attempt().await;
        if self.is_online(entity) {
            debug!(entity = %entity, "reconnected during disconnect, keeping state");
            return Ok(());
        }
        let snapshot = handle.snapshot();
        match self.inner.persistence.save(&snapshot).await {
            Ok(()) => {
                self.inner.counters.save(true);
                handle.take_dirty();
                if !self.remove_entry(&handle) {
                    debug!(entity = %entity, "flush in progress, leaving state for the eviction sweep");
                }
                Ok(())
            }
            Err(e) => {
                self.inner.counters.save(false);
                error!(entity = %entity, error = %e, "save on disconnect failed, keeping state cached");
                Err(e)
            }
        }
    }

    /// Drop the entry unless a flush is writing it. Flushes mark entries
    /// under the same lock, so a removed entry is never mid-save.
    fn remove_entry(&self, handle: &EntityHandle) -> bool {
        let mut entries = lock(&self.inner.entries);
        if handle.is_saving() {
            return false;
        }
        handle.mark_evicted();
        if let Some(current) = entries.get(&handle.entity())
            && Arc::ptr_eq(&current.0, &handle.0)
        {
            entries.remove(&handle.entity());
        }
        true
    }

    // -- Maintenance --

    /// Evict entries idle past the TTL, then the oldest entries beyond the
    /// configured maximum. Online and busy entities are never evicted.
    /// Dirty entries are saved first; a failed save keeps the entry.
    /// Returns the number of entries evicted.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let online = lock(&self.inner.online).clone();
        let (total, mut candidates) = {
            let entries = lock(&self.inner.entries);
            let candidates: Vec<EntityHandle> = entries
                .values()
                .filter(|h| !online.contains(&h.entity()))
                .cloned()
                .collect();
            (entries.len(), candidates)
        };
        candidates.sort_by_key(|h| (h.touched(), h.entity()));

        let ttl = self.inner.config.ttl;
        let mut excess = match self.inner.config.max_entries {
            0 => 0,
            max => total.saturating_sub(max),
        };
        let mut victims = Vec::new();
        for handle in candidates {
            let expired = now.saturating_duration_since(handle.touched()) >= ttl;
            if (!expired && excess == 0) || handle.is_saving() {
                continue;
            }
            let Some(guard) = handle.try_begin_attempt() else {
                continue;
            };
            excess = excess.saturating_sub(1);
            victims.push((handle, guard));
        }
        if victims.is_empty() {
            return 0;
        }

        let persistence = &self.inner.persistence;
        let results = join_all(victims.into_iter().map(|(handle, guard)| async move {
            let result = if handle.take_dirty() {
                persistence.save(&handle.snapshot()).await.map(|()| true)
            } else {
                Ok(false)
            };
            (handle, guard, result)
        }))
        .await;

        let mut evicted = 0;
        for (handle, _guard, result) in results {
            match result {
                Ok(saved) => {
                    if saved {
                        self.inner.counters.save(true);
                    }
                    if self.is_online(handle.entity()) || !self.remove_entry(&handle) {
                        continue;
                    }
                    evicted += 1;
                }
                Err(e) => {
                    self.inner.counters.save(false);
                    handle.mark_dirty();
                    error!(entity = %handle.entity(), error = %e, "save before eviction failed, keeping state cached");
                }
            }
        }
        if evicted > 0 {
            debug!(evicted, "evicted idle entity states");
        }
        evicted
    }

    /// Save every dirty cached entry concurrently. Failed saves stay dirty
    /// and are retried by the next flush.
    pub async fn save_all(&self) -> FlushReport {
        let handles: Vec<EntityHandle> = lock(&self.inner.entries)
            .values()
            .inspect(|h| h.begin_save())
            .cloned()
            .collect();
        let mut report = FlushReport::default();
        let mut dirty = Vec::with_capacity(handles.len());
        for handle in handles {
            if handle.take_dirty() {
                dirty.push(handle);
            } else {
                handle.end_save();
                report.skipped += 1;
            }
        }

        let persistence = &self.inner.persistence;
        let results = join_all(dirty.into_iter().map(|handle| async move {
            let result = persistence.save(&handle.snapshot()).await;
            (handle, result)
        }))
        .await;

        for (handle, result) in results {
            match result {
                Ok(()) => {
                    self.inner.counters.save(true);
                    report.saved += 1;
                }
                Err(e) => {
                    self.inner.counters.save(false);
                    handle.mark_dirty();
                    report.failed += 1;
                    error!(entity = %handle.entity(), error = %e, "state save failed, will retry on next flush");
                }
            }
            handle.end_save();
        }
        if report.failed > 0 {
            warn!(saved = report.saved, failed = report.failed, "flush incomplete");
        }
        report
    }

    /// Drop every cached entry without saving.
    pub fn clear(&self) {
        let mut entries = lock(&self.inner.entries);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        for handle in entries.drain().map(|(_, h)| h) {
            handle.mark_evicted();
        }
        drop(entries);
        lock(&self.inner.loading).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            cached: self.len(),
            online: lock(&self.inner.online).len(),
            loading: lock(&self.inner.loading).len(),
        }
    }
}

impl std::fmt::Debug for EntityStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStateStore")
            .field("stats", &self.stats())
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
    use crate::test_utils::CountingPersistence;

    fn entity(n: u128) -> EntityId {
        EntityId::from_u128(n)
    }

    fn store_with(persistence: Arc<CountingPersistence>, config: StoreConfig) -> EntityStateStore {
        EntityStateStore::new(persistence, config, Arc::new(PerfCounters::new()))
    }

    fn leveled(n: u128, level: u64) -> EntityProgressionState {
        let mut state = EntityProgressionState::new(entity(n));
        state.set_level_clamped("rankup", level, 5);
        state
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_loads_share_one_backing_load() {
        let persistence = Arc::new(CountingPersistence::new().with_load_delay(Duration::from_millis(50)));
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());

        let handles = join_all((0..10).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.get_or_load(entity(1)).await })
        }))
        .await;

        assert_eq!(handles.len(), 10);
        assert_eq!(persistence.loads(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn load_failure_yields_default_state() {
        let persistence = Arc::new(CountingPersistence::new());
        persistence.set_fail_loads(true);
        let counters = Arc::new(PerfCounters::new());
        let store = EntityStateStore::new(
            persistence.clone(),
            StoreConfig::default(),
            Arc::clone(&counters),
        );

        let handle = store.get_or_load(entity(1)).await;
        assert!(handle.snapshot().is_default());
        assert_eq!(counters.snapshot().load_failures, 1);
    }

    #[tokio::test]
    async fn placeholder_then_refined_state() {
        let persistence = Arc::new(CountingPersistence::new().with_load_delay(Duration::from_millis(20)));
        persistence.seed(leveled(1, 3));
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());

        let view = store.snapshot_or_default(entity(1));
        assert!(!view.loaded);
        assert_eq!(view.state.level("rankup"), 0);

        // Joins the load the placeholder kicked off.
        let handle = store.get_or_load(entity(1)).await;
        assert_eq!(handle.snapshot().level("rankup"), 3);
        assert_eq!(persistence.loads(), 1);

        let view = store.snapshot_or_default(entity(1));
        assert!(view.loaded);
        assert_eq!(view.state.level("rankup"), 3);
    }

    #[tokio::test]
    async fn claimed_rewards_merged_on_load() {
        let persistence = Arc::new(CountingPersistence::new());
        persistence.save_claimed_reward(entity(1), "rankup:5").await.unwrap();
        let store = store_with(persistence, StoreConfig::default());

        let handle = store.get_or_load(entity(1)).await;
        assert!(handle.snapshot().has_claimed("rankup:5"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_load_in_flight() {
        let persistence = Arc::new(CountingPersistence::new().with_load_delay(Duration::from_secs(1)));
        persistence.seed(leveled(1, 3));
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());

        let loading = {
            let store = store.clone();
            tokio::spawn(async move { store.get_or_load(entity(1)).await })
        };
        tokio::task::yield_now().await;
        store.clear();

        let stale = loading.await.unwrap();
        assert!(stale.is_evicted());
        assert_eq!(store.len(), 0);
        assert!(store.get_cached(entity(1)).is_none());

        let fresh = store.get_or_load(entity(1)).await;
        assert!(!fresh.is_evicted());
        assert_eq!(fresh.snapshot().level("rankup"), 3);
        assert_eq!(persistence.loads(), 2);
        assert_eq!(store.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn ttl_eviction_skips_online_entities() {
        let persistence = Arc::new(CountingPersistence::new());
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());

        store.put(leveled(1, 2));
        store.connect(entity(2)).await;
        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get_cached(entity(1)).is_none());
        assert!(store.get_cached(entity(2)).is_some());
        assert_eq!(persistence.stored(entity(1)).map(|s| s.level("rankup")), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn max_entries_evicts_oldest_first() {
        let persistence = Arc::new(CountingPersistence::new());
        let store = store_with(
            persistence,
            StoreConfig {
                ttl: Duration::from_secs(3600),
                max_entries: 2,
            },
        );
        for n in 1..=3 {
            store.put(leveled(n, 1));
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get_cached(entity(1)).is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_entity_is_not_evicted() {
        let persistence = Arc::new(CountingPersistence::new());
        let store = store_with(persistence, StoreConfig::default());
        let handle = store.put(leveled(1, 1));
        let _guard = handle.try_begin_attempt().unwrap();
        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_keeps_entry() {
        let persistence = Arc::new(CountingPersistence::new());
        persistence.set_fail_saves(true);
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());
        store.put(leveled(1, 4));
        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        assert_eq!(store.evict_expired().await, 0);
        let handle = store.cached_handle(entity(1)).unwrap();
        assert!(handle.is_dirty());
        assert!(!handle.is_evicted());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_waits_for_flush_in_progress() {
        let persistence = Arc::new(CountingPersistence::new().with_save_delay(Duration::from_secs(1)));
        persistence.set_fail_saves(true);
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());
        store.put(leveled(1, 4));
        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        let flushing = {
            let store = store.clone();
            tokio::spawn(async move { store.save_all().await })
        };
        tokio::task::yield_now().await;

        // The flush has taken the dirty flag; the entry must stay cached.
        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(flushing.await.unwrap().failed, 1);

        let handle = store.cached_handle(entity(1)).unwrap();
        assert!(handle.is_dirty());
        assert!(!handle.is_evicted());

        persistence.set_fail_saves(false);
        assert_eq!(store.save_all().await.saved, 1);
        assert_eq!(persistence.stored(entity(1)).map(|s| s.level("rankup")), Some(4));

        // Clean and idle now, so the next sweep drops it.
        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get_cached(entity(1)).is_none());
    }

    // -----------------------------------------------------------------------
    // Flush and disconnect
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn save_all_writes_only_dirty_entries() {
        let persistence = Arc::new(CountingPersistence::new());
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());
        store.put(leveled(1, 1));
        store.put(leveled(2, 2));
        store.get_or_load(entity(3)).await;

        let report = store.save_all().await;
        assert_eq!(
            report,
            FlushReport {
                saved: 2,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(store.save_all().await.saved, 0);
    }

    #[tokio::test]
    async fn failed_flush_retries_next_time() {
        let persistence = Arc::new(CountingPersistence::new());
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());
        store.put(leveled(1, 1));

        persistence.set_fail_saves(true);
        assert_eq!(store.save_all().await.failed, 1);
        persistence.set_fail_saves(false);
        assert_eq!(store.save_all().await.saved, 1);
        assert!(persistence.stored(entity(1)).is_some());
    }

    #[tokio::test]
    async fn disconnect_waits_for_attempt_then_saves() {
        let persistence = Arc::new(CountingPersistence::new());
        let store = store_with(Arc::clone(&persistence), StoreConfig::default());
        let handle = store.connect(entity(1)).await;
        let guard = handle.begin_attempt().await;

        let disconnecting = {
            let store = store.clone();
            tokio::spawn(async move { store.disconnect(entity(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!disconnecting.is_finished());
        assert!(store.get_cached(entity(1)).is_some());

        handle.mutate(&guard, |s| s.set_level_clamped("rankup", 4, 5));
        drop(guard);
        disconnecting.await.unwrap().unwrap();

        assert!(store.get_cached(entity(1)).is_none());
        assert!(handle.is_evicted());
        assert_eq!(persistence.stored(entity(1)).map(|s| s.level("rankup")), Some(4));
    }

    #[tokio::test]
    async fn try_begin_attempt_is_exclusive() {
        let store = store_with(Arc::new(CountingPersistence::new()), StoreConfig::default());
        let handle = store.get_or_load(entity(1)).await;
        let guard = handle.try_begin_attempt();
        assert!(guard.is_some());
        assert!(handle.is_busy());
        assert!(handle.try_begin_attempt().is_none());
        drop(guard);
        assert!(handle.try_begin_attempt().is_some());
    }
}
