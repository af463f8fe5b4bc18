//! Instrumented seam implementations for unit tests, integration tests,
//! and the demo's failure drills.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ladder_core::id::{CurrencyId, EntityId};
use ladder_core::money::Money;
use ladder_core::reward::RewardAction;
use ladder_core::state::EntityProgressionState;

use crate::ledger::{Ledger, LedgerError, MemoryLedger};
use crate::persistence::{MemoryPersistence, Persistence, StorageError};
use crate::rewards::{RewardError, RewardExecutor};

// ===========================================================================
// Persistence
// ===========================================================================

/// [`MemoryPersistence`] that counts calls, can stall loads, and can be
/// told to fail.
#[derive(Debug, Default)]
pub struct CountingPersistence {
    inner: MemoryPersistence,
    load_delay: Duration,
    save_delay: Duration,
    loads: AtomicUsize,
    saves: AtomicUsize,
    claim_saves: AtomicUsize,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl CountingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Hold every full-state save open for `delay` before it resolves.
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Successful full-state saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn claim_saves(&self) -> usize {
        self.claim_saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Store a state directly, as if saved in an earlier session.
    pub fn seed(&self, state: EntityProgressionState) {
        self.inner.insert(state);
    }

    pub fn stored(&self, entity: EntityId) -> Option<EntityProgressionState> {
        self.inner.stored(entity)
    }
}

#[async_trait]
impl Persistence for CountingPersistence {
    async fn load(&self, entity: EntityId) -> Result<Option<EntityProgressionState>, StorageError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected load failure".into()));
        }
        self.inner.load(entity).await
    }

    async fn save(&self, state: &EntityProgressionState) -> Result<(), StorageError> {
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected save failure".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(state).await
    }

    async fn load_claimed_rewards(&self, entity: EntityId) -> Result<BTreeSet<String>, StorageError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected load failure".into()));
        }
        self.inner.load_claimed_rewards(entity).await
    }

    async fn save_claimed_reward(&self, entity: EntityId, key: &str) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected save failure".into()));
        }
        self.claim_saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_claimed_reward(entity, key).await
    }
}

// ===========================================================================
// Ledger
// ===========================================================================

/// Every call made against a [`ScriptedLedger`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Has(Money),
    Withdraw(Money),
    Deposit(Money),
    Set(CurrencyId, Money),
    Balance,
}

/// [`MemoryLedger`] that records calls and can decline withdrawals, fail
/// outright, or stall.
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    inner: MemoryLedger,
    calls: Mutex<Vec<LedgerCall>>,
    decline_withdrawals: AtomicBool,
    unavailable: AtomicBool,
    delay: Mutex<Duration>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, entity: EntityId, currency: &CurrencyId, amount: Money) {
        self.inner.put(entity, currency, amount);
    }

    pub fn peek(&self, entity: EntityId, currency: &CurrencyId) -> Money {
        self.inner.peek(entity, currency)
    }

    /// `withdraw` answers `Ok(false)` while set, even when funds suffice.
    pub fn set_decline_withdrawals(&self, decline: bool) {
        self.decline_withdrawals.store(decline, Ordering::SeqCst);
    }

    /// Every call answers `Err(Unavailable)` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stall every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Amounts of every withdrawal attempted.
    pub fn withdrawals(&self) -> Vec<Money> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LedgerCall::Withdraw(amount) => Some(amount),
                _ => None,
            })
            .collect()
    }

    async fn enter(&self, call: LedgerCall) -> Result<(), LedgerError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("injected ledger outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for ScriptedLedger {
    async fn has(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<bool, LedgerError> {
        self.enter(LedgerCall::Has(amount)).await?;
        self.inner.has(entity, currency, amount).await
    }

    async fn withdraw(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<bool, LedgerError> {
        self.enter(LedgerCall::Withdraw(amount)).await?;
        if self.decline_withdrawals.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.withdraw(entity, currency, amount).await
    }

    async fn deposit(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.enter(LedgerCall::Deposit(amount)).await?;
        self.inner.deposit(entity, currency, amount).await
    }

    async fn set(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.enter(LedgerCall::Set(currency.clone(), amount)).await?;
        self.inner.set(entity, currency, amount).await
    }

    async fn balance(&self, entity: EntityId, currency: &CurrencyId) -> Result<Money, LedgerError> {
        self.enter(LedgerCall::Balance).await?;
        self.inner.balance(entity, currency).await
    }
}

// ===========================================================================
// Rewards
// ===========================================================================

/// Executor that records what it ran. Fails on one configured command.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    seen: Mutex<Vec<(EntityId, RewardAction)>>,
    fail_on: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(command: impl Into<String>) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(command.into()),
        }
    }

    pub fn actions(&self) -> Vec<(EntityId, RewardAction)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.actions().into_iter().map(|(_, a)| a.command).collect()
    }
}

#[async_trait]
impl RewardExecutor for RecordingExecutor {
    async fn execute(&self, entity: EntityId, action: &RewardAction) -> Result<(), RewardError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((entity, action.clone()));
        if self.fail_on.as_deref() == Some(action.command.as_str()) {
            return Err(RewardError::Failed(format!("refused '{}'", action.command)));
        }
        Ok(())
    }
}
