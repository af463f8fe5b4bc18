//! External currency ledger seam.
//!
//! The engine never assumes atomicity across `has` and `withdraw`: a funds
//! check that passes followed by a withdrawal that fails is reported as an
//! anomaly, not retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ladder_core::id::{CurrencyId, EntityId};
use ladder_core::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("no ledger registered for currency '{0}'")]
    UnknownCurrency(CurrencyId),
}

/// Async balance store for one or more currencies.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn has(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<bool, LedgerError>;

    /// Remove `amount`. `Ok(false)` when the ledger declined.
    async fn withdraw(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<bool, LedgerError>;

    async fn deposit(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<(), LedgerError>;

    async fn set(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<(), LedgerError>;

    async fn balance(&self, entity: EntityId, currency: &CurrencyId) -> Result<Money, LedgerError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Currency → ledger routing, with an optional catch-all.
#[derive(Clone, Default)]
pub struct LedgerRegistry {
    ledgers: HashMap<CurrencyId, Arc<dyn Ledger>>,
    fallback: Option<Arc<dyn Ledger>>,
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every currency to one ledger.
    pub fn single(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledgers: HashMap::new(),
            fallback: Some(ledger),
        }
    }

    pub fn register(&mut self, currency: CurrencyId, ledger: Arc<dyn Ledger>) {
        self.ledgers.insert(currency, ledger);
    }

    pub fn with(mut self, currency: CurrencyId, ledger: Arc<dyn Ledger>) -> Self {
        self.register(currency, ledger);
        self
    }

    pub fn resolve(&self, currency: &CurrencyId) -> Result<Arc<dyn Ledger>, LedgerError> {
        self.ledgers
            .get(currency)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| LedgerError::UnknownCurrency(currency.clone()))
    }
}

impl std::fmt::Debug for LedgerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut currencies: Vec<_> = self.ledgers.keys().map(CurrencyId::as_str).collect();
        currencies.sort_unstable();
        f.debug_struct("LedgerRegistry")
            .field("currencies", &currencies)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

/// Balances held in process memory. Reference implementation for the demo
/// and tests.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<(EntityId, CurrencyId), Money>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance without going through the async seam.
    pub fn peek(&self, entity: EntityId, currency: &CurrencyId) -> Money {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(entity, currency.clone()))
            .copied()
            .unwrap_or(Money::ZERO)
    }

    pub fn put(&self, entity: EntityId, currency: &CurrencyId, amount: Money) {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((entity, currency.clone()), amount);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn has(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<bool, LedgerError> {
        Ok(self.peek(entity, currency) >= amount)
    }

    async fn withdraw(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<bool, LedgerError> {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry((entity, currency.clone())).or_default();
        match balance.checked_sub(amount) {
            Some(rest) => {
                *balance = rest;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deposit(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = balances.entry((entity, currency.clone())).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    async fn set(
        &self,
        entity: EntityId,
        currency: &CurrencyId,
        amount: Money,
    ) -> Result<(), LedgerError> {
        self.put(entity, currency, amount);
        Ok(())
    }

    async fn balance(&self, entity: EntityId, currency: &CurrencyId) -> Result<Money, LedgerError> {
        Ok(self.peek(entity, currency))
    }
}
