//! The advancement protocols: single-step, buy-max and auto-repeat.
//!
//! Every attempt runs the same gates in order:
//!
//! 1. the type is enabled and chain-eligible, else `Ineligible`
//! 2. the entity is below the level limit, else `AtLimit`
//! 3. the ledger says the entity can pay, else `InsufficientFunds`
//! 4. the ledger accepts the withdrawal, else `WithdrawFailed`
//!
//! Only then is state mutated: level up, resets, reward resolution. Gate
//! failures are values ([`Outcome::Rejected`]), never errors. An
//! [`EngineError`] means the caller named something that does not exist.
//!
//! All attempts for one entity are serialized by the attempt guard on its
//! [`EntityHandle`]. A second attempt that finds the guard taken is
//! rejected as `Busy` instead of queueing.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use ladder_core::chain::ChainGraph;
use ladder_core::commands::{CommandAction, CommandTable};
use ladder_core::cost::CostEngine;
use ladder_core::id::{EntityId, ProgressionId};
use ladder_core::money::Money;
use ladder_core::progression::ProgressionType;
use ladder_core::reward::{ResolvedRewards, resolve_level, resolve_range};
use ladder_core::state::EntityProgressionState;
use ladder_data::RuntimeSettings;
use ladder_stats::{PerfCounters, Rejection};
use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, LedgerError, LedgerRegistry};
use crate::rewards::RewardBatcher;
use crate::store::{AttemptGuard, EntityHandle, EntityStateStore, StateView};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Everything derived from one set of definitions. Swapped whole on reload.
#[derive(Debug)]
pub struct Catalog {
    pub chain: ChainGraph,
    pub costs: CostEngine,
    pub commands: CommandTable,
}

impl Catalog {
    pub fn new(chain: ChainGraph, cost_cache_capacity: usize) -> Self {
        let costs = CostEngine::new(&chain, cost_cache_capacity);
        let commands = CommandTable::build(&chain);
        Self {
            chain,
            costs,
            commands,
        }
    }

    pub fn resolve(&self, type_id: &str) -> Result<(ProgressionId, &ProgressionType), EngineError> {
        let id = self
            .chain
            .lookup(type_id)
            .ok_or_else(|| EngineError::UnknownProgression(type_id.to_string()))?;
        let def = self
            .chain
            .get(id)
            .ok_or_else(|| EngineError::UnknownProgression(type_id.to_string()))?;
        Ok((id, def))
    }

    fn requirement(&self, id: ProgressionId) -> Option<Requirement> {
        let (prev, level) = self.chain.requirement(id)?;
        let prev = self.chain.get(prev)?;
        Some(Requirement {
            progression: prev.id.clone(),
            level,
        })
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown progression type '{0}'")]
    UnknownProgression(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Level the entity must hold in another type before advancing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub progression: String,
    pub level: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Another attempt for the entity is in flight.
    Busy,
    /// Type disabled, or the chain requirement is unmet.
    Ineligible { requires: Option<Requirement> },
    AtLimit,
    InsufficientFunds { cost: Money },
    /// The funds check passed but the ledger refused the withdrawal.
    WithdrawFailed,
    /// Ledger error or timeout. Never retried.
    LedgerUnavailable,
    MaxDisabled,
    AutoDisabled,
}

impl RejectReason {
    pub fn kind(&self) -> Rejection {
        match self {
            RejectReason::Busy => Rejection::Busy,
            RejectReason::Ineligible { .. } => Rejection::Ineligible,
            RejectReason::AtLimit => Rejection::AtLimit,
            RejectReason::InsufficientFunds { .. } => Rejection::InsufficientFunds,
            RejectReason::WithdrawFailed => Rejection::WithdrawFailed,
            RejectReason::LedgerUnavailable => Rejection::LedgerUnavailable,
            RejectReason::MaxDisabled | RejectReason::AutoDisabled => Rejection::Disabled,
        }
    }

    /// Whether the attempt got as far as the ledger.
    pub fn reached_ledger(&self) -> bool {
        matches!(
            self,
            RejectReason::InsufficientFunds { .. }
                | RejectReason::WithdrawFailed
                | RejectReason::LedgerUnavailable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub progression: String,
    pub from: u64,
    pub to: u64,
    /// Total withdrawn.
    pub cost: Money,
}

impl Advancement {
    pub fn levels(&self) -> u64 {
        self.to - self.from
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Advanced(Advancement),
    Rejected(RejectReason),
}

impl Outcome {
    pub fn is_advanced(&self) -> bool {
        matches!(self, Outcome::Advanced(_))
    }
}

/// Result of one auto-repeat pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoOutcome {
    pub levels: u64,
    pub total_cost: Money,
    /// True once any step reached the ledger.
    pub attempted: bool,
    /// The gate that ended the pass, if one did.
    pub stopped: Option<RejectReason>,
}

impl AutoOutcome {
    fn rejected(reason: RejectReason) -> Self {
        Self {
            stopped: Some(reason),
            ..Self::default()
        }
    }
}

/// What a resolved command label did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Advance(Outcome),
    AutoToggled { progression: String, enabled: bool },
    AutoRefused { progression: String },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub ledger_timeout: Duration,
    pub max_auto_steps: u64,
    pub max_levels_per_purchase: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            ledger_timeout: settings.ledger_timeout(),
            max_auto_steps: settings.max_auto_steps_per_tick.max(1),
            max_levels_per_purchase: settings.max_levels_per_purchase.max(1),
        }
    }
}

pub struct AdvancementEngine {
    catalog: RwLock<Arc<Catalog>>,
    store: EntityStateStore,
    ledgers: LedgerRegistry,
    rewards: RewardBatcher,
    counters: Arc<PerfCounters>,
    config: EngineConfig,
}

impl AdvancementEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        store: EntityStateStore,
        ledgers: LedgerRegistry,
        rewards: RewardBatcher,
        counters: Arc<PerfCounters>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            store,
            ledgers,
            rewards,
            counters,
            config,
        }
    }

    /// Current catalog. Attempts keep the one they started with.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the catalog. Attempts in flight finish against the old one.
    pub fn install_catalog(&self, catalog: Arc<Catalog>) {
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
    }

    pub fn store(&self) -> &EntityStateStore {
        &self.store
    }

    pub fn rewards(&self) -> &RewardBatcher {
        &self.rewards
    }

    pub fn counters(&self) -> &Arc<PerfCounters> {
        &self.counters
    }

    /// State for display. Never waits on storage.
    pub fn view(&self, entity: EntityId) -> StateView {
        self.store.snapshot_or_default(entity)
    }

    /// Price of the entity's next level in `type_id`, from whatever state is
    /// cached. `None` at the limit.
    pub fn next_cost(&self, entity: EntityId, type_id: &str) -> Result<Option<Money>, EngineError> {
        let catalog = self.catalog();
        let (id, def) = catalog.resolve(type_id)?;
        let view = self.store.snapshot_or_default(entity);
        let level = view.state.level(&def.id);
        if level >= def.level_limit {
            return Ok(None);
        }
        let scaling_level = catalog.costs.scaling_level(id, &view.state);
        Ok(catalog.costs.cost(id, level, scaling_level))
    }

    // -- Protocols --

    /// Buy one level.
    pub async fn advance_once(&self, entity: EntityId, type_id: &str) -> Result<Outcome, EngineError> {
        let catalog = self.catalog();
        let (id, def) = catalog.resolve(type_id)?;
        self.counters.attempt();

        let handle = self.store.get_or_load(entity).await;
        let Some(guard) = self.try_lock(&handle) else {
            return Ok(self.settle(entity, def, Outcome::Rejected(RejectReason::Busy)));
        };
        let outcome = self.single_step(&catalog, id, &handle, &guard).await;
        Ok(self.settle(entity, def, outcome))
    }

    /// Buy as many levels as the current balance affords, in one withdrawal.
    ///
    /// The balance is read once and purchases are simulated against it. If
    /// the single withdrawal fails nothing is applied.
    pub async fn advance_max(&self, entity: EntityId, type_id: &str) -> Result<Outcome, EngineError> {
        let catalog = self.catalog();
        let (id, def) = catalog.resolve(type_id)?;
        self.counters.attempt();
        if !def.max_advance_enabled {
            return Ok(self.settle(entity, def, Outcome::Rejected(RejectReason::MaxDisabled)));
        }

        let handle = self.store.get_or_load(entity).await;
        let Some(guard) = self.try_lock(&handle) else {
            return Ok(self.settle(entity, def, Outcome::Rejected(RejectReason::Busy)));
        };
        let outcome = self.max_step(&catalog, id, &handle, &guard).await;
        Ok(self.settle(entity, def, outcome))
    }

    /// Repeat single steps back to back until a gate fails, the limit is
    /// reached, or `max_auto_steps` levels were bought.
    ///
    /// `Ineligible` and `AtLimit` end the pass quietly.
    pub async fn auto_advance(&self, entity: EntityId, type_id: &str) -> Result<AutoOutcome, EngineError> {
        let catalog = self.catalog();
        let (id, def) = catalog.resolve(type_id)?;
        if !def.auto_advance_enabled {
            return Ok(AutoOutcome::rejected(RejectReason::AutoDisabled));
        }

        let handle = self.store.get_or_load(entity).await;
        let Some(guard) = self.try_lock(&handle) else {
            return Ok(AutoOutcome::rejected(RejectReason::Busy));
        };
        let (level, opted_in) = handle.with_state(|s| (s.level(&def.id), s.is_auto_enabled(&def.id)));
        if !opted_in {
            return Ok(AutoOutcome::rejected(RejectReason::AutoDisabled));
        }

        let steps = def
            .level_limit
            .saturating_sub(level)
            .min(self.config.max_auto_steps);
        let mut out = AutoOutcome::default();
        for _ in 0..steps {
            self.counters.attempt();
            match self.single_step(&catalog, id, &handle, &guard).await {
                Outcome::Advanced(adv) => {
                    self.counters.advanced(1);
                    out.levels += 1;
                    out.total_cost = out.total_cost.saturating_add(adv.cost);
                    out.attempted = true;
                }
                Outcome::Rejected(reason) => {
                    self.counters.rejected(reason.kind());
                    out.attempted |= reason.reached_ledger();
                    out.stopped = Some(reason);
                    break;
                }
            }
        }
        if out.levels > 0 {
            debug!(
                entity = %entity,
                progression = %def.id,
                levels = out.levels,
                cost = %out.total_cost,
                "auto-advanced"
            );
        }
        Ok(out)
    }

    /// Run whatever a command label is bound to in the current catalog.
    pub async fn execute_command(
        &self,
        entity: EntityId,
        input: &str,
    ) -> Result<CommandOutcome, EngineError> {
        let catalog = self.catalog();
        let binding = catalog
            .commands
            .resolve(input)
            .ok_or_else(|| EngineError::UnknownCommand(input.to_string()))?;
        let def = catalog
            .chain
            .get(binding.progression)
            .ok_or_else(|| EngineError::UnknownCommand(input.to_string()))?;
        let type_id = def.id.clone();
        drop(catalog);

        match binding.action {
            CommandAction::Single => Ok(CommandOutcome::Advance(
                self.advance_once(entity, &type_id).await?,
            )),
            CommandAction::Max => Ok(CommandOutcome::Advance(
                self.advance_max(entity, &type_id).await?,
            )),
            CommandAction::AutoToggle => match self.toggle_auto(entity, &type_id).await? {
                Some(enabled) => Ok(CommandOutcome::AutoToggled {
                    progression: type_id,
                    enabled,
                }),
                None => Ok(CommandOutcome::AutoRefused {
                    progression: type_id,
                }),
            },
        }
    }

    // -- Administration --

    /// Set a level directly, clamped to `[0, limit]`. Waits for any attempt
    /// in flight. Returns the stored level.
    pub async fn admin_set_level(
        &self,
        entity: EntityId,
        type_id: &str,
        level: u64,
    ) -> Result<u64, EngineError> {
        self.admin_adjust(entity, type_id, |_| level).await
    }

    pub async fn admin_add_levels(
        &self,
        entity: EntityId,
        type_id: &str,
        levels: u64,
    ) -> Result<u64, EngineError> {
        self.admin_adjust(entity, type_id, |current| current.saturating_add(levels))
            .await
    }

    pub async fn admin_remove_levels(
        &self,
        entity: EntityId,
        type_id: &str,
        levels: u64,
    ) -> Result<u64, EngineError> {
        self.admin_adjust(entity, type_id, |current| current.saturating_sub(levels))
            .await
    }

    async fn admin_adjust(
        &self,
        entity: EntityId,
        type_id: &str,
        f: impl FnOnce(u64) -> u64,
    ) -> Result<u64, EngineError> {
        let catalog = self.catalog();
        let (_, def) = catalog.resolve(type_id)?;
        let (handle, guard) = self.lock_entity(entity).await;
        let (before, after) = handle.mutate(&guard, |s| {
            let before = s.level(&def.id);
            let after = s.set_level_clamped(&def.id, f(before), def.level_limit);
            (before, after)
        });
        info!(entity = %entity, progression = %def.id, before, after, "level set by admin");
        Ok(after)
    }

    /// Opt the entity in or out of auto-advance for a type. Returns false
    /// (and changes nothing) when enabling a type that does not allow it.
    pub async fn set_auto_enabled(
        &self,
        entity: EntityId,
        type_id: &str,
        enabled: bool,
    ) -> Result<bool, EngineError> {
        let catalog = self.catalog();
        let (_, def) = catalog.resolve(type_id)?;
        if enabled && !def.auto_advance_enabled {
            debug!(entity = %entity, progression = %def.id, "auto-advance not offered");
            return Ok(false);
        }
        let (handle, guard) = self.lock_entity(entity).await;
        handle.mutate(&guard, |s| s.set_auto_enabled(&def.id, enabled));
        debug!(entity = %entity, progression = %def.id, enabled, "auto-advance toggled");
        Ok(true)
    }

    /// Flip the entity's auto opt-in for a type under the entity lock.
    /// Returns the new flag, or `None` when enabling is not offered.
    pub async fn toggle_auto(&self, entity: EntityId, type_id: &str) -> Result<Option<bool>, EngineError> {
        let catalog = self.catalog();
        let (_, def) = catalog.resolve(type_id)?;
        let (handle, guard) = self.lock_entity(entity).await;
        let enabled = handle.with_state(|s| !s.is_auto_enabled(&def.id));
        if enabled && !def.auto_advance_enabled {
            debug!(entity = %entity, progression = %def.id, "auto-advance not offered");
            return Ok(None);
        }
        handle.mutate(&guard, |s| s.set_auto_enabled(&def.id, enabled));
        debug!(entity = %entity, progression = %def.id, enabled, "auto-advance toggled");
        Ok(Some(enabled))
    }

    // -- Gates --

    async fn single_step(
        &self,
        catalog: &Catalog,
        id: ProgressionId,
        handle: &EntityHandle,
        guard: &AttemptGuard,
    ) -> Outcome {
        let Some(def) = catalog.chain.get(id) else {
            return Outcome::Rejected(RejectReason::Ineligible { requires: None });
        };
        let entity = handle.entity();
        let (level, scaling_level, eligible) = handle.with_state(|s| {
            (
                s.level(&def.id),
                catalog.costs.scaling_level(id, s),
                catalog.chain.can_advance(s, id),
            )
        });

        if !eligible {
            return Outcome::Rejected(ineligible(catalog, id, def));
        }
        if level >= def.level_limit {
            return Outcome::Rejected(RejectReason::AtLimit);
        }
        let Some(cost) = catalog.costs.cost(id, level, scaling_level) else {
            return Outcome::Rejected(RejectReason::Ineligible { requires: None });
        };
        let ledger = match self.ledger_for(entity, def) {
            Ok(ledger) => ledger,
            Err(reason) => return Outcome::Rejected(reason),
        };

        match self
            .ledger_call(ledger.has(entity, &def.currency, cost))
            .await
        {
            Ok(true) => {}
            Ok(false) => return Outcome::Rejected(RejectReason::InsufficientFunds { cost }),
            Err(e) => return Outcome::Rejected(ledger_failure(entity, def, "funds check", &e)),
        }
        if let Err(reason) = self.withdraw(ledger.as_ref(), entity, def, cost).await {
            return Outcome::Rejected(reason);
        }

        let (to, rewards) = handle.mutate(guard, |s| {
            let to = s.increment_level(&def.id, def.level_limit);
            reset_previous(catalog, id, def, s);
            (to, resolve_level(def, to, s))
        });
        self.after_advance(entity, def, rewards).await;
        Outcome::Advanced(Advancement {
            progression: def.id.clone(),
            from: level,
            to,
            cost,
        })
    }

    async fn max_step(
        &self,
        catalog: &Catalog,
        id: ProgressionId,
        handle: &EntityHandle,
        guard: &AttemptGuard,
    ) -> Outcome {
        let Some(def) = catalog.chain.get(id) else {
            return Outcome::Rejected(RejectReason::Ineligible { requires: None });
        };
        let entity = handle.entity();
        let (start, scaling_level, eligible) = handle.with_state(|s| {
            (
                s.level(&def.id),
                catalog.costs.scaling_level(id, s),
                catalog.chain.can_advance(s, id),
            )
        });

        if !eligible {
            return Outcome::Rejected(ineligible(catalog, id, def));
        }
        if start >= def.level_limit {
            return Outcome::Rejected(RejectReason::AtLimit);
        }
        let ledger = match self.ledger_for(entity, def) {
            Ok(ledger) => ledger,
            Err(reason) => return Outcome::Rejected(reason),
        };
        let balance = match self
            .ledger_call(ledger.balance(entity, &def.currency))
            .await
        {
            Ok(balance) => balance,
            Err(e) => return Outcome::Rejected(ledger_failure(entity, def, "balance read", &e)),
        };

        // Simulate against the balance read above. Terminates within
        // `ceiling - start` iterations.
        let ceiling = def
            .level_limit
            .min(start.saturating_add(self.config.max_levels_per_purchase));
        let mut level = start;
        let mut remaining = balance;
        let mut total = Money::ZERO;
        while level < ceiling {
            let Some(cost) = catalog.costs.cost(id, level, scaling_level) else {
                break;
            };
            let Some(rest) = remaining.checked_sub(cost) else {
                break;
            };
            remaining = rest;
            total = total.saturating_add(cost);
            level += 1;
        }
        if level == start {
            let cost = catalog
                .costs
                .cost(id, start, scaling_level)
                .unwrap_or(Money::ZERO);
            return Outcome::Rejected(RejectReason::InsufficientFunds { cost });
        }

        if let Err(reason) = self.withdraw(ledger.as_ref(), entity, def, total).await {
            return Outcome::Rejected(reason);
        }

        let (to, rewards) = handle.mutate(guard, |s| {
            let to = s.set_level_clamped(&def.id, level, def.level_limit);
            reset_previous(catalog, id, def, s);
            (to, resolve_range(def, start, to, s))
        });
        self.after_advance(entity, def, rewards).await;
        Outcome::Advanced(Advancement {
            progression: def.id.clone(),
            from: start,
            to,
            cost: total,
        })
    }

    // -- Helpers --

    fn try_lock(&self, handle: &EntityHandle) -> Option<AttemptGuard> {
        let guard = handle.try_begin_attempt()?;
        // A handle evicted while we held it would drop our writes.
        (!handle.is_evicted()).then_some(guard)
    }

    async fn lock_entity(&self, entity: EntityId) -> (EntityHandle, AttemptGuard) {
        loop {
            let handle = self.store.get_or_load(entity).await;
            let guard = handle.begin_attempt().await;
            if !handle.is_evicted() {
                return (handle, guard);
            }
        }
    }

    fn ledger_for(&self, entity: EntityId, def: &ProgressionType) -> Result<Arc<dyn Ledger>, RejectReason> {
        self.ledgers
            .resolve(&def.currency)
            .map_err(|e| ledger_failure(entity, def, "ledger lookup", &e))
    }

    async fn ledger_call<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.config.ledger_timeout, call)
            .await
            .unwrap_or(Err(LedgerError::Timeout(self.config.ledger_timeout)))
    }

    async fn withdraw(
        &self,
        ledger: &dyn Ledger,
        entity: EntityId,
        def: &ProgressionType,
        amount: Money,
    ) -> Result<(), RejectReason> {
        match self
            .ledger_call(ledger.withdraw(entity, &def.currency, amount))
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    entity = %entity,
                    progression = %def.id,
                    amount = %amount,
                    "funds check passed but withdrawal was refused"
                );
                Err(RejectReason::WithdrawFailed)
            }
            Err(e) => Err(ledger_failure(entity, def, "withdrawal", &e)),
        }
    }

    /// Currency resets, claim persistence and reward dispatch. Failures are
    /// logged; the advancement itself already stands.
    async fn after_advance(&self, entity: EntityId, def: &ProgressionType, rewards: ResolvedRewards) {
        for currency in &def.reset_on_advance.currencies {
            let result = match self.ledgers.resolve(currency) {
                Ok(ledger) => self.ledger_call(ledger.set(entity, currency, Money::ZERO)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(entity = %entity, progression = %def.id, currency = %currency, error = %e, "currency reset failed");
            }
        }

        for key in &rewards.claimed {
            if let Err(e) = self.store.persistence().save_claimed_reward(entity, key).await {
                error!(entity = %entity, key = %key, error = %e, "claimed reward not persisted");
            }
        }

        if !rewards.actions.is_empty()
            && let Err(e) = self.rewards.enqueue(entity, rewards.actions)
        {
            warn!(entity = %entity, progression = %def.id, error = %e, "rewards dropped");
        }
    }

    /// Count and log a finished interactive attempt.
    fn settle(&self, entity: EntityId, def: &ProgressionType, outcome: Outcome) -> Outcome {
        match &outcome {
            Outcome::Advanced(adv) => {
                self.counters.advanced(adv.levels());
                info!(
                    entity = %entity,
                    progression = %def.id,
                    from = adv.from,
                    to = adv.to,
                    cost = %adv.cost,
                    "advanced"
                );
            }
            Outcome::Rejected(reason) => {
                self.counters.rejected(reason.kind());
                debug!(entity = %entity, progression = %def.id, ?reason, "attempt rejected");
            }
        }
        outcome
    }
}

impl std::fmt::Debug for AdvancementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvancementEngine")
            .field("types", &self.catalog().chain.len())
            .field("store", &self.store)
            .field("ledgers", &self.ledgers)
            .field("config", &self.config)
            .finish()
    }
}

fn ineligible(catalog: &Catalog, id: ProgressionId, def: &ProgressionType) -> RejectReason {
    let requires = if def.enabled {
        catalog.requirement(id)
    } else {
        None
    };
    RejectReason::Ineligible { requires }
}

fn ledger_failure(entity: EntityId, def: &ProgressionType, during: &str, e: &LedgerError) -> RejectReason {
    warn!(entity = %entity, progression = %def.id, currency = %def.currency, error = %e, "ledger failed during {during}");
    RejectReason::LedgerUnavailable
}

fn reset_previous(catalog: &Catalog, id: ProgressionId, def: &ProgressionType, state: &mut EntityProgressionState) {
    if !def.reset_on_advance.reset_previous {
        return;
    }
    if let Some(prev) = catalog.chain.previous(id).and_then(|p| catalog.chain.get(p)) {
        state.set_level_clamped(&prev.id, 0, prev.level_limit);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
