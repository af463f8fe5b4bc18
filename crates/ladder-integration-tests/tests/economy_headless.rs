//! Headless rank → prestige → rebirth economy, driven end to end through
//! [`LadderService`] with scripted collaborators.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ladder_core::id::EntityId;
use ladder_core::money::Money;
use ladder_core::progression::{ProgressionType, RewardRule};
use ladder_core::test_utils::*;
use ladder_data::{RuntimeSettings, load_ladder_data};
use ladder_runtime::test_utils::{CountingPersistence, LedgerCall, RecordingExecutor, ScriptedLedger};
use ladder_runtime::{
    Collaborators, CommandOutcome, LadderService, LedgerRegistry, LogSummarySink, Outcome,
    RejectReason,
};

struct Economy {
    service: LadderService,
    ledger: Arc<ScriptedLedger>,
    persistence: Arc<CountingPersistence>,
    executor: Arc<RecordingExecutor>,
}

impl Economy {
    fn start(defs: Vec<ProgressionType>, settings: RuntimeSettings) -> Self {
        let ledger = Arc::new(ScriptedLedger::new());
        let persistence = Arc::new(CountingPersistence::new());
        let executor = Arc::new(RecordingExecutor::new());
        let (service, report) = LadderService::start(
            defs,
            settings,
            Collaborators {
                ledgers: LedgerRegistry::single(ledger.clone()),
                persistence: persistence.clone(),
                executor: executor.clone(),
                sink: Arc::new(LogSummarySink),
            },
        );
        assert!(report.errors.is_empty(), "unexpected chain errors: {:?}", report.errors);
        Self {
            service,
            ledger,
            persistence,
            executor,
        }
    }

    fn level(&self, entity: EntityId, type_id: &str) -> u64 {
        self.service.engine().view(entity).state.level(type_id)
    }

    fn balance(&self, entity: EntityId) -> Money {
        self.ledger.peek(entity, &money())
    }
}

/// Standard chain with rewards on prestige.
fn rewarded_defs() -> Vec<ProgressionType> {
    let mut defs = standard_defs();
    defs[1].reward_rules = vec![
        RewardRule::EveryLevel(vec!["crate {type} {level}".into()]),
        RewardRule::FirstTime {
            level: 1,
            commands: vec!["title first-prestige".into()],
        },
    ];
    defs
}

fn advanced(out: &Outcome) -> (u64, u64, Money) {
    match out {
        Outcome::Advanced(a) => (a.from, a.to, a.cost),
        Outcome::Rejected(why) => panic!("expected an advance, got {why:?}"),
    }
}

// ---------------------------------------------------------------------------
// Single-step scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prestige_from_max_rank_resets_rank() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(1);
    eco.ledger.put(p, &money(), Money(100_000));
    eco.service.connect(p).await;
    eco.service.engine().admin_set_level(p, "rankup", 5).await.unwrap();

    assert_eq!(eco.service.engine().next_cost(p, "prestige").unwrap(), Some(Money(1000)));
    let out = eco.service.engine().advance_once(p, "prestige").await.unwrap();

    assert_eq!(advanced(&out), (0, 1, Money(1000)));
    assert_eq!(eco.level(p, "prestige"), 1);
    assert_eq!(eco.level(p, "rankup"), 0);
    assert_eq!(eco.balance(p), Money(99_000));
}

#[tokio::test]
async fn short_balance_never_touches_withdraw() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(2);
    eco.ledger.put(p, &money(), Money(500));
    eco.service.connect(p).await;

    let out = eco.service.engine().advance_once(p, "rankup").await.unwrap();

    assert_eq!(
        out,
        Outcome::Rejected(RejectReason::InsufficientFunds { cost: Money(1000) })
    );
    assert!(eco.ledger.withdrawals().is_empty());
    assert_eq!(eco.ledger.calls(), vec![LedgerCall::Has(Money(1000))]);
    assert_eq!(eco.level(p, "rankup"), 0);
    assert_eq!(eco.service.stats().rejected_insufficient_funds, 1);
}

#[tokio::test]
async fn prestige_before_max_rank_is_ineligible() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(3);
    eco.ledger.put(p, &money(), Money(100_000));
    eco.service.connect(p).await;
    eco.service.engine().admin_set_level(p, "rankup", 4).await.unwrap();

    let out = eco.service.engine().advance_once(p, "prestige").await.unwrap();

    assert!(matches!(out, Outcome::Rejected(RejectReason::Ineligible { .. })));
    assert!(eco.ledger.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Buy-max
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buy_max_issues_one_withdrawal_for_the_affordable_prefix() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(4);
    // 1000 + 1150 + 1322 = 3472; the fourth level costs 1521.
    eco.ledger.put(p, &money(), Money(4000));
    eco.service.connect(p).await;

    let out = eco.service.engine().advance_max(p, "rankup").await.unwrap();

    assert_eq!(advanced(&out), (0, 3, Money(3472)));
    assert_eq!(eco.ledger.withdrawals(), vec![Money(3472)]);
    assert_eq!(eco.balance(p), Money(528));
}

#[tokio::test]
async fn buy_max_with_five_thousand_reaches_level_four() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(5);
    eco.ledger.put(p, &money(), Money(5000));
    eco.service.connect(p).await;

    let out = eco.service.engine().advance_max(p, "rankup").await.unwrap();

    assert_eq!(advanced(&out), (0, 4, Money(4993)));
    assert_eq!(eco.ledger.withdrawals(), vec![Money(4993)]);
}

#[tokio::test]
async fn declined_buy_max_changes_nothing() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(6);
    eco.ledger.put(p, &money(), Money(4000));
    eco.ledger.set_decline_withdrawals(true);
    eco.service.connect(p).await;

    let out = eco.service.engine().advance_max(p, "rankup").await.unwrap();

    assert_eq!(out, Outcome::Rejected(RejectReason::WithdrawFailed));
    assert_eq!(eco.level(p, "rankup"), 0);
    assert_eq!(eco.balance(p), Money(4000));
}

// ---------------------------------------------------------------------------
// Rewards and claims
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_time_reward_fires_once_across_rebirths() {
    let eco = Economy::start(rewarded_defs(), RuntimeSettings::default());
    let engine = eco.service.engine();
    let p = EntityId::from_u128(7);
    eco.ledger.put(p, &money(), Money(10_000_000));
    eco.service.connect(p).await;

    for _ in 0..3 {
        assert!(engine.advance_max(p, "rankup").await.unwrap().is_advanced());
        assert!(engine.advance_once(p, "prestige").await.unwrap().is_advanced());
    }
    assert!(engine.advance_once(p, "rebirth").await.unwrap().is_advanced());
    assert_eq!(eco.level(p, "prestige"), 0);
    assert_eq!(eco.level(p, "rebirth"), 1);

    assert!(engine.advance_max(p, "rankup").await.unwrap().is_advanced());
    assert!(engine.advance_once(p, "prestige").await.unwrap().is_advanced());
    engine.rewards().flush().await.unwrap();

    let commands = eco.executor.commands();
    let titles = commands.iter().filter(|c| *c == "title first-prestige").count();
    assert_eq!(titles, 1);
    assert_eq!(
        commands.iter().filter(|c| c.starts_with("crate prestige")).count(),
        4
    );
    assert!(commands.contains(&"crate prestige 3".to_string()));
    assert_eq!(eco.persistence.claim_saves(), 1);
}

#[tokio::test]
async fn claims_survive_a_reconnect() {
    let eco = Economy::start(rewarded_defs(), RuntimeSettings::default());
    let engine = eco.service.engine();
    let p = EntityId::from_u128(8);
    eco.ledger.put(p, &money(), Money(10_000_000));
    eco.service.connect(p).await;

    engine.admin_set_level(p, "rankup", 5).await.unwrap();
    assert!(engine.advance_once(p, "prestige").await.unwrap().is_advanced());
    eco.service.disconnect(p).await.unwrap();

    eco.service.connect(p).await;
    assert_eq!(eco.level(p, "prestige"), 1);
    engine.admin_set_level(p, "prestige", 0).await.unwrap();
    engine.admin_set_level(p, "rankup", 5).await.unwrap();
    assert!(engine.advance_once(p, "prestige").await.unwrap().is_advanced());
    engine.rewards().flush().await.unwrap();

    let titles = eco
        .executor
        .commands()
        .into_iter()
        .filter(|c| c == "title first-prestige")
        .count();
    assert_eq!(titles, 1);
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn command_labels_drive_every_protocol() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let engine = eco.service.engine();
    let p = EntityId::from_u128(9);
    eco.ledger.put(p, &money(), Money(4000));
    eco.service.connect(p).await;

    let out = engine.execute_command(p, "  RankUp   MAX ").await.unwrap();
    assert!(matches!(out, CommandOutcome::Advance(Outcome::Advanced(_))));
    assert_eq!(eco.level(p, "rankup"), 3);

    let out = engine.execute_command(p, "rankup auto").await.unwrap();
    assert_eq!(
        out,
        CommandOutcome::AutoToggled {
            progression: "rankup".into(),
            enabled: true
        }
    );
    assert!(engine.execute_command(p, "rebirth max").await.is_err());
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduler_climbs_the_whole_chain() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let engine = eco.service.engine();
    let p = EntityId::from_u128(10);
    eco.ledger.put(p, &money(), Money(10_000_000));
    eco.service.connect(p).await;
    for type_id in ["rankup", "prestige", "rebirth"] {
        assert!(engine.set_auto_enabled(p, type_id, true).await.unwrap());
    }

    for _ in 0..40 {
        eco.service.scheduler().tick_once().await;
    }

    assert_eq!(eco.level(p, "rankup"), 5);
    assert_eq!(eco.level(p, "prestige"), 3);
    assert_eq!(eco.level(p, "rebirth"), 2);
    assert!(eco.service.stats().advances > 0);
}

#[tokio::test]
async fn scheduler_ignores_offline_and_opted_out_entities() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let online = EntityId::from_u128(11);
    let offline = EntityId::from_u128(12);
    for p in [online, offline] {
        eco.ledger.put(p, &money(), Money(100_000));
    }
    eco.service.connect(online).await;
    eco.service.engine().advance_once(offline, "rankup").await.unwrap();

    let report = eco.service.scheduler().tick_once().await;

    assert_eq!(report.dispatched, 0);
    assert_eq!(eco.level(online, "rankup"), 0);
    assert_eq!(eco.level(offline, "rankup"), 1);
}

#[tokio::test]
async fn ledger_outage_is_reported_not_retried() {
    let eco = Economy::start(standard_defs(), RuntimeSettings::default());
    let p = EntityId::from_u128(13);
    eco.ledger.put(p, &money(), Money(100_000));
    eco.service.connect(p).await;
    eco.ledger.set_unavailable(true);

    let out = eco.service.engine().advance_once(p, "rankup").await.unwrap();

    assert_eq!(out, Outcome::Rejected(RejectReason::LedgerUnavailable));
    assert_eq!(eco.ledger.calls().len(), 1);
    assert_eq!(eco.service.stats().ledger_unavailable, 1);
}

// ---------------------------------------------------------------------------
// Data files
// ---------------------------------------------------------------------------

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ladder_it_{name}_{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

const PROGRESSIONS_RON: &str = r#"[
    (
        name: "rankup",
        limit: 5,
        cost: exponential(base: 1000, multiplier: 1.15),
        max_enabled: true,
        auto: (enabled: true, delay_ticks: 1),
    ),
    (
        name: "prestige",
        follows: Some("rankup"),
        limit: 3,
        rewards: (first_time: {"1": ["title {entity}"]}),
    ),
]"#;

#[tokio::test]
async fn data_directory_boots_and_reloads() {
    let dir = scratch_dir("boot");
    fs::write(dir.join("progressions.ron"), PROGRESSIONS_RON).unwrap();
    fs::write(dir.join("settings.toml"), "reward_batch_size = 2\ncost_cache_capacity = 16\n").unwrap();

    let data = load_ladder_data(&dir).unwrap();
    assert_eq!(data.settings.reward_batch_size, 2);
    let eco = Economy::start(data.progressions, data.settings);
    let p = EntityId::from_u128(14);
    eco.ledger.put(p, &money(), Money(4000));
    eco.service.connect(p).await;

    let out = eco.service.engine().advance_max(p, "rankup").await.unwrap();
    assert_eq!(advanced(&out), (0, 3, Money(3472)));

    let cheaper = PROGRESSIONS_RON.replace(
        "exponential(base: 1000, multiplier: 1.15)",
        "linear(base: 10, per_level: 0)",
    );
    fs::write(dir.join("progressions.ron"), cheaper).unwrap();
    let report = eco.service.reload_from_dir(&dir).unwrap();

    assert_eq!(report.active, 2);
    assert!(!report.kept_prior);
    assert_eq!(eco.service.engine().next_cost(p, "rankup").unwrap(), Some(Money(10)));
    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn cyclic_data_file_keeps_the_running_chain() {
    let dir = scratch_dir("cycle");
    fs::write(dir.join("progressions.ron"), PROGRESSIONS_RON).unwrap();
    let data = load_ladder_data(&dir).unwrap();
    let eco = Economy::start(data.progressions, data.settings);

    fs::write(
        dir.join("progressions.ron"),
        r#"[(name: "a", follows: Some("b")), (name: "b", follows: Some("a"))]"#,
    )
    .unwrap();
    let report = eco.service.reload_from_dir(&dir).unwrap();

    assert!(report.kept_prior);
    assert!(!report.errors.is_empty());
    assert!(eco.service.engine().catalog().chain.lookup("rankup").is_some());
    let _ = fs::remove_dir_all(&dir);
}
