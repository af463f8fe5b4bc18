//! ladderd: headless driver for the progression runtime.
//!
//! Loads a data directory, connects a handful of simulated entities with
//! auto-advance switched on, pays them an income every tick and drives the
//! scheduler. With `--ticks 0` the scheduler runs on its own interval until
//! Ctrl-C.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ladder_core::id::{CurrencyId, EntityId};
use ladder_core::money::Money;
use ladder_data::load_ladder_data;
use ladder_runtime::{
    Collaborators, FilePersistence, LadderService, Ledger, LedgerRegistry, LogExecutor,
    LogSummarySink, MemoryLedger, MemoryPersistence, Persistence,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ladderd")]
#[command(about = "Headless driver for the rank/prestige/rebirth economy")]
struct Cli {
    /// Directory holding `progressions.*` and an optional `settings.*`
    #[arg(short, long, env = "LADDER_DATA_DIR", default_value = "crates/ladder-demo/data")]
    data: PathBuf,

    /// Ticks to drive; 0 runs on the configured interval until Ctrl-C
    #[arg(short, long, default_value_t = 200)]
    ticks: u64,

    /// Number of simulated entities
    #[arg(short, long, default_value_t = 4)]
    entities: u32,

    /// Starting balance of every entity, in each currency
    #[arg(long, default_value_t = 5_000)]
    balance: u64,

    /// Paid to every entity before each tick
    #[arg(long, default_value_t = 2_500)]
    income: u64,

    /// Keep entity state as snapshots in this directory instead of memory
    #[arg(long, env = "LADDER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Command lines run for the first entity before ticking ("rankup max")
    #[arg(short, long = "command")]
    commands: Vec<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data = load_ladder_data(&cli.data)
        .with_context(|| format!("loading {}", cli.data.display()))?;
    let currencies: BTreeSet<CurrencyId> = data
        .progressions
        .iter()
        .map(|def| def.currency.clone())
        .collect();
    let tick_interval = data.settings.tick_interval();

    let persistence: Arc<dyn Persistence> = match &cli.state_dir {
        Some(dir) => Arc::new(
            FilePersistence::open(dir)
                .await
                .with_context(|| format!("opening state dir {}", dir.display()))?,
        ),
        None => Arc::new(MemoryPersistence::new()),
    };
    let ledger = Arc::new(MemoryLedger::new());
    let (service, report) = LadderService::start(
        data.progressions,
        data.settings,
        Collaborators {
            ledgers: LedgerRegistry::single(ledger.clone()),
            persistence,
            executor: Arc::new(LogExecutor),
            sink: Arc::new(LogSummarySink),
        },
    );
    if report.active == 0 {
        anyhow::bail!("no valid progression types in {}", cli.data.display());
    }

    // -- Entities --

    let entities: Vec<EntityId> = (1..=u128::from(cli.entities))
        .map(EntityId::from_u128)
        .collect();
    let type_ids: Vec<String> = service
        .engine()
        .catalog()
        .chain
        .ordered_types()
        .filter(|(_, def)| def.auto_advance_enabled)
        .map(|(_, def)| def.id.clone())
        .collect();
    for &entity in &entities {
        for currency in &currencies {
            ledger.put(entity, currency, Money(cli.balance));
        }
        service.connect(entity).await;
        for type_id in &type_ids {
            service.engine().set_auto_enabled(entity, type_id, true).await?;
        }
    }
    info!(entities = entities.len(), auto = ?type_ids, "entities connected");

    if let Some(&first) = entities.first() {
        for line in &cli.commands {
            match service.engine().execute_command(first, line).await {
                Ok(outcome) => info!(entity = %first, command = %line, ?outcome, "command"),
                Err(e) => warn!(entity = %first, command = %line, error = %e, "command refused"),
            }
        }
    }

    // -- Drive --

    if cli.ticks == 0 {
        let payroll = tokio::spawn(payroll(
            ledger.clone(),
            entities.clone(),
            currencies.clone(),
            Money(cli.income),
            tick_interval,
        ));
        service
            .scheduler()
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received");
            })
            .await;
        payroll.abort();
    } else {
        for _ in 0..cli.ticks {
            pay(ledger.as_ref(), &entities, &currencies, Money(cli.income)).await?;
            service.scheduler().tick_once().await;
        }
    }

    // -- Report --

    let flush = service.shutdown().await;
    for &entity in &entities {
        let state = service.engine().view(entity).state;
        let levels: Vec<String> = state
            .levels()
            .iter()
            .map(|(type_id, level)| format!("{type_id}={level}"))
            .collect();
        println!("{entity}  {}", levels.join(" "));
    }
    println!("ticks: {}", service.scheduler().current_tick());
    println!("saved: {} failed: {}", flush.saved, flush.failed);
    println!("{}", service.stats());
    Ok(())
}

async fn pay(
    ledger: &MemoryLedger,
    entities: &[EntityId],
    currencies: &BTreeSet<CurrencyId>,
    amount: Money,
) -> anyhow::Result<()> {
    for &entity in entities {
        for currency in currencies {
            ledger.deposit(entity, currency, amount).await?;
        }
    }
    Ok(())
}

async fn payroll(
    ledger: Arc<MemoryLedger>,
    entities: Vec<EntityId>,
    currencies: BTreeSet<CurrencyId>,
    amount: Money,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = pay(ledger.as_ref(), &entities, &currencies, amount).await {
            warn!(error = %e, "income payment failed");
        }
    }
}
