use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payflow::application::orchestrator::PaymentOrchestrator;
use payflow::application::router::ProcessorRouter;
use payflow::config::OrchestratorConfig;
use payflow::domain::money::PaymentMethod;
use payflow::domain::payment::Payment;
use payflow::domain::ports::{LedgerRepositoryRef, PaymentFilter, PaymentRepositoryRef};
use payflow::error::PaymentError;
use payflow::infrastructure::in_memory::{InMemoryLedgerRepository, InMemoryPaymentRepository};
use payflow::infrastructure::memory_cache::InMemoryCache;
use payflow::infrastructure::notifier::LoggingNotifier;
#[cfg(feature = "storage-rocksdb")]
use payflow::infrastructure::rocksdb::RocksDBStore;
use payflow::infrastructure::sandbox::SandboxProcessor;
use payflow::interfaces::csv::command_reader::{Command, CommandReader};
use payflow::interfaces::csv::payment_writer::PaymentWriter;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input command script CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Seconds before an abandoned payment lock expires.
    #[arg(long, default_value_t = 30)]
    lock_ttl_secs: u64,

    /// Upper bound in seconds on a single processor call.
    #[arg(long, default_value_t = 20)]
    processor_timeout_secs: u64,

    /// Requests admitted per merchant and client in each window.
    #[arg(long, default_value_t = 100)]
    rate_limit: u64,

    #[arg(long, default_value_t = 1000)]
    rate_limit_window_ms: u64,
}

impl Cli {
    fn config(&self) -> OrchestratorConfig {
        let lock_ttl = Duration::from_secs(self.lock_ttl_secs);
        OrchestratorConfig {
            lock_ttl,
            lock_heartbeat: lock_ttl / 3,
            processor_timeout: Duration::from_secs(self.processor_timeout_secs),
            rate_limit: self.rate_limit,
            rate_limit_window: Duration::from_millis(self.rate_limit_window_ms),
            ..Default::default()
        }
    }
}

fn storage(db_path: Option<PathBuf>) -> Result<(PaymentRepositoryRef, LedgerRepositoryRef)> {
    if let Some(db_path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            let store = RocksDBStore::open(&db_path)?;
            tracing::info!(path = %db_path.display(), "using RocksDB storage");
            return Ok((Arc::new(store.clone()), Arc::new(store)));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        warn!(
            path = %db_path.display(),
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok((
        Arc::new(InMemoryPaymentRepository::new()),
        Arc::new(InMemoryLedgerRepository::new()),
    ))
}

async fn live_payment(
    orchestrator: &PaymentOrchestrator,
    merchant: &str,
    order: &str,
) -> payflow::error::Result<Payment> {
    orchestrator
        .find_by_order(merchant, order)
        .await?
        .ok_or_else(|| {
            PaymentError::validation(format!(
                "No live payment for merchant {merchant} order {order}"
            ))
        })
}

async fn apply(orchestrator: &PaymentOrchestrator, command: Command) -> payflow::error::Result<()> {
    match command {
        Command::Create(request) => {
            orchestrator.create_payment(request).await?;
        }
        Command::Process {
            merchant,
            order,
            details,
        } => {
            let payment = live_payment(orchestrator, &merchant, &order).await?;
            orchestrator.process_payment(payment.id, details).await?;
        }
        Command::Refund {
            merchant,
            order,
            amount,
            reason,
        } => {
            let payment = live_payment(orchestrator, &merchant, &order).await?;
            orchestrator
                .refund_payment(payment.id, amount, &reason)
                .await?;
        }
        Command::Cancel { merchant, order } => {
            let payment = live_payment(orchestrator, &merchant, &order).await?;
            orchestrator.cancel_payment(payment.id).await?;
        }
    }
    Ok(())
}

/// Every stored payment, oldest first.
async fn all_payments(orchestrator: &PaymentOrchestrator) -> payflow::error::Result<Vec<Payment>> {
    let mut payments = Vec::new();
    loop {
        let page = orchestrator
            .list_payments(PaymentFilter {
                limit: PaymentFilter::MAX_LIMIT,
                offset: payments.len(),
                ..Default::default()
            })
            .await?;
        let last = page.len() < PaymentFilter::MAX_LIMIT;
        payments.extend(page);
        if last {
            break;
        }
    }
    payments.reverse();
    Ok(payments)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let config = cli.config();
    let (payments, ledger) = storage(cli.db_path.clone())?;
    let cache = Arc::new(InMemoryCache::new());
    let sandbox = Arc::new(SandboxProcessor::new());
    let router = [
        PaymentMethod::Card,
        PaymentMethod::BankTransfer,
        PaymentMethod::Wallet,
        PaymentMethod::Crypto,
    ]
    .into_iter()
    .fold(ProcessorRouter::new(), |router, method| {
        router.with_processor(method, sandbox.clone())
    });

    let orchestrator = PaymentOrchestrator::new(
        config,
        payments,
        ledger,
        cache.clone(),
        cache,
        router,
        Arc::new(LoggingNotifier),
    )?;

    // Replay commands
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (index, command) in reader.commands().enumerate() {
        let row = index + 1;
        let outcome = match command {
            Ok(command) => apply(&orchestrator, command).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(row, kind = ?e.kind(), error = %e, "command failed");
        }
    }

    // Output final state
    let payments = all_payments(&orchestrator).await?;
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments)?;

    Ok(())
}
