use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use orderflow::application::engine::OrderEngine;
use orderflow::application::orchestrator::ProviderRegistry;
use orderflow::config::EngineConfig;
use orderflow::domain::order::{OrderStatus, PaymentMethod};
use orderflow::domain::ports::{OrderStore, SharedOrderStore};
use orderflow::infrastructure::in_memory::InMemoryOrderStore;
use orderflow::infrastructure::providers::SimulatedProvider;
use orderflow::infrastructure::tasks::{Outbox, default_tasks};
use orderflow::interfaces::csv::order_reader::OrderReader;
use orderflow::interfaces::csv::order_writer::OrderWriter;
use orderflow::telemetry::{self, LogFormat};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    /// Final state of every order, as CSV.
    Orders,
    /// Revenue and conversion rollups, as JSON.
    Analytics,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input orders CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "ORDERFLOW_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Probability that the simulated providers approve a charge
    #[arg(long, env = "ORDERFLOW_SUCCESS_RATE", default_value_t = 0.9, value_parser = parse_rate)]
    success_rate: f64,

    /// Seed for the simulated providers, for reproducible runs
    #[arg(long, env = "ORDERFLOW_SEED")]
    seed: Option<u64>,

    /// Timeout for a single provider charge, in milliseconds
    #[arg(long, env = "ORDERFLOW_PROVIDER_TIMEOUT_MS", default_value_t = 10_000)]
    provider_timeout_ms: u64,

    /// Timeout for each post-purchase task, in milliseconds
    #[arg(long, env = "ORDERFLOW_TASK_TIMEOUT_MS", default_value_t = 5_000)]
    task_timeout_ms: u64,

    /// What to print once all orders are processed
    #[arg(long, value_enum, default_value_t = Report::Orders)]
    report: Report,

    /// Log output format
    #[arg(long, value_enum, env = "ORDERFLOW_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn parse_rate(raw: &str) -> std::result::Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is not between 0 and 1"))
    }
}

fn open_store(db_path: Option<PathBuf>) -> Result<SharedOrderStore> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = orderflow::infrastructure::rocksdb::RocksDbOrderStore::open(path)
                .into_diagnostic()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
        None => Ok(Arc::new(InMemoryOrderStore::new())),
    }
}

/// Each method gets its own stream so providers do not decide in lockstep.
fn method_seed(seed: Option<u64>, index: u64) -> Option<u64> {
    seed.map(|seed| seed.wrapping_add(index))
}

fn providers(cli: &Cli) -> ProviderRegistry {
    PaymentMethod::ALL.into_iter().zip(0u64..).fold(
        ProviderRegistry::new(),
        |registry, (method, index)| {
            let mut provider = SimulatedProvider::new(method.as_str(), cli.success_rate);
            if let Some(seed) = method_seed(cli.seed, index) {
                provider = provider.with_seed(seed);
            }
            registry.with(method, Arc::new(provider))
        },
    )
}

async fn analytics_report(engine: &OrderEngine) -> Result<serde_json::Value> {
    let analytics = engine.analytics();
    let paid = engine
        .store()
        .by_status(OrderStatus::Paid)
        .await
        .into_diagnostic()?;
    let paid_days: Vec<_> = paid
        .iter()
        .filter_map(|order| order.paid_at.map(|at| at.date_naive()))
        .collect();

    let daily = match (paid_days.iter().min(), paid_days.iter().max()) {
        (Some(first), Some(last)) => analytics
            .revenue_between(*first, *last)
            .await
            .into_diagnostic()?,
        _ => Vec::new(),
    };

    Ok(serde_json::json!({
        "status": analytics.status_breakdown().await.into_diagnostic()?,
        "conversions": analytics.conversion_analytics().await.into_diagnostic()?,
        "affiliates": analytics.affiliate_analytics().await.into_diagnostic()?,
        "daily_revenue": daily,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    let config = EngineConfig {
        provider_timeout: Duration::from_millis(cli.provider_timeout_ms),
        task_timeout: Duration::from_millis(cli.task_timeout_ms),
        ..EngineConfig::default()
    };
    let outbox = Outbox::new();
    let engine = OrderEngine::new(
        open_store(cli.db_path.clone())?,
        providers(&cli),
        default_tasks(&outbox, &config.operator_channel),
        &config,
    )
    .into_diagnostic()?;

    // Intake
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OrderReader::new(file);
    for (row, new_order) in reader.orders().enumerate() {
        match new_order {
            Ok(new_order) => {
                if let Err(e) = engine.create_order(new_order).await {
                    error!(row = row + 1, error = %e, "Error creating order");
                }
            }
            Err(e) => {
                error!(row = row + 1, error = %e, "Error reading order");
            }
        }
    }

    let stats = engine.wait_idle().await;
    info!(
        completed = stats.completed,
        failed = stats.failed,
        panicked = stats.panicked,
        outbox = outbox.entries().await.len(),
        "All background work finished"
    );

    // Output final state
    match cli.report {
        Report::Orders => {
            let orders = engine.orders().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = OrderWriter::new(stdout.lock());
            writer.write_orders(&orders).into_diagnostic()?;
        }
        Report::Analytics => {
            let report = analytics_report(&engine).await?;
            let rendered = serde_json::to_string_pretty(&report).into_diagnostic()?;
            println!("{rendered}");
        }
    }

    Ok(())
}
