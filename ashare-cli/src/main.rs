//! ashare CLI: A-share main-board data lake commands.
//!
//! Commands:
//! - `init`: create data directories and the metadata database
//! - `full`: backfill every dataset over a date range
//! - `update`: incremental update from each dataset's watermark
//! - `retry-failed`: re-fetch symbols recorded as failed
//! - `status`: watermarks, snapshot sizes, partitions and failures
//! - `reset-progress`: restart the per-symbol loop of a mode

use anyhow::{Context, Result};
use ashare_core::data::{
    AkToolsProvider, DataProvider, EastMoneyProvider, PriceRouted, Retrying,
};
use ashare_core::dates::format_date;
use ashare_core::store::{MetaStore, PartitionStore};
use ashare_core::{Dataset, Mode};
use ashare_runner::{AppConfig, Backend, Ingestor, RunSummary};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "ashare",
    about = "A-share main-board data lake, incremental Parquet ingestion"
)]
struct Cli {
    /// TOML config file; environment variables override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create data directories and the metadata database.
    Init,
    /// Backfill every dataset over a date range.
    Full {
        /// Start date (YYYYMMDD). Defaults to the configured start.
        #[arg(long)]
        start_date: Option<String>,

        /// End date (YYYYMMDD or `today`). Defaults to the configured end.
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Fetch everything after each dataset's data watermark.
    Update {
        /// End date (YYYYMMDD or `today`). Defaults to the configured end.
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Re-fetch symbols whose last fetch failed.
    RetryFailed,
    /// Print watermarks, snapshot sizes, partition files and recorded failures.
    Status,
    /// Delete progress watermarks so the next run of that mode starts over.
    ResetProgress {
        /// full or update.
        #[arg(long)]
        mode: Mode,

        /// Only this dataset (e.g. price_daily). Defaults to all.
        #[arg(long)]
        dataset: Option<Dataset>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::Full {
            start_date,
            end_date,
        } => {
            let start = start_date.unwrap_or_else(|| config.default_start());
            let end = resolve_end(end_date, &config);
            run_ingest(&config, "full backfill", |ingestor| {
                ingestor.full(&start, &end)
            })
        }
        Commands::Update { end_date } => {
            let end = resolve_end(end_date, &config);
            run_ingest(&config, "incremental update", |ingestor| {
                ingestor.update(&end)
            })
        }
        Commands::RetryFailed => run_ingest(&config, "retry failed", |ingestor| {
            ingestor.retry_failures()
        }),
        Commands::Status => run_status(&config),
        Commands::ResetProgress { mode, dataset } => run_reset(&config, mode, dataset),
    }
}

fn resolve_end(end_date: Option<String>, config: &AppConfig) -> String {
    match end_date.as_deref() {
        Some("today") => format_date(chrono::Local::now().date_naive()),
        Some(date) => date.to_string(),
        None => config.default_end(),
    }
}

fn open_meta(config: &AppConfig) -> Result<MetaStore> {
    let path = config.meta_db_path();
    MetaStore::open(&path).with_context(|| format!("opening {}", path.display()))
}

fn run_init(config: &AppConfig) -> Result<()> {
    config
        .ensure_dirs()
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    open_meta(config)?;
    tracing::info!(data_dir = %config.data_dir.display(), "storage initialised");
    Ok(())
}

fn run_ingest(
    config: &AppConfig,
    operation: &str,
    run: impl FnOnce(&mut Ingestor<'_>) -> Result<RunSummary, ashare_runner::PipelineError>,
) -> Result<()> {
    config
        .ensure_dirs()
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let provider = build_provider(config)?;
    tracing::info!(
        provider = provider.name(),
        data_source = %config.data_source,
        price_source = config.price_source(),
        "provider ready"
    );

    let meta = open_meta(config)?;
    let mut ingestor = Ingestor::new(config, provider.as_ref(), meta);
    let summary = run(&mut ingestor).with_context(|| format!("{operation} aborted"))?;
    summary.log_summary(operation);
    Ok(())
}

/// The data backend, with daily prices routed to the price backend when it
/// differs. Each backend retries on its own.
fn build_provider(config: &AppConfig) -> Result<Box<dyn DataProvider>> {
    let policy = config.retry_policy();
    let timeout = config.request_timeout();
    let data = match config.data_backend()? {
        Backend::AkTools => {
            Retrying::new(AkToolsProvider::new(&config.aktools_url, timeout)?, policy)
        }
        Backend::EastMoney => anyhow::bail!("eastmoney serves daily prices only"),
    };
    let provider: Box<dyn DataProvider> = match config.price_backend()? {
        Backend::AkTools => Box::new(data),
        Backend::EastMoney => {
            let prices =
                Retrying::new(EastMoneyProvider::new(&config.eastmoney_url, timeout)?, policy);
            Box::new(PriceRouted::new(data, prices))
        }
    };
    Ok(provider)
}

fn run_status(config: &AppConfig) -> Result<()> {
    let db_path = config.meta_db_path();
    if !db_path.exists() {
        println!("No metadata database at {} (run `ashare init`)", db_path.display());
        return Ok(());
    }
    let meta = open_meta(config)?;

    println!("Data directory: {}", config.data_dir.display());
    println!(
        "Snapshots: {} instruments, {} trading days",
        meta.instrument_count()?,
        meta.calendar_count()?
    );

    println!();
    println!("{:<36} {:>12}", "Watermark", "Marker");
    println!("{}", "-".repeat(49));
    for (key, marker) in meta.list_watermarks()? {
        println!("{key:<36} {marker:>12}");
    }

    println!();
    println!(
        "{:<20} {:<6} {:>10} {:>10}  {:<16}",
        "Dataset", "Year", "Rows", "Size", "BLAKE3"
    );
    println!("{}", "-".repeat(68));
    for dataset in Dataset::ALL {
        let store = PartitionStore::new(config.dataset_dir(dataset));
        let partitions = store.partitions()?;
        if partitions.is_empty() {
            println!("{:<20} (no partitions)", dataset.id());
            continue;
        }
        for part in partitions {
            let size = std::fs::metadata(&part.path).map(|m| m.len()).unwrap_or(0);
            println!(
                "{:<20} {:<6} {:>10} {:>10}  {:<16}",
                dataset.id(),
                part.year,
                part.rows,
                format_size(size),
                &part.digest[..16]
            );
        }
    }

    let failures = meta.list_failures()?;
    println!();
    if failures.is_empty() {
        println!("No recorded failures.");
    } else {
        println!("Recorded failures: {}", failures.len());
        for f in &failures {
            println!(
                "  {:<20} {:<7} {:<10} {}..{}  x{}  {}",
                f.dataset.id(),
                f.mode.as_str(),
                f.ts_code,
                f.start_date,
                f.end_date,
                f.attempts,
                f.error
            );
        }
    }
    Ok(())
}

fn run_reset(config: &AppConfig, mode: Mode, dataset: Option<Dataset>) -> Result<()> {
    let meta = open_meta(config)?;
    let removed = meta.clear_progress(mode, dataset)?;
    tracing::info!(
        %mode,
        dataset = dataset.map(|d| d.id()).unwrap_or("all"),
        removed,
        "progress reset"
    );
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
