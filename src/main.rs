use booking_escrow::application::booking_service::BookingService;
use booking_escrow::config::BookingConfig;
use booking_escrow::domain::ports::BookingStoreBox;
use booking_escrow::infrastructure::in_memory::{InMemoryBookingStore, InMemoryCatalog};
use booking_escrow::interfaces::csv::catalog_reader::CatalogReader;
use booking_escrow::interfaces::csv::command_reader::CommandReader;
use booking_escrow::interfaces::csv::report_writer::ReportWriter;
use booking_escrow::interfaces::replay::Replay;
use booking_escrow::logging::LoggingConfig;
use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    /// Ledger balance per credited account
    Balances,
    /// Final state and escrow status per booking label
    Bookings,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Booking commands CSV file
    input: PathBuf,

    /// Service catalog CSV file (`service,provider,price`)
    #[arg(long)]
    catalog: PathBuf,

    /// JSON configuration file. `BOOKING_*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "balances")]
    report: Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    LoggingConfig::from_env().init().into_diagnostic()?;

    let config = match &cli.config {
        Some(path) => BookingConfig::from_json_file(path).into_diagnostic()?,
        None => BookingConfig::default(),
    }
    .with_overrides(|key| std::env::var(key).ok())
    .into_diagnostic()?;

    let catalog = File::open(&cli.catalog).into_diagnostic()?;
    let listings = CatalogReader::new(catalog).listings().into_diagnostic()?;
    info!(services = listings.len(), "catalog loaded");

    let store = open_store(cli.db_path)?;
    let service = BookingService::new(store, Box::new(InMemoryCatalog::from_listings(listings)), config);
    let mut replay = Replay::new(service);

    let file = File::open(&cli.input).into_diagnostic()?;
    for (line, row) in CommandReader::new(file).commands().enumerate() {
        let outcome = match row {
            Ok(row) => replay.apply(row).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_business_rule() => {
                warn!(line = line + 2, error = %e, "command rejected");
            }
            Err(e) => {
                error!(line = line + 2, error = ?e, "command failed");
                return Err(e).into_diagnostic();
            }
        }
    }

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    match cli.report {
        Report::Balances => {
            let balances = replay.service().balances().await.into_diagnostic()?;
            writer.write_balances(&balances).into_diagnostic()?;
        }
        Report::Bookings => {
            let bookings = replay.bookings().await.into_diagnostic()?;
            writer.write_bookings(&bookings).into_diagnostic()?;
        }
    }

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<BookingStoreBox> {
    use booking_escrow::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            info!(path = %path.display(), "opening persistent booking store");
            Ok(Box::new(RocksDBStore::open(path).into_diagnostic()?))
        }
        None => Ok(Box::new(InMemoryBookingStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<BookingStoreBox> {
    if db_path.is_some() {
        warn!(
            "persistent storage requested via --db-path but the storage-rocksdb feature is not enabled, falling back to in-memory storage"
        );
    }
    Ok(Box::new(InMemoryBookingStore::new()))
}
