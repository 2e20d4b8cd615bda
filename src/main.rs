use clap::Parser;
use miette::{IntoDiagnostic, Result};
use split_ledger::application::ledger::Ledger;
use split_ledger::config::LedgerConfig;
use split_ledger::domain::ports::LedgerStoreBox;
use split_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use split_ledger::interfaces::csv::journal_reader::{JournalEntry, JournalReader};
use split_ledger::interfaces::csv::report_writer::ReportWriter;
use split_ledger::logging::init_logging;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input journal CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Deadline for each ledger operation, in milliseconds
    #[arg(long, default_value_t = 5000)]
    deadline_ms: u64,

    /// Report member balances instead of settlement transfers
    #[arg(long)]
    balances: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            use split_ledger::infrastructure::rocksdb::RocksDBStore;
            Ok(Box::new(RocksDBStore::open(path)?))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Box::new(InMemoryLedgerStore::new()))
        }
        None => Ok(Box::new(InMemoryLedgerStore::new())),
    }
}

async fn apply(ledger: &Ledger, entry: JournalEntry) -> split_ledger::error::Result<()> {
    match entry {
        JournalEntry::CreateGroup { name } => {
            ledger.create_group(&name).await?;
        }
        JournalEntry::AddMember { group, name } => {
            ledger.add_member(group, &name).await?;
        }
        JournalEntry::Pay { group, request } => {
            ledger.add_payment(group, request).await?;
        }
        JournalEntry::Patch {
            group,
            payment,
            patch,
        } => {
            ledger.patch_payment(group, payment, patch).await?;
        }
        JournalEntry::Delete { group, payment } => {
            ledger.delete_payment(group, payment).await?;
        }
        JournalEntry::Clear { group } => {
            ledger.delete_all_payments(group).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let config = LedgerConfig::default().with_deadline(Duration::from_millis(cli.deadline_ms));
    let ledger = Ledger::new(open_store(cli.db_path)?, config);

    // Replay the journal; a failed row is reported and skipped.
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = JournalReader::new(file);
    let (mut applied, mut failed) = (0u64, 0u64);
    for (line, entry) in reader.entries().enumerate() {
        let result = match entry {
            Ok(entry) => apply(&ledger, entry).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => applied += 1,
            Err(e) => {
                failed += 1;
                // +2: one for the header row, one for 1-based numbering.
                eprintln!("Error processing journal row {} [{}]: {}", line + 2, e.code(), e);
            }
        }
    }
    info!(applied, failed, "journal replayed");

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    let groups = ledger.groups().await?;
    if cli.balances {
        let mut members = Vec::new();
        for group in &groups {
            members.extend(ledger.members(group.id).await?);
        }
        writer.write_balances(&members)?;
    } else {
        let mut settlements = Vec::with_capacity(groups.len());
        for group in &groups {
            settlements.push(ledger.compute_settlement(group.id).await?);
        }
        writer.write_settlements(&settlements)?;
    }

    Ok(())
}
