//! # Migration Runner
//!
//! Brings a Factura database up to date: migrations, sequence-index
//! reconciliation, then invoice number repair.
//!
//! ## Usage
//! ```bash
//! # Use factura.toml from the platform config dir (or defaults)
//! cargo run -p factura-db --bin factura-maint
//!
//! # Explicit config and database
//! cargo run -p factura-db --bin factura-maint -- --config ./factura.toml --db ./data/factura.db
//!
//! # Schema only
//! cargo run -p factura-db --bin factura-maint -- --skip-repair
//! ```
//!
//! Stop invoice creation while this runs. Every step is idempotent, so an
//! interrupted run can simply be started again.

use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use factura_core::SystemClock;
use factura_db::{reconcile_sequence_index, repair_invoice_numbers, Database, FacturaConfig};

/// Log filter when RUST_LOG is unset.
const DEFAULT_LOG_FILTER: &str = "info,factura_db=info,sqlx=warn";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;
    let mut skip_repair = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--skip-repair" => skip_repair = true,
            "--help" | "-h" => {
                println!("Factura Migration Runner");
                println!();
                println!("Usage: factura-maint [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir/factura.toml)");
                println!("  -d, --db <PATH>      Database file, overrides the config");
                println!("      --skip-repair    Run migrations and reconciliation only");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mut config = FacturaConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("Factura Migration Runner");
    println!("========================");
    println!("Database:      {}", config.database.path.display());
    println!("Time zone:     {}", config.allocator.time_zone);
    println!("Repair period: {}", config.repair.period);
    println!();

    // Connecting runs the embedded migrations
    let db = Database::new(config.db_config()).await?;
    println!("✓ Migrations applied");

    let reconcile = reconcile_sequence_index(&db).await?;
    if reconcile.is_noop() {
        println!("✓ Sequence index already in shape");
    } else {
        println!("✓ Sequence index reconciled");
        for name in &reconcile.dropped {
            println!("  Dropped index {}", name);
        }
        for name in &reconcile.rebuilt {
            println!("  Rebuilt table without {}", name);
        }
        if reconcile.created {
            println!("  Created composite (store_id, year, month) index");
        }
    }

    if skip_repair {
        println!("- Invoice repair skipped");
    } else {
        let report = repair_invoice_numbers(&db, &SystemClock, &config.repair).await?;
        println!("✓ Invoice numbers repaired");
        println!("  Scanned:         {}", report.scanned);
        println!("  Retained:        {}", report.retained);
        println!("  Reassigned:      {}", report.reassigned);
        println!("  Failed:          {}", report.failed);
        println!("  Counters raised: {}", report.counters_raised);
        if report.index_created {
            println!("  Created unique index on invoices(number)");
        }
        if report.failed > 0 {
            println!();
            println!("⚠ {} invoices could not be repaired, see the log and rerun", report.failed);
        }
    }

    db.close().await;

    println!();
    println!("✓ Maintenance complete!");

    Ok(())
}

/// Installs the fmt subscriber, honoring RUST_LOG.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
