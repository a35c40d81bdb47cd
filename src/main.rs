use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use telco_dwh::config::Config;
use telco_dwh::logging;
use telco_dwh::pipeline::Pipeline;
use telco_dwh::warehouse::Warehouse;

#[derive(Parser)]
#[command(name = "telco_dwh")]
#[command(about = "Telecom operational data warehouse loader")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full reset-and-reload pipeline
    Run {
        /// Directory holding the staged CSV exports
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Path of the SQLite warehouse file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print current per-fact-table row counts without loading
    Counts {
        /// Path of the SQLite warehouse file
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run { data_dir, db } => {
            let data_dir = data_dir.unwrap_or_else(|| config.data_dir.clone());
            let db_path = db.unwrap_or_else(|| config.warehouse_path.clone());

            let mut warehouse = Warehouse::open(&db_path)?;
            match Pipeline::run(&mut warehouse, &data_dir) {
                Ok(result) => {
                    println!("\n✅ Warehouse load completed");
                    println!("📊 Final fact row counts:");
                    println!("   fact_usage:       {}", result.facts.usage);
                    println!("   fact_billing:     {}", result.facts.billing);
                    println!("   fact_payment:     {}", result.facts.payment);
                    println!("   fact_network_kpi: {}", result.facts.network_kpi);

                    let total_dropped = result.dropped.usage
                        + result.dropped.billing
                        + result.dropped.payment
                        + result.dropped.network_kpi;
                    if total_dropped > 0 {
                        println!("   (excluded {total_dropped} events with unresolved required references)");
                    }

                    let report = Pipeline::persist_report(&result, &config.report_dir)?;
                    println!("💾 Run report written to {report}");
                }
                Err(e) => {
                    error!("Warehouse load failed: {}", e);
                    println!("❌ Warehouse load failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Counts { db } => {
            let db_path = db.unwrap_or_else(|| config.warehouse_path.clone());
            let warehouse = Warehouse::open(&db_path)?;
            warehouse.ensure_schema()?;
            let counts = warehouse.fact_counts()?;
            println!("fact_usage:       {}", counts.usage);
            println!("fact_billing:     {}", counts.billing);
            println!("fact_payment:     {}", counts.payment);
            println!("fact_network_kpi: {}", counts.network_kpi);
        }
    }
    Ok(())
}
