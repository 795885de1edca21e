//! Strata Command-Line Driver
//!
//! Runs the migration described by a JSON plan against a database, or
//! reports how far it has come.

mod commands;
mod formatter;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use strata_core::{MigrationPlan, StepperConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Strata online table migration
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "Online table migration for SQLite")]
pub struct Args {
    /// Destination database file
    #[arg(short, long)]
    pub database: PathBuf,

    /// JSON migration plan
    #[arg(short, long)]
    pub plan: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy rows until every planned table is migrated
    Migrate {
        /// Pause between steps, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Stop after this many steps even if work remains
        #[arg(long)]
        max_steps: Option<u64>,

        /// Target duration of one copy transaction, in milliseconds
        #[arg(long, default_value_t = 10)]
        step_ms: u64,
    },
    /// Show the migration state of every planned table
    Status {
        /// Output format
        #[arg(long, default_value = "table", value_enum)]
        format: OutputFormat,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let database = args.database.to_string_lossy().into_owned();
    let plan = MigrationPlan::load(&args.plan)?;

    match args.command {
        Command::Migrate {
            interval_ms,
            max_steps,
            step_ms,
        } => {
            let config =
                StepperConfig::default().with_max_expecting_duration(Duration::from_millis(step_ms));
            let mut session = commands::Session::open(&database, plan, config)?;
            let options = commands::MigrateOptions {
                interval: Duration::from_millis(interval_ms),
                max_steps,
            };
            let report = commands::migrate(&mut session, &options)?;
            if report.finished {
                println!(
                    "Migrated in {} step(s), {:.2?}",
                    report.steps, report.elapsed
                );
            } else {
                println!(
                    "Stopped after {} step(s), {:.2?}; tables still migrating: {}",
                    report.steps,
                    report.elapsed,
                    report.remaining.join(", ")
                );
            }
        }
        Command::Status { format } => {
            let session = commands::Session::open(&database, plan, StepperConfig::default())?;
            let rows = commands::status(&session)?;
            println!("{}", formatter::format_status(&rows, format)?);
            if format == OutputFormat::Table {
                let paths = session.migration().paths_of_source_databases();
                if !paths.is_empty() {
                    let paths: Vec<String> = paths.into_iter().collect();
                    println!("Attached source databases: {}", paths.join(", "));
                }
            }
        }
    }
    Ok(())
}
