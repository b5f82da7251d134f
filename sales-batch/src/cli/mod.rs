//! Command-line interface

pub mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::batch::BatchOperation;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "sales-batch")]
#[command(about = "Ingest daily sales workbooks, build monthly reports and export PDFs")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to <config dir>/sales-batch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file, overriding the configuration
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register sales from daily workbooks named yyyyMMdd.xlsx
    Ingest(BatchArgs),
    /// Convert workbooks to PDF in a dated folder under the invoice output folder
    Export(BatchArgs),
    /// Show stored sales for one day
    Daily(DailyArgs),
    /// Show per-product totals for one month
    Monthly(MonthlyArgs),
    /// Write the monthly summary workbook
    Report(ReportArgs),
}

#[derive(Args)]
pub struct BatchArgs {
    /// Workbooks or directories of workbooks
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct DailyArgs {
    /// Sales date (YYYY-MM-DD)
    pub date: NaiveDate,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct MonthlyArgs {
    /// Month (YYYY-MM)
    pub month: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct ReportArgs {
    /// Month (YYYY-MM)
    pub month: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Ingest(args) => {
            commands::batch::handle_batch_command(&config, BatchOperation::Ingest, args).await
        }
        Commands::Export(args) => {
            commands::batch::handle_batch_command(&config, BatchOperation::Export, args).await
        }
        Commands::Daily(args) => commands::sales::handle_daily_command(&config, args).await,
        Commands::Monthly(args) => commands::sales::handle_monthly_command(&config, args).await,
        Commands::Report(args) => commands::sales::handle_report_command(&config, args).await,
    }
}
