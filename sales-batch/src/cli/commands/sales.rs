//! `daily`, `monthly` and `report` command handlers

use std::sync::Arc;

use anyhow::Result;
use colored::*;

use crate::cli::output::{print_daily_sales, print_monthly_summary};
use crate::cli::{DailyArgs, MonthlyArgs, ReportArgs};
use crate::config::Config;
use crate::config::repository::sales;
use crate::engine::OfficeEngine;
use crate::sales::{generate_monthly_report, month_bounds, parse_month};

pub async fn handle_daily_command(config: &Config, args: DailyArgs) -> Result<()> {
    let pool = config.connect().await?;
    let rows = sales::get_daily_sales(&pool, args.date).await?;
    print_daily_sales(&rows, args.format)
}

pub async fn handle_monthly_command(config: &Config, args: MonthlyArgs) -> Result<()> {
    let month = parse_month(&args.month)?;
    let (start, end) = month_bounds(month);

    let pool = config.connect().await?;
    let rows = sales::get_monthly_summary(&pool, start, end).await?;
    print_monthly_summary(&rows, args.format)
}

pub async fn handle_report_command(config: &Config, args: ReportArgs) -> Result<()> {
    let month = parse_month(&args.month)?;
    let pool = config.connect().await?;
    let engine = Arc::new(OfficeEngine::new(config.office_binary.clone()));

    match generate_monthly_report(&pool, engine, &config.sales_output_dir(), month).await? {
        Some(path) => println!(
            "{} {}",
            "Monthly summary written to".green(),
            path.display().to_string().bright_green().bold()
        ),
        None => println!(
            "{}",
            format!("No sales recorded for {}; no report written.", month.format("%Y-%m")).yellow()
        ),
    }

    Ok(())
}
