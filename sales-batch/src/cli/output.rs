//! Console rendering for batch events and query results

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;

use super::OutputFormat;
use crate::batch::{BatchEvent, NotificationAction, RunResult, Severity};
use crate::sales::{DailySale, MonthlySummary};

pub fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::Started { operation, total } => {
            println!(
                "{} {} ({} file(s))",
                "Starting".bold(),
                operation.to_string().bold(),
                total
            );
        }
        BatchEvent::Progress { percent, message } => {
            println!("[{:>3}%] {}", percent, message.cyan());
        }
        BatchEvent::Status(status) => {
            log::debug!("Status: {}", status);
        }
        BatchEvent::FileFailed { file, reason } => {
            println!("  {} {}: {}", "✗".red(), file.red().bold(), reason);
        }
        BatchEvent::Notify(notification) => {
            let message = match notification.severity {
                Severity::Info => notification.message.green(),
                Severity::Warning => notification.message.yellow(),
                Severity::Error => notification.message.red(),
            };
            println!("{}", message);
            if let Some(NotificationAction::OpenFolder(dir)) = &notification.action {
                println!("  Output folder: {}", dir.display().to_string().bright_green());
            }
        }
        BatchEvent::Finished(result) => match result {
            RunResult::NothingToDo => {}
            RunResult::Completed(outcome) => {
                println!(
                    "{} attempted, {} succeeded, {} failed{}",
                    outcome.attempted,
                    outcome.succeeded.to_string().green(),
                    outcome.failed().to_string().red(),
                    if outcome.rejected.is_empty() {
                        String::new()
                    } else {
                        format!(", {} rejected", outcome.rejected.len())
                    }
                );
            }
            RunResult::Failed { reason, .. } => {
                println!("{} {}", "Batch aborted:".red().bold(), reason);
            }
        },
    }
}

pub fn print_daily_sales(rows: &[DailySale], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(rows),
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No sales found".yellow());
                return Ok(());
            }
            println!(
                "{:<12} {:<16} {:>10} {:>12} {:>14}",
                "Date".bold(),
                "Product Code".bold(),
                "Quantity".bold(),
                "Unit Price".bold(),
                "Total Price".bold()
            );
            for row in rows {
                println!(
                    "{:<12} {:<16} {:>10} {:>12} {:>14}",
                    row.sales_date.to_string(),
                    row.product_code,
                    group_thousands(row.quantity),
                    group_thousands(row.unit_price),
                    group_thousands(row.total_price)
                );
            }
            Ok(())
        }
    }
}

pub fn print_monthly_summary(rows: &[MonthlySummary], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(rows),
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No sales found".yellow());
                return Ok(());
            }
            println!(
                "{:<16} {:>14} {:>14}",
                "Product Code".bold(),
                "Total Quantity".bold(),
                "Total Price".bold()
            );
            for row in rows {
                println!(
                    "{:<16} {:>14} {:>14}",
                    row.product_code,
                    group_thousands(row.total_quantity),
                    group_thousands(row.total_price)
                );
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(rows: &[T]) -> Result<()> {
    let json = serde_json::to_string_pretty(rows).context("Failed to format JSON output")?;
    println!("{}", json);
    Ok(())
}

/// `1234567` -> `1,234,567`
fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(-45_000), "-45,000");
    }
}
