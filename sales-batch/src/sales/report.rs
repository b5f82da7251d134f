//! Monthly summary report: query the store, render the workbook

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::config::repository::sales;
use crate::engine::Engine;
use crate::sales::{month_bounds, write_monthly_summary};

/// Folder under the sales output folder that receives monthly reports
pub const SUMMARY_FOLDER: &str = "MonthlySummary";

/// `Summary_yyyyMM.xlsx` for the month containing `month`
pub fn summary_file_name(month: NaiveDate) -> String {
    format!("Summary_{}.xlsx", month.format("%Y%m"))
}

/// Build the summary report for the month containing `month`.
///
/// Returns `Ok(None)` without writing anything when the month has no sales.
pub async fn generate_monthly_report(
    pool: &SqlitePool,
    engine: Arc<dyn Engine>,
    output_base: &Path,
    month: NaiveDate,
) -> Result<Option<PathBuf>> {
    let (start, end) = month_bounds(month);
    let rows = sales::get_monthly_summary(pool, start, end).await?;

    if rows.is_empty() {
        log::info!("No sales between {} and {}; report skipped", start, end);
        return Ok(None);
    }

    let folder = output_base.join(SUMMARY_FOLDER);
    std::fs::create_dir_all(&folder)
        .with_context(|| format!("Failed to create report folder: {}", folder.display()))?;
    let path = folder.join(summary_file_name(start));

    let target = path.clone();
    tokio::task::spawn_blocking(move || {
        write_monthly_summary(engine.as_ref(), &target, &rows, start)
    })
        .await
        .context("Report writer task panicked")??;

    Ok(Some(path))
}
