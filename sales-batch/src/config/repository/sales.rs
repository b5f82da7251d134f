//! Sales history repository
//!
//! All reads and writes of `sales_history` go through these functions.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::error::BatchError;
use crate::sales::{DailySale, MonthlySummary, SalesRecord};

/// Get all rows stored for one sales date, ordered by product code
pub async fn get_daily_sales(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<DailySale>> {
    let rows = sqlx::query_as::<_, DailySale>(
        "SELECT sales_date, product_code, quantity, unit_price, total_price
         FROM sales_history
         WHERE sales_date = ?
         ORDER BY product_code",
    )
    .bind(date)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to get daily sales for {}", date))?;

    Ok(rows)
}

/// Sum quantity and total price per product over `start..=end`
pub async fn get_monthly_summary(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MonthlySummary>> {
    let rows = sqlx::query_as::<_, MonthlySummary>(
        "SELECT product_code,
                SUM(quantity) AS total_quantity,
                SUM(total_price) AS total_price
         FROM sales_history
         WHERE sales_date BETWEEN ? AND ?
         GROUP BY product_code
         ORDER BY product_code",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to get sales summary for {} to {}", start, end))?;

    Ok(rows)
}

/// Replace every stored row for the dates present in `rows` with `rows`.
///
/// Runs in a single transaction: either all affected dates are replaced or
/// nothing changes. Re-ingesting the same rows converges to the same state.
pub async fn upsert_sales_batch(pool: &SqlitePool, rows: &[SalesRecord]) -> Result<(), BatchError> {
    if rows.is_empty() {
        return Ok(());
    }

    let dates: BTreeSet<NaiveDate> = rows.iter().map(|r| r.sales_date).collect();

    let mut tx = pool
        .begin()
        .await
        .map_err(|source| BatchError::StorageWriteFailed { source })?;

    match replace_dates(&mut tx, &dates, rows).await {
        Ok(()) => {
            tx.commit()
                .await
                .map_err(|source| BatchError::StorageWriteFailed { source })?;
            log::debug!(
                "Stored {} sales rows for {} date(s)",
                rows.len(),
                dates.len()
            );
            Ok(())
        }
        Err(source) => {
            if let Err(e) = tx.rollback().await {
                log::warn!("Rollback of sales batch failed: {}", e);
            }
            Err(BatchError::StorageWriteFailed { source })
        }
    }
}

async fn replace_dates(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    dates: &BTreeSet<NaiveDate>,
    rows: &[SalesRecord],
) -> std::result::Result<(), sqlx::Error> {
    for date in dates {
        sqlx::query("DELETE FROM sales_history WHERE sales_date = ?")
            .bind(date)
            .execute(&mut **tx)
            .await?;
    }

    for row in rows {
        sqlx::query(
            "INSERT INTO sales_history
                (sales_date, product_code, quantity, unit_price, total_price,
                 created_by, created_at, updated_by, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.sales_date)
        .bind(&row.product_code)
        .bind(row.quantity)
        .bind(row.unit_price)
        .bind(row.total_price)
        .bind(&row.created_by)
        .bind(row.created_at)
        .bind(&row.updated_by)
        .bind(row.updated_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
