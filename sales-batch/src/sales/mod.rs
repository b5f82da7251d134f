//! Sales domain: records, derived summaries, and the workbook/PDF components
//!
//! - `excel::reader` turns one daily workbook into `SalesRecord`s
//! - `excel::writer` renders a `MonthlySummary` report workbook
//! - `pdf` converts a workbook to PDF through the automation engine
//! - `report` ties the monthly query to the writer

pub mod excel;
pub mod pdf;
pub mod report;

pub use excel::{read_sales_workbook, write_monthly_summary};
pub use pdf::export_to_pdf;
pub use report::{generate_monthly_report, summary_file_name};

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Date format used in daily file names
pub const SALES_DATE_FORMAT: &str = "%Y%m%d";

static SALES_DATE_STEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}$").expect("valid regex"));

/// One stored sales row, keyed by (sales_date, product_code)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesRecord {
    pub sales_date: NaiveDate,
    pub product_code: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_by: String,
    pub updated_at: NaiveDateTime,
}

/// Daily detail row as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DailySale {
    pub sales_date: NaiveDate,
    pub product_code: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
}

/// Per-product aggregate over a date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MonthlySummary {
    pub product_code: String,
    pub total_quantity: i64,
    pub total_price: i64,
}

/// Derive the sales date from a file name such as `20240501.xlsx`.
///
/// Only the stem is considered and it must be exactly eight digits forming a
/// real calendar date.
pub fn parse_sales_date(file_name: &str) -> Option<NaiveDate> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    if !SALES_DATE_STEM.is_match(stem) {
        return None;
    }
    NaiveDate::parse_from_str(stem, SALES_DATE_FORMAT).ok()
}

/// Parse a `YYYY-MM` month argument into the first day of that month
pub fn parse_month(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{}', expected YYYY-MM", value))
}

/// First and last day (inclusive) of the month containing `day`
pub fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = day.with_day(1).unwrap_or(day);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start);
    (start, end)
}
