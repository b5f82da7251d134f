//! Workbook I/O for daily sales files and monthly reports

mod reader;
mod writer;

pub use reader::read_sales_workbook;
pub use writer::{SUMMARY_HEADERS, write_monthly_summary};
