//! Render a monthly summary workbook

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Worksheet};

use crate::engine::{AutomationSession, Engine};
use crate::sales::MonthlySummary;

/// Column titles of the summary table (row 2)
pub const SUMMARY_HEADERS: [&str; 3] = ["Product Code", "Total Quantity", "Total Price"];

const TITLE_ROW: u32 = 0;
const HEADER_ROW: u32 = 1;
const FIRST_DATA_ROW: u32 = 2;

/// Write `rows` as a formatted summary workbook at `path`.
///
/// Any existing file at `path` is replaced. An empty `rows` still produces
/// a workbook with the title and header.
pub fn write_monthly_summary(
    engine: &dyn Engine,
    path: &Path,
    rows: &[MonthlySummary],
    period: NaiveDate,
) -> Result<()> {
    AutomationSession::run(engine, |session| {
        let handle = session.open_for_report_authoring()?;

        let outcome = session
            .document(&handle)
            .and_then(|doc| {
                fill_summary_sheet(doc.authoring_sheet()?, rows, period)?;

                if path.exists() {
                    std::fs::remove_file(path).with_context(|| {
                        format!("Failed to replace existing report: {}", path.display())
                    })?;
                }
                doc.save_as(path)
            });

        session.close_with(handle, false, outcome)
    })?;

    log::info!(
        "Monthly summary with {} products written to: {}",
        rows.len(),
        path.display()
    );
    Ok(())
}

fn fill_summary_sheet(
    sheet: &mut Worksheet,
    rows: &[MonthlySummary],
    period: NaiveDate,
) -> Result<()> {
    let month = period.format("%Y-%m").to_string();
    sheet.set_name(format!("{} summary", month))?;

    let title_format = Format::new()
        .set_bold()
        .set_font_size(14)
        .set_align(FormatAlign::Center);

    let header_format = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_background_color(Color::RGB(0xD3D3D3))
        .set_border(FormatBorder::Thin);

    let text_format = Format::new().set_border(FormatBorder::Thin);

    let number_format = Format::new()
        .set_num_format("#,##0")
        .set_border(FormatBorder::Thin);

    // Title spans the table width
    sheet.merge_range(
        TITLE_ROW,
        0,
        TITLE_ROW,
        (SUMMARY_HEADERS.len() - 1) as u16,
        &format!("{} monthly sales summary", month),
        &title_format,
    )?;

    for (col, title) in SUMMARY_HEADERS.iter().enumerate() {
        sheet.write_string_with_format(HEADER_ROW, col as u16, *title, &header_format)?;
    }

    for (idx, summary) in rows.iter().enumerate() {
        let row = FIRST_DATA_ROW + idx as u32;
        sheet.write_string_with_format(row, 0, &summary.product_code, &text_format)?;
        sheet.write_number_with_format(row, 1, summary.total_quantity as f64, &number_format)?;
        sheet.write_number_with_format(row, 2, summary.total_price as f64, &number_format)?;
    }

    sheet.autofit();
    Ok(())
}
