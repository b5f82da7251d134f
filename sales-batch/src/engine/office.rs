//! Production engine backed by calamine, rust_xlsxwriter and headless LibreOffice
//!
//! Reading goes through calamine, report authoring through rust_xlsxwriter.
//! PDF rendering shells out to `soffice --headless --convert-to pdf`, using a
//! private user profile per engine instance so concurrent conversions never
//! fight over the default profile lock.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, Sheets, open_workbook_auto};
use rust_xlsxwriter::{Workbook, Worksheet};
use tempfile::TempDir;

use super::{Document, Engine, EngineProcess, PdfExportOptions};

/// LibreOffice filter used for spreadsheet to PDF conversion
const CALC_PDF_FILTER: &str = "pdf:calc_pdf_Export";

#[derive(Debug, Clone)]
pub struct OfficeEngine {
    binary: PathBuf,
}

impl OfficeEngine {
    /// `binary` is the LibreOffice executable (`soffice` when on PATH)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for OfficeEngine {
    fn default() -> Self {
        Self::new("soffice")
    }
}

impl Engine for OfficeEngine {
    fn launch(&self) -> Result<Box<dyn EngineProcess>> {
        let profile = tempfile::Builder::new()
            .prefix("sales-batch-office-")
            .tempdir()
            .context("Failed to create engine profile directory")?;
        log::debug!("Engine instance profile at {}", profile.path().display());

        Ok(Box::new(OfficeProcess {
            binary: self.binary.clone(),
            profile: Some(profile),
            running: true,
        }))
    }
}

struct OfficeProcess {
    binary: PathBuf,
    profile: Option<TempDir>,
    running: bool,
}

impl OfficeProcess {
    fn profile_dir(&self) -> Result<PathBuf> {
        if !self.running {
            bail!("engine instance has already quit");
        }
        self.profile
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .context("engine profile directory is gone")
    }
}

impl EngineProcess for OfficeProcess {
    fn open_read_only(&mut self, path: &Path) -> Result<Box<dyn Document>> {
        let profile = self.profile_dir()?;
        let sheets = open_workbook_auto(path)
            .with_context(|| format!("Failed to open Excel file: {}", path.display()))?;

        Ok(Box::new(OfficeDocument {
            binary: self.binary.clone(),
            profile,
            source: Some(path.to_path_buf()),
            sheets: Some(sheets),
            cells: None,
            workbook: None,
        }))
    }

    fn create_document(&mut self) -> Result<Box<dyn Document>> {
        let profile = self.profile_dir()?;
        let mut workbook = Workbook::new();
        workbook.add_worksheet();

        Ok(Box::new(OfficeDocument {
            binary: self.binary.clone(),
            profile,
            source: None,
            sheets: None,
            cells: None,
            workbook: Some(workbook),
        }))
    }

    fn quit(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            profile
                .close()
                .with_context(|| format!("Failed to remove engine profile: {}", path.display()))?;
        }
        Ok(())
    }
}

struct OfficeDocument {
    binary: PathBuf,
    profile: PathBuf,
    /// Workbook on disk; set for read-only documents and after `save_as`
    source: Option<PathBuf>,
    sheets: Option<Sheets<BufReader<File>>>,
    /// Cached first-sheet grid, released by `release_children`
    cells: Option<Vec<Vec<Data>>>,
    workbook: Option<Workbook>,
}

impl Document for OfficeDocument {
    fn used_range(&mut self) -> Result<Vec<Vec<Data>>> {
        if let Some(cells) = &self.cells {
            return Ok(cells.clone());
        }

        let sheets = self
            .sheets
            .as_mut()
            .context("Document was not opened for reading")?;

        let sheet_name = sheets
            .sheet_names()
            .first()
            .context("Excel file has no sheets")?
            .clone();

        let range = sheets
            .worksheet_range(&sheet_name)
            .with_context(|| format!("Failed to read sheet: {}", sheet_name))?;

        let cells = absolute_grid(&range);
        self.cells = Some(cells.clone());
        Ok(cells)
    }

    fn authoring_sheet(&mut self) -> Result<&mut Worksheet> {
        let workbook = self
            .workbook
            .as_mut()
            .context("Document is read-only")?;
        Ok(workbook.worksheet_from_index(0)?)
    }

    fn save_as(&mut self, path: &Path) -> Result<()> {
        let workbook = self
            .workbook
            .as_mut()
            .context("Document is read-only")?;
        workbook
            .save(path)
            .with_context(|| format!("Failed to save Excel file: {}", path.display()))?;
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    fn export_pdf(&mut self, dest: &Path, options: &PdfExportOptions) -> Result<()> {
        if *options != PdfExportOptions::default() {
            bail!("Unsupported PDF export options: {:?}", options);
        }

        let source = self
            .source
            .clone()
            .context("Document has not been saved; nothing to export")?;

        let outdir = tempfile::Builder::new()
            .prefix("pdf-")
            .tempdir_in(&self.profile)
            .context("Failed to create conversion directory")?;

        log::debug!(
            "Converting {} to PDF with {}",
            source.display(),
            self.binary.display()
        );

        let output = Command::new(&self.binary)
            .arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(format!(
                "-env:UserInstallation={}",
                file_url(&self.profile.join("user"))
            ))
            .arg("--convert-to")
            .arg(CALC_PDF_FILTER)
            .arg("--outdir")
            .arg(outdir.path())
            .arg(&source)
            .output()
            .with_context(|| format!("Failed to run '{}'", self.binary.display()))?;

        if !output.status.success() {
            bail!(
                "'{}' exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stem = source
            .file_stem()
            .context("Source workbook has no file name")?;
        let produced = outdir
            .path()
            .join(format!("{}.pdf", stem.to_string_lossy()));
        if !produced.exists() {
            bail!(
                "Converter produced no PDF for {}: {}",
                source.display(),
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }

        std::fs::copy(&produced, dest)
            .with_context(|| format!("Failed to write PDF: {}", dest.display()))?;

        Ok(())
    }

    fn release_children(&mut self) -> Result<()> {
        self.cells = None;
        Ok(())
    }

    fn close(&mut self, save_changes: bool) -> Result<()> {
        if save_changes && self.workbook.is_some() {
            if let Some(path) = self.source.clone() {
                self.save_as(&path)?;
            }
        }
        self.sheets = None;
        self.workbook = None;
        Ok(())
    }
}

/// Expand a calamine range into a grid addressed from A1
fn absolute_grid(range: &calamine::Range<Data>) -> Vec<Vec<Data>> {
    let Some((last_row, last_col)) = range.end() else {
        return Vec::new();
    };

    (0..=last_row)
        .map(|row| {
            (0..=last_col)
                .map(|col| range.get_value((row, col)).cloned().unwrap_or(Data::Empty))
                .collect()
        })
        .collect()
}

/// `file://` URL for a local path, as LibreOffice expects for `-env:` settings
fn file_url(path: &Path) -> String {
    let raw = path.display().to_string().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{}", raw)
    } else {
        format!("file:///{}", raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("20240501.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(1, 1, "P-001").unwrap();
        sheet.write_number(1, 2, 3).unwrap();
        workbook.save(&path).unwrap();
        path
    }

    #[test]
    fn test_used_range_is_addressed_from_a1() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path());

        let engine = OfficeEngine::default();
        let mut process = engine.launch().unwrap();
        let mut document = process.open_read_only(&path).unwrap();
        let cells = document.used_range().unwrap();

        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0][0], Data::Empty);
        assert_eq!(cells[1][1], Data::String("P-001".into()));
        assert_eq!(cells[1][2], Data::Float(3.0));

        document.release_children().unwrap();
        document.close(false).unwrap();
        process.quit().unwrap();
        process.finalize().unwrap();
    }

    #[test]
    fn test_missing_converter_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path());

        let engine = OfficeEngine::new(dir.path().join("no-such-soffice"));
        let mut process = engine.launch().unwrap();
        let mut document = process.open_read_only(&path).unwrap();
        let err = document
            .export_pdf(&dir.path().join("out.pdf"), &PdfExportOptions::default())
            .unwrap_err();

        assert!(err.to_string().contains("no-such-soffice"));
        assert!(!dir.path().join("out.pdf").exists());
    }

    #[test]
    fn test_non_default_options_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path());

        let mut process = OfficeEngine::default().launch().unwrap();
        let mut document = process.open_read_only(&path).unwrap();
        let options = PdfExportOptions {
            ignore_print_areas: true,
            ..Default::default()
        };

        assert!(document.export_pdf(&dir.path().join("out.pdf"), &options).is_err());
    }

    #[test]
    fn test_finalize_removes_profile() {
        let mut process = OfficeProcess {
            binary: PathBuf::from("soffice"),
            profile: Some(tempfile::tempdir().unwrap()),
            running: true,
        };
        let profile = process.profile_dir().unwrap();
        assert!(profile.exists());

        process.quit().unwrap();
        assert!(process.open_read_only(Path::new("x.xlsx")).is_err());
        process.finalize().unwrap();
        assert!(!profile.exists());
    }

    #[test]
    fn test_file_url() {
        assert_eq!(file_url(Path::new("/tmp/p")), "file:///tmp/p");
        assert_eq!(file_url(Path::new("C:\\tmp\\p")), "file:///C:/tmp/p");
    }
}
