//! Document automation engine
//!
//! The pipeline never touches workbook files directly. It goes through an
//! [`Engine`], which launches one [`EngineProcess`] per [`AutomationSession`],
//! which in turn opens at most one [`Document`] at a time.
//!
//! [`OfficeEngine`] is the production backend; tests plug in fakes.

pub mod office;
pub mod session;

pub use office::OfficeEngine;
pub use session::{AutomationSession, DocumentHandle};

use std::path::Path;

use anyhow::Result;
use calamine::Data;
use rust_xlsxwriter::Worksheet;

/// Options for fixed-layout (PDF) rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfExportOptions {
    /// Embed document properties (title, author, ...) in the PDF
    pub include_doc_properties: bool,
    /// Render the whole sheet even when print areas are defined
    pub ignore_print_areas: bool,
    /// Launch a viewer on the produced file
    pub open_after_publish: bool,
}

impl Default for PdfExportOptions {
    fn default() -> Self {
        Self {
            include_doc_properties: true,
            ignore_print_areas: false,
            open_after_publish: false,
        }
    }
}

/// Factory for engine processes
pub trait Engine: Send + Sync {
    /// Start a fresh engine instance
    fn launch(&self) -> Result<Box<dyn EngineProcess>>;
}

/// One running engine instance
///
/// Not `Send`: an instance is owned by the thread that launched it.
pub trait EngineProcess {
    /// Open an existing workbook without write access
    fn open_read_only(&mut self, path: &Path) -> Result<Box<dyn Document>>;

    /// Create an empty workbook with a single worksheet
    fn create_document(&mut self) -> Result<Box<dyn Document>>;

    /// Ask the instance to exit
    fn quit(&mut self) -> Result<()>;

    /// Reclaim resources the instance deferred past `quit`
    fn finalize(&mut self) -> Result<()>;
}

/// A workbook opened by an engine instance
pub trait Document {
    /// Cell values of the first worksheet, row-major, addressed from A1.
    ///
    /// Rows end at the last used row; short rows are padded with `Data::Empty`.
    fn used_range(&mut self) -> Result<Vec<Vec<Data>>>;

    /// First worksheet of a document opened for authoring
    fn authoring_sheet(&mut self) -> Result<&mut Worksheet>;

    fn save_as(&mut self, path: &Path) -> Result<()>;

    /// Render the active sheet as PDF at `dest`
    fn export_pdf(&mut self, dest: &Path, options: &PdfExportOptions) -> Result<()>;

    /// Drop sheet and range handles acquired while working with the document
    fn release_children(&mut self) -> Result<()>;

    fn close(&mut self, save_changes: bool) -> Result<()>;
}
