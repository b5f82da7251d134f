//! Error kinds surfaced by the ingestion and export pipeline
//!
//! Per-file kinds are recorded by the batch runner and never abort a batch.
//! `SessionInvariantViolation` and `Fatal` abort the whole run.

use std::path::PathBuf;

use thiserror::Error;

/// Column of a sales row that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowField {
    ProductCode,
    Quantity,
    UnitPrice,
    TotalPrice,
}

impl RowField {
    /// 1-based worksheet column the field is read from
    pub fn column(&self) -> usize {
        match self {
            RowField::ProductCode => 2,
            RowField::Quantity => 3,
            RowField::UnitPrice => 4,
            RowField::TotalPrice => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RowField::ProductCode => "product code",
            RowField::Quantity => "quantity",
            RowField::UnitPrice => "unit price",
            RowField::TotalPrice => "total price",
        }
    }
}

impl std::fmt::Display for RowField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (column {})", self.label(), self.column())
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// Source workbook is held exclusively by another program
    #[error("file '{file}' is open in another program; close it and retry")]
    FileLocked { file: String },

    /// File name (minus extension) is not a `yyyyMMdd` date
    #[error("file name '{name}' is not a yyyyMMdd date")]
    InvalidFilename { name: String },

    /// Malformed cell content; `row` is 1-based
    #[error("file '{file}' row {row}: {field} is missing or not a valid value")]
    RowValidation {
        file: String,
        row: usize,
        field: RowField,
    },

    /// Engine could not load the workbook at all
    #[error("failed to read workbook '{file}': {source:#}")]
    ReadFailed {
        file: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("PDF conversion failed for '{}': {source:#}", .path.display())]
    ExportFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Transaction rolled back; stored rows for the affected dates are unchanged
    #[error("failed to store sales rows, nothing was written: {source}")]
    StorageWriteFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("automation session misuse: {0}")]
    SessionInvariantViolation(String),

    #[error("a batch run is already in progress")]
    AlreadyRunning,

    #[error("batch aborted: {0:#}")]
    Fatal(#[source] anyhow::Error),
}

impl BatchError {
    /// Whether this error must abort the whole batch instead of a single file
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BatchError::SessionInvariantViolation(_) | BatchError::Fatal(_)
        )
    }

    /// Whether the file was rejected before any engine work started
    pub fn is_rejection(&self) -> bool {
        matches!(self, BatchError::InvalidFilename { .. })
    }

    /// Lift an engine-level failure into the taxonomy.
    ///
    /// Errors that already carry a `BatchError` (session misuse raised inside the
    /// engine layer) keep their kind; everything else is wrapped by `wrap`.
    pub fn from_engine(err: anyhow::Error, wrap: impl FnOnce(anyhow::Error) -> BatchError) -> Self {
        match err.downcast::<BatchError>() {
            Ok(inner) => inner,
            Err(err) => wrap(err),
        }
    }
}
