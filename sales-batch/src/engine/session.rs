//! Scoped ownership of one engine instance and its open document
//!
//! A session launches exactly one engine process and holds at most one open
//! document. Teardown always runs child handles -> document -> process ->
//! finalize, and a failure during teardown never replaces the error that
//! caused it. The session is neither `Send` nor `Sync`, so it cannot be
//! shared between threads.

use std::path::Path;

use anyhow::{Context, Result};

use super::{Document, Engine, EngineProcess};
use crate::error::BatchError;

/// Token for the document currently open in a session.
///
/// Deliberately not `Clone`: closing consumes it.
#[derive(Debug)]
pub struct DocumentHandle {
    id: u64,
}

struct OpenDocument {
    id: u64,
    label: String,
    document: Box<dyn Document>,
}

pub struct AutomationSession {
    process: Option<Box<dyn EngineProcess>>,
    open: Option<OpenDocument>,
    next_id: u64,
    finalized: bool,
}

impl AutomationSession {
    /// Launch a fresh engine instance
    pub fn start(engine: &dyn Engine) -> Result<Self> {
        let process = engine.launch().context("Failed to launch document engine")?;
        log::debug!("Automation session started");

        Ok(Self {
            process: Some(process),
            open: None,
            next_id: 1,
            finalized: false,
        })
    }

    /// Run `work` inside a fresh session and tear the session down afterwards.
    ///
    /// The error returned by `work` wins over any teardown error.
    pub fn run<T>(
        engine: &dyn Engine,
        work: impl FnOnce(&mut AutomationSession) -> Result<T>,
    ) -> Result<T> {
        let mut session = Self::start(engine)?;
        let outcome = work(&mut session);
        let teardown = session.shutdown();
        prefer_primary(outcome, teardown)
    }

    /// Open an existing workbook read-only
    pub fn open_for_read(&mut self, path: &Path) -> Result<DocumentHandle> {
        self.ensure_no_open_document()?;
        let document = self
            .process()?
            .open_read_only(path)
            .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

        Ok(self.register(path.display().to_string(), document))
    }

    /// Create a new, empty workbook for report authoring
    pub fn open_for_report_authoring(&mut self) -> Result<DocumentHandle> {
        self.ensure_no_open_document()?;
        let document = self
            .process()?
            .create_document()
            .context("Failed to create report workbook")?;

        Ok(self.register("<new report>".to_string(), document))
    }

    /// Borrow the document behind `handle`
    pub fn document(&mut self, handle: &DocumentHandle) -> Result<&mut dyn Document> {
        match self.open.as_mut() {
            Some(open) if open.id == handle.id => Ok(open.document.as_mut()),
            _ => Err(violation(format!(
                "document handle #{} is not open in this session",
                handle.id
            ))),
        }
    }

    /// Release the document's child handles, then the document itself
    pub fn close(&mut self, handle: DocumentHandle, save_changes: bool) -> Result<()> {
        let open = match self.open.take() {
            Some(open) if open.id == handle.id => open,
            other => {
                self.open = other;
                return Err(violation(format!(
                    "document handle #{} is not open in this session",
                    handle.id
                )));
            }
        };

        release_document(open, save_changes)
    }

    /// Close `handle` and pass `outcome` through.
    ///
    /// A close failure only surfaces when `outcome` itself succeeded.
    pub fn close_with<T>(
        &mut self,
        handle: DocumentHandle,
        save_changes: bool,
        outcome: Result<T>,
    ) -> Result<T> {
        let closed = self.close(handle, save_changes);
        prefer_primary(outcome, closed)
    }

    /// Whether a document is currently open
    pub fn has_open_document(&self) -> bool {
        self.open.is_some()
    }

    /// Close any open document without saving, quit the engine, and finalize.
    ///
    /// Every step runs even when an earlier one fails; the first failure is returned.
    pub fn shutdown(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_error: Option<anyhow::Error> = None;
        let mut keep = |result: Result<()>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    log::warn!("Suppressed engine cleanup error: {:#}", e);
                }
            }
        };

        if let Some(open) = self.open.take() {
            log::debug!("Closing '{}' without saving during teardown", open.label);
            keep(release_document(open, false));
        }

        if let Some(mut process) = self.process.take() {
            keep(process.quit().context("Failed to quit document engine"));
            if !self.finalized {
                self.finalized = true;
                keep(process.finalize().context("Failed to finalize document engine"));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_no_open_document(&self) -> Result<()> {
        match &self.open {
            Some(open) => Err(violation(format!(
                "cannot open a second document while '{}' is still open",
                open.label
            ))),
            None => Ok(()),
        }
    }

    fn process(&mut self) -> Result<&mut Box<dyn EngineProcess>> {
        self.process
            .as_mut()
            .ok_or_else(|| violation("engine process has already been shut down".to_string()))
    }

    fn register(&mut self, label: String, document: Box<dyn Document>) -> DocumentHandle {
        let id = self.next_id;
        self.next_id += 1;
        log::debug!("Opened document #{} ({})", id, label);
        self.open = Some(OpenDocument {
            id,
            label,
            document,
        });
        DocumentHandle { id }
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        if self.process.is_some() || self.open.is_some() {
            if let Err(e) = self.teardown() {
                log::warn!("Engine cleanup failed while dropping session: {:#}", e);
            }
        }
    }
}

fn release_document(mut open: OpenDocument, save_changes: bool) -> Result<()> {
    let children = open
        .document
        .release_children()
        .with_context(|| format!("Failed to release handles of '{}'", open.label));
    let closed = open
        .document
        .close(save_changes)
        .with_context(|| format!("Failed to close '{}'", open.label));
    prefer_primary(children, closed)
}

fn violation(message: String) -> anyhow::Error {
    anyhow::Error::new(BatchError::SessionInvariantViolation(message))
}

/// Keep `primary`'s error; surface `secondary` only when `primary` succeeded
fn prefer_primary<T>(primary: Result<T>, secondary: Result<()>) -> Result<T> {
    match (primary, secondary) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(suppressed)) => {
            log::warn!("Suppressed engine cleanup error: {:#}", suppressed);
            Err(e)
        }
    }
}
