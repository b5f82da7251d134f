//! Sequential batch runner with progress events
//!
//! One run at a time per runner. Files are processed strictly in order, each
//! on a blocking worker with its own automation session. A failing file is
//! recorded and the run moves on; only fatal errors end a run early.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use chrono::{Local, NaiveDate};
use sqlx::SqlitePool;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::files::FileTask;
use crate::config::Config;
use crate::config::repository::sales;
use crate::engine::Engine;
use crate::error::BatchError;
use crate::sales::{SALES_DATE_FORMAT, export_to_pdf, parse_sales_date, read_sales_workbook};

const IDLE_STATUS: &str = "Idle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    /// Read daily sales workbooks into the store
    Ingest,
    /// Render workbooks as PDF into the dated export folder
    Export,
}

impl BatchOperation {
    fn progress_label(&self) -> &'static str {
        match self {
            BatchOperation::Ingest => "Registering sales",
            BatchOperation::Export => "Creating PDF",
        }
    }
}

impl std::fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchOperation::Ingest => write!(f, "sales ingestion"),
            BatchOperation::Export => write!(f, "PDF export"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationAction {
    OpenFolder(PathBuf),
}

/// User-facing message emitted when a run completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub action: Option<NotificationAction>,
}

impl Notification {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            action: None,
        }
    }

    fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub file: String,
    pub reason: String,
}

/// Tally of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub operation: BatchOperation,
    /// Files selected for the run
    pub selected: usize,
    /// Files the run got to, including rejected ones
    pub attempted: usize,
    pub succeeded: usize,
    /// In processing order
    pub failed_items: Vec<FailedItem>,
    /// Ingest only: files refused because the name is not a date
    pub rejected: Vec<String>,
    /// Export only: the dated folder receiving PDFs
    pub output_dir: Option<PathBuf>,
    pub cancelled: bool,
}

impl BatchOutcome {
    fn new(operation: BatchOperation, selected: usize) -> Self {
        Self {
            operation,
            selected,
            attempted: 0,
            succeeded: 0,
            failed_items: Vec::new(),
            rejected: Vec::new(),
            output_dir: None,
            cancelled: false,
        }
    }

    pub fn failed(&self) -> usize {
        self.failed_items.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// No file was selected; nothing ran
    NothingToDo,
    Completed(BatchOutcome),
    /// Aborted by a fatal error; `partial` holds what finished before it
    Failed { reason: String, partial: BatchOutcome },
}

/// Events of one run, delivered in order; `Finished` is always last
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started { operation: BatchOperation, total: usize },
    Progress { percent: u8, message: String },
    Status(String),
    FileFailed { file: String, reason: String },
    Notify(Notification),
    Finished(RunResult),
}

/// Runner settings taken from [`Config`]
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Base folder; each export run writes into a `yyyyMMdd` subfolder
    pub invoice_output_folder: PathBuf,
    /// Audit identifier stamped on ingested rows
    pub actor: String,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            invoice_output_folder: config.invoice_output_dir(),
            actor: config.actor.clone(),
        }
    }
}

struct BatchContext {
    engine: Arc<dyn Engine>,
    pool: SqlitePool,
    settings: BatchSettings,
}

pub struct BatchRunner {
    ctx: Arc<BatchContext>,
    running: Arc<AtomicBool>,
}

/// A run in flight
pub struct BatchHandle {
    operation: BatchOperation,
    selected: usize,
    task: JoinHandle<RunResult>,
    cancel_flag: Arc<AtomicBool>,
}

impl BatchHandle {
    /// Wait for the run to finish
    pub async fn wait(self) -> RunResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Batch task ended abnormally: {}", e);
                RunResult::Failed {
                    reason: format!("batch task ended abnormally: {}", e),
                    partial: BatchOutcome::new(self.operation, self.selected),
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop before the next file; the file in progress always completes
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }
}

/// Holds the running flag for one run; releasing it restores idle status
struct RunGuard {
    running: Arc<AtomicBool>,
    events: UnboundedSender<BatchEvent>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.send(BatchEvent::Status(IDLE_STATUS.to_string()));
    }
}

impl BatchRunner {
    pub fn new(engine: Arc<dyn Engine>, pool: SqlitePool, settings: BatchSettings) -> Self {
        Self {
            ctx: Arc::new(BatchContext {
                engine,
                pool,
                settings,
            }),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.running.load(Ordering::SeqCst) {
            RunStatus::Running
        } else {
            RunStatus::Idle
        }
    }

    pub fn start_ingest(
        &self,
        files: Vec<FileTask>,
        events: UnboundedSender<BatchEvent>,
    ) -> Result<BatchHandle, BatchError> {
        self.start(BatchOperation::Ingest, files, events)
    }

    pub fn start_export(
        &self,
        files: Vec<FileTask>,
        events: UnboundedSender<BatchEvent>,
    ) -> Result<BatchHandle, BatchError> {
        self.start(BatchOperation::Export, files, events)
    }

    /// Start a run over the selected entries of `files`.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`BatchError::AlreadyRunning`] while another run of this runner is active.
    pub fn start(
        &self,
        operation: BatchOperation,
        files: Vec<FileTask>,
        events: UnboundedSender<BatchEvent>,
    ) -> Result<BatchHandle, BatchError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(BatchError::AlreadyRunning);
        }

        let cancel_flag = Arc::new(AtomicBool::new(false));
        let tasks: Vec<FileTask> = files.into_iter().filter(|f| f.selected).collect();

        if tasks.is_empty() {
            log::info!("No files selected for {}", operation);
            let _ = events.send(BatchEvent::Notify(Notification::new(
                Severity::Info,
                "No files selected for processing.",
            )));
            let _ = events.send(BatchEvent::Finished(RunResult::NothingToDo));
            return Ok(BatchHandle {
                operation,
                selected: 0,
                task: tokio::spawn(async { RunResult::NothingToDo }),
                cancel_flag,
            });
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BatchError::AlreadyRunning);
        }

        let selected = tasks.len();
        let guard = RunGuard {
            running: self.running.clone(),
            events: events.clone(),
        };
        let ctx = self.ctx.clone();
        let cancel = cancel_flag.clone();

        let task = tokio::spawn(async move {
            log::info!("Starting {} of {} file(s)", operation, tasks.len());
            let _ = events.send(BatchEvent::Started {
                operation,
                total: tasks.len(),
            });
            let _ = events.send(BatchEvent::Status("Starting batch...".to_string()));

            let result = execute(&ctx, operation, &tasks, &events, &cancel).await;

            if let RunResult::Failed { reason, .. } = &result {
                let _ = events.send(BatchEvent::Notify(Notification::new(
                    Severity::Error,
                    format!("{} aborted: {}", operation, reason),
                )));
            }

            drop(guard);
            log_result(&result);
            let _ = events.send(BatchEvent::Finished(result.clone()));
            result
        });

        Ok(BatchHandle {
            operation,
            selected,
            task,
            cancel_flag,
        })
    }
}

async fn execute(
    ctx: &BatchContext,
    operation: BatchOperation,
    tasks: &[FileTask],
    events: &UnboundedSender<BatchEvent>,
    cancel: &AtomicBool,
) -> RunResult {
    let total = tasks.len();
    let mut outcome = BatchOutcome::new(operation, total);

    let export_dir = match operation {
        BatchOperation::Ingest => None,
        BatchOperation::Export => {
            let today = Local::now().date_naive();
            match prepare_export_dir(&ctx.settings.invoice_output_folder, today) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    return RunResult::Failed {
                        reason: BatchError::Fatal(e).to_string(),
                        partial: outcome,
                    };
                }
            }
        }
    };
    outcome.output_dir = export_dir.clone();

    for (idx, task) in tasks.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            log::info!("{} cancelled before {}", operation, task.display_name);
            outcome.cancelled = true;
            break;
        }

        let _ = events.send(BatchEvent::Progress {
            percent: progress_percent(idx, total),
            message: format!(
                "{} ({}/{}): {}",
                operation.progress_label(),
                idx + 1,
                total,
                task.display_name
            ),
        });
        outcome.attempted += 1;

        let result = match &export_dir {
            None => ingest_file(ctx, task).await,
            Some(dir) => export_file(ctx, task, dir).await,
        };

        match result {
            Ok(()) => outcome.succeeded += 1,
            Err(e) if e.is_fatal() => {
                log::error!("Aborting {} at {}: {}", operation, task.display_name, e);
                return RunResult::Failed {
                    reason: e.to_string(),
                    partial: outcome,
                };
            }
            Err(e) if e.is_rejection() => {
                log::warn!("Skipping {}: {}", task.display_name, e);
                outcome.rejected.push(task.display_name.clone());
            }
            Err(e) => {
                log::error!("{} failed for {}: {:#}", operation, task.display_name, e);
                let reason = e.to_string();
                let _ = events.send(BatchEvent::FileFailed {
                    file: task.display_name.clone(),
                    reason: reason.clone(),
                });
                outcome.failed_items.push(FailedItem {
                    file: task.display_name.clone(),
                    reason,
                });
            }
        }
    }

    let _ = events.send(BatchEvent::Progress {
        percent: progress_percent(outcome.attempted, total),
        message: "Done".to_string(),
    });

    for notification in completion_notifications(&outcome) {
        let _ = events.send(BatchEvent::Notify(notification));
    }

    RunResult::Completed(outcome)
}

async fn ingest_file(ctx: &BatchContext, task: &FileTask) -> Result<(), BatchError> {
    // Reject before any engine or store work
    if parse_sales_date(&task.display_name).is_none() {
        return Err(BatchError::InvalidFilename {
            name: task.display_name.clone(),
        });
    }

    let engine = ctx.engine.clone();
    let path = task.path.clone();
    let name = task.display_name.clone();
    let actor = ctx.settings.actor.clone();

    let rows = tokio::task::spawn_blocking(move || {
        read_sales_workbook(engine.as_ref(), &path, &name, &actor)
    })
    .await
    .map_err(|e| BatchError::ReadFailed {
        file: task.display_name.clone(),
        source: anyhow::Error::new(e).context("Reader task ended abnormally"),
    })??;

    sales::upsert_sales_batch(&ctx.pool, &rows).await?;
    log::info!("Registered {} rows from {}", rows.len(), task.display_name);
    Ok(())
}

async fn export_file(ctx: &BatchContext, task: &FileTask, dir: &Path) -> Result<(), BatchError> {
    let engine = ctx.engine.clone();
    let source = task.path.clone();
    let dest = pdf_destination(dir, task);

    tokio::task::spawn_blocking(move || export_to_pdf(engine.as_ref(), &source, &dest))
        .await
        .map_err(|e| BatchError::ExportFailed {
            path: task.path.clone(),
            source: anyhow::Error::new(e).context("Export task ended abnormally"),
        })?
}

/// `<base>/<yyyyMMdd>`, created if missing
fn prepare_export_dir(base: &Path, today: NaiveDate) -> anyhow::Result<PathBuf> {
    let dir = base.join(today.format(SALES_DATE_FORMAT).to_string());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output folder: {}", dir.display()))?;
    Ok(dir)
}

fn pdf_destination(dir: &Path, task: &FileTask) -> PathBuf {
    let stem = task
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| task.display_name.clone());
    dir.join(format!("{}.pdf", stem))
}

fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u8
}

fn completion_notifications(outcome: &BatchOutcome) -> Vec<Notification> {
    let mut notes = Vec::new();

    if !outcome.rejected.is_empty() {
        notes.push(Notification::new(
            Severity::Warning,
            format!(
                "{} file(s) skipped because the name is not a yyyyMMdd date: {}",
                outcome.rejected.len(),
                outcome.rejected.join(", ")
            ),
        ));
    }

    let summary = match outcome.operation {
        BatchOperation::Ingest => format!(
            "Sales registration finished ({} succeeded, {} failed).",
            outcome.succeeded,
            outcome.failed()
        ),
        BatchOperation::Export => format!(
            "PDF export finished ({} succeeded, {} failed).",
            outcome.succeeded,
            outcome.failed()
        ),
    };
    let severity = if outcome.failed_items.is_empty() {
        Severity::Info
    } else {
        Severity::Warning
    };
    let mut summary = Notification::new(severity, summary);
    if let Some(dir) = &outcome.output_dir {
        summary = summary.with_action(NotificationAction::OpenFolder(dir.clone()));
    }
    notes.push(summary);

    if outcome.cancelled {
        notes.push(Notification::new(
            Severity::Warning,
            format!(
                "Cancelled; {} selected file(s) were not processed.",
                outcome.selected - outcome.attempted
            ),
        ));
    }

    notes
}

fn log_result(result: &RunResult) {
    match result {
        RunResult::NothingToDo => {}
        RunResult::Completed(outcome) => log::info!(
            "{} finished: {} attempted, {} succeeded, {} failed, {} rejected",
            outcome.operation,
            outcome.attempted,
            outcome.succeeded,
            outcome.failed(),
            outcome.rejected.len()
        ),
        RunResult::Failed { reason, partial } => log::error!(
            "{} aborted after {} file(s): {}",
            partial.operation,
            partial.attempted,
            reason
        ),
    }
}

#[cfg(test)]
mod tests {
    use calamine::Data;
    use rust_xlsxwriter::Workbook;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::test_pool;
    use crate::engine::OfficeEngine;
    use crate::engine::session::fake::{FakeBehavior, FakeEngine};

    fn write_daily(dir: &Path, name: &str, code: &str) -> FileTask {
        let path = dir.join(name);
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "No").unwrap();
        sheet.write_string(0, 1, "Product Code").unwrap();
        sheet.write_number(1, 0, 1).unwrap();
        sheet.write_string(1, 1, code).unwrap();
        sheet.write_number(1, 2, 2).unwrap();
        sheet.write_number(1, 3, 150).unwrap();
        sheet.write_number(1, 4, 300).unwrap();
        workbook.save(&path).unwrap();
        FileTask::from_path(path)
    }

    fn settings(dir: &Path) -> BatchSettings {
        BatchSettings {
            invoice_output_folder: dir.join("invoices"),
            actor: "tester".to_string(),
        }
    }

    async fn run_to_end(
        runner: &BatchRunner,
        operation: BatchOperation,
        files: Vec<FileTask>,
    ) -> (RunResult, Vec<BatchEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = runner.start(operation, files, tx).unwrap();
        let result = handle.wait().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    fn progress(events: &[BatchEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ingest_isolates_failing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool().await;
        let first = write_daily(dir.path(), "20240501.xlsx", "A");
        let broken = dir.path().join("20240502.xlsx");
        std::fs::write(&broken, b"not a workbook").unwrap();
        let third = write_daily(dir.path(), "20240503.xlsx", "C");

        let runner = BatchRunner::new(
            Arc::new(OfficeEngine::default()),
            pool.clone(),
            settings(dir.path()),
        );
        let (result, events) = run_to_end(
            &runner,
            BatchOperation::Ingest,
            vec![first, FileTask::from_path(broken), third],
        )
        .await;

        let RunResult::Completed(outcome) = result else {
            panic!("expected completion");
        };
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed_items.len(), 1);
        assert_eq!(outcome.failed_items[0].file, "20240502.xlsx");

        assert_eq!(progress(&events), vec![0, 33, 67, 100]);
        assert!(matches!(events.first(), Some(BatchEvent::Started { total: 3, .. })));
        assert!(matches!(events.last(), Some(BatchEvent::Finished(RunResult::Completed(_)))));
        assert_eq!(
            events[events.len() - 2],
            BatchEvent::Status(IDLE_STATUS.to_string())
        );
        assert_eq!(runner.status(), RunStatus::Idle);

        let day3 = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let stored = sales::get_daily_sales(&pool, day3).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].total_price, 300);
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_locked_file_is_recorded_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool().await;
        let first = write_daily(dir.path(), "20240501.xlsx", "A");
        let locked = write_daily(dir.path(), "20240502.xlsx", "B");
        let third = write_daily(dir.path(), "20240503.xlsx", "C");

        let holder = std::fs::File::open(&locked.path).unwrap();
        holder.lock().unwrap();

        let runner = BatchRunner::new(
            Arc::new(OfficeEngine::default()),
            pool,
            settings(dir.path()),
        );
        let (result, events) =
            run_to_end(&runner, BatchOperation::Ingest, vec![first, locked, third]).await;

        let RunResult::Completed(outcome) = result else {
            panic!("expected completion");
        };
        assert_eq!((outcome.attempted, outcome.succeeded, outcome.failed()), (3, 2, 1));
        assert!(outcome.failed_items[0].reason.contains("another program"));
        assert!(events.iter().any(|e| matches!(
            e,
            BatchEvent::FileFailed { file, .. } if file == "20240502.xlsx"
        )));
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected_and_announced() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_daily(dir.path(), "20240501.xlsx", "A");
        let bad = write_daily(dir.path(), "invalid.xlsx", "B");
        let engine = FakeEngine::default();

        let runner =
            BatchRunner::new(Arc::new(engine.clone()), test_pool().await, settings(dir.path()));
        // The fake engine returns no cells, so the good file stores nothing
        let (result, events) = run_to_end(&runner, BatchOperation::Ingest, vec![bad, good]).await;

        let RunResult::Completed(outcome) = result else {
            panic!("expected completion");
        };
        assert_eq!(outcome.rejected, vec!["invalid.xlsx".to_string()]);
        assert_eq!(outcome.succeeded, 1);
        assert!(outcome.failed_items.is_empty());
        // Only the valid file ever reached the engine
        assert_eq!(
            engine.events().iter().filter(|e| *e == "launch").count(),
            1
        );
        assert!(events.iter().any(|e| matches!(
            e,
            BatchEvent::Notify(Notification { severity: Severity::Warning, message, .. })
                if message.contains("invalid.xlsx")
        )));
    }

    #[tokio::test]
    async fn test_nothing_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = FileTask::from_path(dir.path().join("20240501.xlsx"));
        task.selected = false;

        let runner = BatchRunner::new(
            Arc::new(FakeEngine::default()),
            test_pool().await,
            settings(dir.path()),
        );
        let (result, events) = run_to_end(&runner, BatchOperation::Ingest, vec![task]).await;

        assert_eq!(result, RunResult::NothingToDo);
        assert!(progress(&events).is_empty());
        assert_eq!(events.last(), Some(&BatchEvent::Finished(RunResult::NothingToDo)));
        assert_eq!(runner.status(), RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_export_writes_dated_folder() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::default();
        let runner = BatchRunner::new(Arc::new(engine), test_pool().await, settings(dir.path()));
        let files = vec![
            FileTask::from_path(dir.path().join("invoice-a.xlsx")),
            FileTask::from_path(dir.path().join("invoice-b.xls")),
        ];

        let (result, events) = run_to_end(&runner, BatchOperation::Export, files).await;

        let RunResult::Completed(outcome) = result else {
            panic!("expected completion");
        };
        let expected_dir = dir
            .path()
            .join("invoices")
            .join(Local::now().date_naive().format(SALES_DATE_FORMAT).to_string());
        assert_eq!(outcome.output_dir.as_deref(), Some(expected_dir.as_path()));
        assert!(expected_dir.join("invoice-a.pdf").exists());
        assert!(expected_dir.join("invoice-b.pdf").exists());
        assert!(events.iter().any(|e| matches!(
            e,
            BatchEvent::Notify(Notification {
                action: Some(NotificationAction::OpenFolder(folder)),
                ..
            }) if *folder == expected_dir
        )));
    }

    #[tokio::test]
    async fn test_export_failure_is_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(FakeBehavior {
            fail_export: true,
            ..Default::default()
        });
        let runner = BatchRunner::new(Arc::new(engine), test_pool().await, settings(dir.path()));
        let files = vec![
            FileTask::from_path(dir.path().join("a.xlsx")),
            FileTask::from_path(dir.path().join("b.xlsx")),
        ];

        let (result, _) = run_to_end(&runner, BatchOperation::Export, files).await;

        let RunResult::Completed(outcome) = result else {
            panic!("expected completion");
        };
        assert_eq!(outcome.failed(), 2);
        assert_eq!(outcome.succeeded, 0);
    }

    #[tokio::test]
    async fn test_unusable_output_folder_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the output folder should be
        let blocker = dir.path().join("invoices");
        std::fs::write(&blocker, b"").unwrap();
        let engine = FakeEngine::default();

        let runner = BatchRunner::new(
            Arc::new(engine.clone()),
            test_pool().await,
            settings(dir.path()),
        );
        let (result, events) = run_to_end(
            &runner,
            BatchOperation::Export,
            vec![FileTask::from_path(dir.path().join("a.xlsx"))],
        )
        .await;

        match result {
            RunResult::Failed { partial, .. } => assert_eq!(partial.attempted, 0),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(engine.events().is_empty());
        assert!(events.contains(&BatchEvent::Status(IDLE_STATUS.to_string())));
        assert!(events.iter().any(|e| matches!(
            e,
            BatchEvent::Notify(Notification { severity: Severity::Error, message, .. })
                if message.contains("aborted")
        )));
        assert_eq!(runner.status(), RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_session_violation_aborts_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool().await;
        let files = vec![
            write_daily(dir.path(), "20240501.xlsx", "A"),
            write_daily(dir.path(), "20240502.xlsx", "B"),
            write_daily(dir.path(), "20240503.xlsx", "C"),
        ];
        let engine = FakeEngine::new(FakeBehavior {
            violation_on_launch: Some(2),
            cells: vec![
                vec![Data::String("No".into()), Data::String("Product Code".into())],
                vec![
                    Data::Float(1.0),
                    Data::String("P-001".into()),
                    Data::Float(2.0),
                    Data::Float(150.0),
                    Data::Float(300.0),
                ],
            ],
            ..Default::default()
        });

        let runner = BatchRunner::new(
            Arc::new(engine.clone()),
            pool.clone(),
            settings(dir.path()),
        );
        let (result, events) = run_to_end(&runner, BatchOperation::Ingest, files).await;

        match result {
            RunResult::Failed { partial, .. } => {
                assert_eq!(partial.attempted, 2);
                assert_eq!(partial.succeeded, 1);
                assert!(partial.failed_items.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }

        // The third file never gets an engine
        let launches = engine.events().iter().filter(|e| *e == "launch").count();
        assert_eq!(launches, 2);
        assert!(!events.iter().any(|e| matches!(
            e,
            BatchEvent::Progress { message, .. } if message.contains("20240503.xlsx")
        )));

        let day1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let kept = sales::get_daily_sales(&pool, day1).await.unwrap();
        assert_eq!(kept.len(), 1);
        let day2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert!(sales::get_daily_sales(&pool, day2).await.unwrap().is_empty());

        assert!(matches!(events.last(), Some(BatchEvent::Finished(RunResult::Failed { .. }))));
        assert_eq!(
            events[events.len() - 2],
            BatchEvent::Status(IDLE_STATUS.to_string())
        );
        assert!(matches!(
            events[events.len() - 3],
            BatchEvent::Notify(Notification { severity: Severity::Error, .. })
        ));
        assert_eq!(runner.status(), RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(
            Arc::new(FakeEngine::default()),
            test_pool().await,
            settings(dir.path()),
        );
        runner.running.store(true, Ordering::SeqCst);
        assert_eq!(runner.status(), RunStatus::Running);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = runner
            .start_export(vec![FileTask::from_path(dir.path().join("a.xlsx"))], tx)
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::default();
        let runner = BatchRunner::new(
            Arc::new(engine.clone()),
            test_pool().await,
            settings(dir.path()),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = runner
            .start_export(
                vec![
                    FileTask::from_path(dir.path().join("a.xlsx")),
                    FileTask::from_path(dir.path().join("b.xlsx")),
                ],
                tx,
            )
            .unwrap();

        // The current-thread test runtime has not polled the run yet
        handle.cancel();
        let RunResult::Completed(outcome) = handle.wait().await else {
            panic!("expected completion");
        };

        assert!(outcome.cancelled);
        assert_eq!(outcome.attempted, 0);
        assert!(engine.events().is_empty());
    }

    #[test]
    fn test_progress_percent_rounds() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(1, 8), 13);
    }
}
