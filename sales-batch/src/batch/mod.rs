//! Multi-file batch orchestration
//!
//! A [`BatchRunner`] processes a list of [`FileTask`]s sequentially on a
//! background task and reports progress through [`BatchEvent`]s.

mod files;
mod runner;

pub use files::{FileTask, collect_tasks, scan_directory};
pub use runner::{
    BatchEvent, BatchHandle, BatchOperation, BatchOutcome, BatchRunner, BatchSettings, FailedItem,
    Notification, NotificationAction, RunResult, RunStatus, Severity,
};
