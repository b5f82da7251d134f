//! `ingest` and `export` command handlers

use std::sync::Arc;

use anyhow::{Result, bail};
use colored::*;
use tokio::sync::mpsc;

use crate::batch::{
    BatchEvent, BatchOperation, BatchRunner, BatchSettings, RunResult, collect_tasks,
};
use crate::cli::BatchArgs;
use crate::cli::output::print_event;
use crate::config::Config;
use crate::engine::{Engine, OfficeEngine};

/// Run one batch over the given paths, rendering events as they arrive.
///
/// Ctrl-C requests cancellation; the file in progress still completes.
pub async fn handle_batch_command(
    config: &Config,
    operation: BatchOperation,
    args: BatchArgs,
) -> Result<()> {
    let tasks = collect_tasks(&args.paths)?;
    let pool = config.connect().await?;
    let engine: Arc<dyn Engine> = Arc::new(OfficeEngine::new(config.office_binary.clone()));
    let runner = BatchRunner::new(engine, pool, BatchSettings::from_config(config));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = runner.start(operation, tasks, tx)?;

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    print_event(&event);
                    if matches!(event, BatchEvent::Finished(_)) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                handle.cancel();
                println!("{}", "Cancelling after the current file...".yellow());
            }
        }
    }

    match handle.wait().await {
        RunResult::Failed { reason, .. } => bail!("{} aborted: {}", operation, reason),
        RunResult::Completed(outcome) if outcome.succeeded == 0 && outcome.attempted > 0 => {
            bail!("{} did not process any file successfully", operation)
        }
        _ => Ok(()),
    }
}
