//! Input file selection

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Workbook extensions accepted as batch input
const WORKBOOK_EXTENSIONS: [&str; 2] = ["xls", "xlsx"];

/// One candidate input file of a batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    /// File name shown in progress and failure messages
    pub display_name: String,
    pub path: PathBuf,
    /// Only selected tasks are processed
    pub selected: bool,
}

impl FileTask {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            display_name,
            path,
            selected: true,
        }
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// List the workbooks directly inside `dir`, sorted by file name
pub fn scan_directory(dir: &Path) -> Result<Vec<FileTask>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut tasks = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && is_workbook(&path) && !is_owner_file(&path) {
            tasks.push(FileTask::from_path(path));
        }
    }

    tasks.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(tasks)
}

/// Office writes `~$<name>` next to a workbook it holds open
fn is_owner_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"))
}

/// Expand directories into their workbooks; plain files are taken as given
pub fn collect_tasks(paths: &[PathBuf]) -> Result<Vec<FileTask>> {
    let mut tasks = Vec::new();
    for path in paths {
        if path.is_dir() {
            tasks.extend(scan_directory(path)?);
        } else {
            tasks.push(FileTask::from_path(path.clone()));
        }
    }
    Ok(tasks)
}
