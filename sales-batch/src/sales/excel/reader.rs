//! Read one daily sales workbook into `SalesRecord`s
//!
//! Layout: row 1 is a header, data starts on row 2. Column 1 is a row
//! number (an empty cell there skips the row), columns 2..=5 are product
//! code, quantity, unit price and total price. The sales date comes from
//! the file name, never from the sheet.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use calamine::Data;
use chrono::{Local, NaiveDate};

use crate::engine::{AutomationSession, Engine};
use crate::error::{BatchError, RowField};
use crate::sales::{SalesRecord, parse_sales_date};

/// Zero-based index of the first data row
const FIRST_DATA_ROW: usize = 1;

/// Outcome of checking whether another program holds a file exclusively
#[derive(Debug)]
enum LockProbe {
    Available,
    Locked,
    Unreadable(io::Error),
}

impl LockProbe {
    /// Check for an owner lock file next to `path`, then for an OS-level lock
    fn check(path: &Path) -> Self {
        if let Some(owner) = owner_lock_file(path) {
            log::debug!("{} is held open: found {}", path.display(), owner.display());
            return LockProbe::Locked;
        }

        match probe_exclusive(path) {
            Ok(()) => LockProbe::Available,
            Err(ProbeError::Locked) => LockProbe::Locked,
            Err(ProbeError::Io(e)) => LockProbe::Unreadable(e),
        }
    }
}

enum ProbeError {
    Locked,
    Io(io::Error),
}

/// Lock file an office suite keeps beside a workbook it has open.
///
/// LibreOffice writes `.~lock.<name>#`, Excel writes `~$<name>`.
fn owner_lock_file(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    [format!(".~lock.{}#", name), format!("~${}", name)]
        .into_iter()
        .map(|candidate| dir.join(candidate))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn probe_exclusive(path: &Path) -> Result<(), ProbeError> {
    use std::os::windows::fs::OpenOptionsExt;

    // ERROR_SHARING_VIOLATION
    const SHARING_VIOLATION: i32 = 32;

    match std::fs::OpenOptions::new()
        .read(true)
        .share_mode(0)
        .open(path)
    {
        Ok(_) => Ok(()),
        Err(e) if e.raw_os_error() == Some(SHARING_VIOLATION) => Err(ProbeError::Locked),
        Err(e) => Err(ProbeError::Io(e)),
    }
}

/// Both lock families count: `flock` holders and POSIX record locks
/// (`fcntl`/`lockf`, which LibreOffice uses).
#[cfg(unix)]
fn probe_exclusive(path: &Path) -> Result<(), ProbeError> {
    let file = std::fs::File::open(path).map_err(ProbeError::Io)?;

    if has_record_lock(&file).map_err(ProbeError::Io)? {
        return Err(ProbeError::Locked);
    }

    match file.try_lock() {
        Ok(()) => {
            file.unlock().map_err(ProbeError::Io)?;
            Ok(())
        }
        Err(std::fs::TryLockError::WouldBlock) => Err(ProbeError::Locked),
        Err(std::fs::TryLockError::Error(e)) => Err(ProbeError::Io(e)),
    }
}

#[cfg(not(any(unix, windows)))]
fn probe_exclusive(path: &Path) -> Result<(), ProbeError> {
    std::fs::File::open(path).map_err(ProbeError::Io)?;
    Ok(())
}

/// Whether another process holds a POSIX record lock anywhere in `file`.
///
/// `F_GETLK` never reports locks owned by the calling process.
#[cfg(unix)]
fn has_record_lock(file: &std::fs::File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: `flock` is plain data; all-zero is a valid value
    let mut query: libc::flock = unsafe { std::mem::zeroed() };
    query.l_type = libc::F_WRLCK as _;
    query.l_whence = libc::SEEK_SET as _;
    query.l_start = 0;
    query.l_len = 0;

    // SAFETY: the descriptor is open for the duration of the call and
    // `query` outlives it
    let rc = unsafe {
        libc::fcntl(
            file.as_raw_fd(),
            libc::F_GETLK,
            &mut query as *mut libc::flock,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(query.l_type != libc::F_UNLCK as libc::c_short)
}

/// Read all sales rows of the workbook at `path`.
///
/// `declared_name` is the file name the caller knows the workbook by; its
/// stem must be a `yyyyMMdd` date. Every returned record carries that date, `actor` as
/// creator and updater, and one timestamp captured when reading started.
/// Rejects the file without touching it when the name is not a date, and
/// without starting an engine when another program holds it open.
pub fn read_sales_workbook(
    engine: &dyn Engine,
    path: &Path,
    declared_name: &str,
    actor: &str,
) -> Result<Vec<SalesRecord>, BatchError> {
    let file_name = declared_name.to_string();

    let sales_date = parse_sales_date(&file_name).ok_or_else(|| BatchError::InvalidFilename {
        name: file_name.clone(),
    })?;

    match LockProbe::check(path) {
        LockProbe::Available => {}
        LockProbe::Locked => return Err(BatchError::FileLocked { file: file_name }),
        LockProbe::Unreadable(e) => {
            return Err(BatchError::ReadFailed {
                file: file_name,
                source: anyhow::Error::new(e).context("Failed to open file"),
            });
        }
    }

    let cells = AutomationSession::run(engine, |session| {
        let handle = session.open_for_read(path)?;
        let cells = session
            .document(&handle)
            .and_then(|doc| doc.used_range())
            .context("Failed to read used range");
        session.close_with(handle, false, cells)
    })
    .map_err(|e| {
        BatchError::from_engine(e, |source| BatchError::ReadFailed {
            file: file_name.clone(),
            source,
        })
    })?;

    let now = Local::now().naive_local();
    let mut records = Vec::new();

    for (row_idx, row) in cells.iter().enumerate().skip(FIRST_DATA_ROW) {
        if is_blank(row.first()) {
            continue;
        }

        let row_num = row_idx + 1;
        let invalid = |field: RowField| BatchError::RowValidation {
            file: file_name.clone(),
            row: row_num,
            field,
        };

        let product_code = get_cell_string(row, RowField::ProductCode)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| invalid(RowField::ProductCode))?;
        let quantity =
            get_cell_int(row, RowField::Quantity).ok_or_else(|| invalid(RowField::Quantity))?;
        let unit_price =
            get_cell_int(row, RowField::UnitPrice).ok_or_else(|| invalid(RowField::UnitPrice))?;
        let total_price =
            get_cell_int(row, RowField::TotalPrice).ok_or_else(|| invalid(RowField::TotalPrice))?;

        records.push(build_record(
            sales_date,
            product_code,
            [quantity, unit_price, total_price],
            actor,
            now,
        ));
    }

    log::debug!("Read {} sales rows from {}", records.len(), file_name);
    Ok(records)
}

fn build_record(
    sales_date: NaiveDate,
    product_code: String,
    [quantity, unit_price, total_price]: [i64; 3],
    actor: &str,
    now: chrono::NaiveDateTime,
) -> SalesRecord {
    SalesRecord {
        sales_date,
        product_code,
        quantity,
        unit_price,
        total_price,
        created_by: actor.to_string(),
        created_at: now,
        updated_by: actor.to_string(),
        updated_at: now,
    }
}

/// Only an empty first cell skips a row; whitespace text still counts as content
fn is_blank(cell: Option<&Data>) -> bool {
    matches!(cell, None | Some(Data::Empty))
}

/// Trimmed text of a cell; whole numbers render without a fraction
fn get_cell_string(row: &[Data], field: RowField) -> Option<String> {
    match row.get(field.column() - 1)? {
        Data::Empty => None,
        Data::String(s) => Some(s.trim().to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
        other => Some(other.to_string().trim().to_string()),
    }
}

/// Whole number in a cell, from a numeric value or numeric text
fn get_cell_int(row: &[Data], field: RowField) -> Option<i64> {
    match row.get(field.column() - 1)? {
        Data::Int(i) => Some(*i),
        Data::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        Data::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
