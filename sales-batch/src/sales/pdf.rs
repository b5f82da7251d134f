//! Convert a workbook to PDF through the automation engine

use std::path::Path;

use anyhow::Context;

use crate::engine::{AutomationSession, Engine, PdfExportOptions};
use crate::error::BatchError;

/// Render the workbook at `source` as a PDF at `dest`.
///
/// The source is opened read-only and closed without saving, so it is never
/// modified. An existing file at `dest` is overwritten.
pub fn export_to_pdf(engine: &dyn Engine, source: &Path, dest: &Path) -> Result<(), BatchError> {
    AutomationSession::run(engine, |session| {
        let handle = session.open_for_read(source)?;
        let exported = session
            .document(&handle)
            .and_then(|doc| doc.export_pdf(dest, &PdfExportOptions::default()))
            .with_context(|| format!("Failed to export {}", source.display()));
        session.close_with(handle, false, exported)
    })
    .map_err(|e| {
        BatchError::from_engine(e, |source_err| BatchError::ExportFailed {
            path: source.to_path_buf(),
            source: source_err,
        })
    })?;

    log::debug!("Exported {} to {}", source.display(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::engine::session::fake::{FakeBehavior, FakeEngine};

    #[test]
    fn test_export_closes_source_without_saving() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("20240501.pdf");
        let engine = FakeEngine::default();

        export_to_pdf(&engine, &PathBuf::from("20240501.xlsx"), &dest).unwrap();

        assert!(dest.exists());
        assert_eq!(
            engine.events(),
            vec![
                "launch",
                "open",
                "export",
                "release_children",
                "close save=false",
                "quit",
                "finalize"
            ]
        );
    }

    #[test]
    fn test_engine_failure_becomes_export_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(FakeBehavior {
            fail_export: true,
            fail_close: true,
            ..Default::default()
        });

        let err = export_to_pdf(
            &engine,
            &PathBuf::from("20240501.xlsx"),
            &dir.path().join("out.pdf"),
        )
        .unwrap_err();

        match err {
            BatchError::ExportFailed { path, source } => {
                assert_eq!(path, PathBuf::from("20240501.xlsx"));
                // The export error wins over the close failure
                assert!(format!("{:#}", source).contains("unsupported content"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.events().contains(&"finalize".to_string()));
    }

    #[test]
    fn test_open_failure_becomes_export_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new(FakeBehavior {
            fail_open: true,
            ..Default::default()
        });

        let err = export_to_pdf(
            &engine,
            &PathBuf::from("missing.xlsx"),
            &dir.path().join("out.pdf"),
        )
        .unwrap_err();

        assert!(matches!(err, BatchError::ExportFailed { .. }));
    }
}
