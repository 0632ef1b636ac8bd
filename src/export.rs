//! Export of the final ranked feed.
//!
//! The pipeline hands a completed [`Edition`] to an [`Exporter`] unless the
//! run is a dry run. [`JsonExporter`] writes one file per run, grouped by
//! UTC date:
//!
//! ```text
//! output_dir/
//! └── 2025-05-06/
//!     ├── 081500-6f1c....json
//!     └── 161502-0b9e....json
//! ```

use crate::error::ExportError;
use crate::models::Edition;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Destination for a finished run.
///
/// The pipeline calls [`Exporter::export`] at most once per run and may
/// drop the returned future if the run is cancelled mid-export, so an
/// implementation should leave nothing half written when that happens.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Persist `edition`.
    ///
    /// # Arguments
    ///
    /// * `edition` - The ranked feed plus run metadata
    ///
    /// # Returns
    ///
    /// A human readable location (a path, a URL) reported in the run status.
    ///
    /// # Errors
    ///
    /// Any [`ExportError`]. The run still completes; the error is recorded
    /// in its status.
    async fn export(&self, edition: &Edition) -> Result<String, ExportError>;
}

/// Writes each edition as pretty-printed JSON under a per-date directory.
///
/// The file is first written next to its final path with a `.tmp`
/// extension and then renamed into place, so readers never see a partial
/// feed.
///
/// # Examples
///
/// ```ignore
/// let exporter = JsonExporter::new("./out");
/// let location = exporter.export(&edition).await?;
/// // ./out/2025-05-06/081500-6f1c2a9e-....json
/// ```
#[derive(Debug, Clone)]
pub struct JsonExporter {
    output_dir: PathBuf,
}

impl JsonExporter {
    /// `output_dir` and the date directories under it are created on first
    /// export.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Where `edition` will be written: `{output_dir}/{date}/{HHMMSS}-{run_id}.json`.
    pub fn path_for(&self, edition: &Edition) -> PathBuf {
        let ts = edition.generated_at;
        self.output_dir
            .join(ts.format("%Y-%m-%d").to_string())
            .join(format!("{}-{}.json", ts.format("%H%M%S"), edition.run_id))
    }
}

#[async_trait]
impl Exporter for JsonExporter {
    #[instrument(level = "info", skip_all, fields(run_id = %edition.run_id))]
    async fn export(&self, edition: &Edition) -> Result<String, ExportError> {
        let json = serde_json::to_string_pretty(edition)?;
        let path = self.path_for(edition);

        if let Some(dir) = path.parent() {
            info!(dir = %dir.display(), "Ensuring JSON directory exists");
            if let Err(e) = fs::create_dir_all(dir).await {
                error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
                return Err(e.into());
            }
        }

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            error!(path = %path.display(), error = %e, "Failed to move JSON feed into place");
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        info!(path = %path.display(), articles = edition.article_count, "Wrote JSON feed");
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn edition() -> Edition {
        Edition {
            run_id: Uuid::nil(),
            generated_at: Utc.with_ymd_and_hms(2025, 5, 6, 8, 15, 0).unwrap(),
            article_count: 0,
            duplicates_removed: 0,
            failures: vec![],
            articles: vec![],
        }
    }

    #[test]
    fn test_path_for() {
        let exporter = JsonExporter::new("/data/out");
        assert_eq!(
            exporter.path_for(&edition()),
            PathBuf::from(
                "/data/out/2025-05-06/081500-00000000-0000-0000-0000-000000000000.json"
            )
        );
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let exporter = JsonExporter::new(tmp.path());
        let location = exporter.export(&edition()).await.unwrap();

        let written = std::fs::read_to_string(&location).unwrap();
        let parsed: Edition = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.run_id, Uuid::nil());
        assert_eq!(parsed.article_count, 0);

        let day = std::path::Path::new(&location).parent().unwrap();
        let names: Vec<_> = std::fs::read_dir(day)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1, "staging file is gone: {names:?}");
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_export_into_unwritable_location_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let exporter = JsonExporter::new(&blocker);
        assert!(matches!(
            exporter.export(&edition()).await,
            Err(ExportError::Io(_))
        ));
    }
}
