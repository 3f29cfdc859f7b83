use crate::services::report::RenderedReport;
use chrono::Local;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const MAX_NAME_COLLISIONS: u32 = 1000;

/// Append-only directory of report files. Existing files are never
/// overwritten.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    base_path: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write the report as `report_<YYYYmmdd_HHMMSS_mmm>.<ext>`, adding a
    /// numeric suffix when that name is taken.
    pub async fn persist(&self, report: &RenderedReport) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.base_path).await?;

        let stem = format!("report_{}", Local::now().format("%Y%m%d_%H%M%S_%3f"));
        let ext = report.format.extension();

        for n in 0..MAX_NAME_COLLISIONS {
            let name = if n == 0 {
                format!("{stem}.{ext}")
            } else {
                format!("{stem}_{n}.{ext}")
            };
            let path = self.base_path.join(name);

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            file.write_all(report.body.as_bytes()).await?;
            file.flush().await?;

            tracing::info!(path = %path.display(), "Report saved locally");
            return Ok(path);
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free report file name for {stem}.{ext}"),
        ))
    }
}
