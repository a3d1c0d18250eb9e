use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use crate::logging::NptestLogger;

/// Append-only text file on the orchestrator (output log, result table).
///
/// The file is created at startup, where failure is fatal. Later appends
/// are best effort: a failed append is logged and skipped so a transient
/// filesystem problem never aborts a benchmark run.
#[derive(Debug)]
pub struct ArtifactFile {
    path: PathBuf,
    // serializes appends from concurrent connections
    write: Mutex<()>,
}

impl ArtifactFile {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open output capture file {}", path.display()))?;
        Ok(Self {
            path,
            write: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, data: &str) -> std::io::Result<()> {
        let _guard = self.write.lock().await;
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await
    }

    pub async fn append_or_warn(&self, data: &str) {
        if let Err(err) = self.append(data).await {
            NptestLogger::artifact_append_failed(&self.path.display().to_string(), &err);
        }
    }
}
