//! Chaos Image Pipeline - Job Output Writer
//!
//! Writes the transformed streams of one job. Every stream goes to a temp file;
//! the temp files are renamed into place only while holding the publish lock and
//! only if the targets are still missing. If any step fails, every file this
//! job created is removed before the error is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Destination of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Single(PathBuf),
    /// Red, green, blue
    Triple([PathBuf; 3]),
}

impl OutputTarget {
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            OutputTarget::Single(path) => std::slice::from_ref(path),
            OutputTarget::Triple(paths) => paths,
        }
    }

    /// Path reported in logs and CSV rows
    pub fn primary(&self) -> &Path {
        &self.paths()[0]
    }
}

/// Receives finished output paths, e.g. a gallery or media index
pub trait IndexNotifier: Send + Sync {
    fn notify(&self, paths: &[PathBuf]);
}

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl IndexNotifier for LogNotifier {
    fn notify(&self, paths: &[PathBuf]) {
        for path in paths {
            log::debug!("New output indexed: {}", path.display());
        }
    }
}

/// Result of [`JobWriter::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Total bytes published
    Written(u64),
    /// Every target was published by another job first; nothing was written
    AlreadyPresent,
}

/// Writes job outputs at most once
///
/// Clones share one publish lock, so jobs racing for the same targets
/// publish one after the other and the loser sees the winner's files.
#[derive(Clone)]
pub struct JobWriter {
    notifier: Arc<dyn IndexNotifier>,
    publish: Arc<Mutex<()>>,
}

impl Default for JobWriter {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

impl JobWriter {
    pub fn new(notifier: Arc<dyn IndexNotifier>) -> Self {
        Self {
            notifier,
            publish: Arc::new(Mutex::new(())),
        }
    }

    /// Check if every target already exists with content
    pub async fn existing_output(&self, target: &OutputTarget) -> bool {
        for path in target.paths() {
            if !is_non_empty_file(path).await {
                return false;
            }
        }
        true
    }

    /// Write one stream per target path
    ///
    /// Nothing is written unless every stream is non-empty. Targets that
    /// became complete since the job started are left untouched.
    pub async fn write(&self, target: &OutputTarget, streams: &[&[u8]]) -> PipelineResult<WriteStatus> {
        let paths = target.paths();
        if paths.len() != streams.len() {
            return Err(PipelineError::InvalidJob(format!(
                "{} streams for {} output paths",
                streams.len(),
                paths.len()
            )));
        }
        if let Some(pos) = streams.iter().position(|s| s.is_empty()) {
            return Err(PipelineError::EmptyOutput(paths[pos].display().to_string()));
        }

        let mut temps: Vec<PathBuf> = Vec::with_capacity(paths.len());
        for (path, data) in paths.iter().zip(streams) {
            if let Err(e) = stage(path, data, &mut temps).await {
                remove_all(&temps).await;
                return Err(e);
            }
        }

        let _publishing = self.publish.lock().await;
        if self.existing_output(target).await {
            log::debug!("{} was published by another job", target.primary().display());
            remove_all(&temps).await;
            return Ok(WriteStatus::AlreadyPresent);
        }

        let mut published: Vec<PathBuf> = Vec::with_capacity(paths.len());
        for (temp, path) in temps.iter().zip(paths) {
            if let Err(e) = tokio::fs::rename(temp, path).await {
                remove_all(&temps).await;
                remove_all(&published).await;
                return Err(e.into());
            }
            published.push(path.clone());
        }

        Ok(WriteStatus::Written(
            streams.iter().map(|s| s.len() as u64).sum(),
        ))
    }

    /// Tell the index consumer about finished outputs
    pub fn notify(&self, target: &OutputTarget) {
        self.notifier.notify(target.paths());
    }

    /// Delete outputs of a failed job, ignoring files that are not there
    pub async fn discard(&self, target: &OutputTarget) {
        remove_all(target.paths()).await;
    }
}

impl std::fmt::Debug for JobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWriter").finish_non_exhaustive()
    }
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Write `data` to a fresh temp file beside `path`
///
/// The temp path is pushed to `temps` as soon as it is created.
async fn stage(path: &Path, data: &[u8], temps: &mut Vec<PathBuf>) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::InvalidJob(format!("no file name in {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .await?;
    temps.push(temp_path);
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::debug!("Removed partial output {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}
