//! Chaos Image Pipeline - Batch Sequencer
//!
//! Drives a list of jobs strictly one after another. A failed job is logged
//! and counted; the cursor always moves on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::buffer::Channel;
use crate::crypto::CryptoKey;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::SourceUri;
use crate::job::{CryptoJob, CryptoMode, JobOutcome, JobSources};
use crate::layout::{
    decrypted_name, encrypted_name, etc_channel_names, etc_decrypted_path, etc_sibling_name,
    file_name, is_encrypted_name, is_etc_red_name, DECRYPTED_MARKER,
};
use crate::pipeline::Pipeline;
use crate::thumbs::ThumbnailStage;
use crate::writer::OutputTarget;

/// One processed batch item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub name: String,
    pub outcome: JobOutcome,
}

/// Batch report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub succeeded: usize,
    pub already_produced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            total,
            succeeded: 0,
            already_produced: 0,
            skipped: 0,
            failed: 0,
            entries: Vec::with_capacity(total),
        }
    }

    fn record(&mut self, name: String, outcome: JobOutcome) {
        match &outcome {
            JobOutcome::Completed { .. } => self.succeeded += 1,
            JobOutcome::AlreadyProduced { .. } => self.already_produced += 1,
            JobOutcome::Skipped { .. } => self.skipped += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
        self.entries.push(BatchEntry { name, outcome });
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Write as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Clears the running flag when a run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sequential batch driver
#[derive(Debug)]
pub struct BatchSequencer {
    pipeline: Pipeline,
    thumbnails: Option<(ThumbnailStage, PathBuf)>,
    running: AtomicBool,
}

impl BatchSequencer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            thumbnails: None,
            running: AtomicBool::new(false),
        }
    }

    /// Shrink large local originals into `dir` before etc encryption
    pub fn with_thumbnails(mut self, stage: ThumbnailStage, dir: PathBuf) -> Self {
        self.thumbnails = Some((stage, dir));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run `jobs` in order; rejected if a run is already in progress
    pub async fn run(&self, jobs: Vec<CryptoJob>) -> PipelineResult<BatchReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::BatchAlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let total = jobs.len();
        let mut report = BatchReport::new(total);
        log::info!("Batch started: {} job(s)", total);

        for (index, job) in jobs.into_iter().enumerate() {
            let name = job.name();
            let outcome = match wrong_phase(&job) {
                Some(reason) => {
                    log::warn!("[{}/{}] Skipping {}: {}", index + 1, total, name, reason);
                    JobOutcome::Skipped { reason }
                }
                None => self.run_one(job).await,
            };

            match &outcome {
                JobOutcome::Failed { kind, .. } => {
                    log::warn!("[{}/{}] {} failed ({}), continuing", index + 1, total, name, kind)
                }
                _ => log::debug!("[{}/{}] {} done", index + 1, total, name),
            }
            report.record(name, outcome);
        }

        report.finished_at = Some(Utc::now());
        log::info!(
            "Batch finished: {} succeeded, {} already produced, {} skipped, {} failed",
            report.succeeded,
            report.already_produced,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn run_one(&self, mut job: CryptoJob) -> JobOutcome {
        if let (Some((stage, dir)), CryptoMode::EncryptEtc) = (&self.thumbnails, job.mode) {
            let local = match &job.sources {
                JobSources::Single(uri) => SourceUri::parse(uri).ok(),
                JobSources::Triple { .. } => None,
            };
            if let Some(SourceUri::Local(path)) = local {
                match stage.prepare(&path, dir).await {
                    Ok(prepared) if prepared != path => {
                        // thumbnails are JPEG, so are the channels made from them
                        if let Some(OutputTarget::Triple(paths)) = job.output.as_mut() {
                            for p in paths.iter_mut() {
                                p.set_extension("jpg");
                            }
                        }
                        job.sources = JobSources::Single(path_str(&prepared));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("Thumbnail stage failed for {}: {}", path.display(), e);
                        return JobOutcome::failed(&e);
                    }
                }
            }
        }
        self.pipeline.run_job(job).await
    }
}

/// Reason to skip a job whose source name belongs to another phase
fn wrong_phase(job: &CryptoJob) -> Option<String> {
    let name = job.name();
    match job.mode {
        CryptoMode::Encrypt | CryptoMode::EncryptEtc => {
            if is_encrypted_name(&name) {
                Some("source is already encrypted".into())
            } else if name.contains(DECRYPTED_MARKER) {
                Some("source is a decrypted output".into())
            } else {
                None
            }
        }
        CryptoMode::Decrypt => {
            (!is_encrypted_name(&name)).then(|| "source is not encrypted".into())
        }
        CryptoMode::DecryptEtc => {
            (!is_etc_red_name(&name)).then(|| "source is not a red channel".into())
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// PLANNERS
// ═══════════════════════════════════════════════════════════════

/// Image files directly inside `dir`, sorted by name
pub fn list_images(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            PipelineError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    image::ImageFormat::from_path(path)
        .map(|f| matches!(f, image::ImageFormat::Jpeg | image::ImageFormat::Png))
        .unwrap_or(false)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Etc-encrypt every file into `out_dir`
///
/// Already-encrypted names still become jobs; the sequencer skips them.
pub fn plan_encrypt_etc(files: &[PathBuf], out_dir: &Path, key: &CryptoKey, quality: u8) -> Vec<CryptoJob> {
    files
        .iter()
        .map(|file| {
            let outputs = etc_channel_names(&file_name(file)).map(|n| out_dir.join(n));
            CryptoJob::encrypt_etc(path_str(file), key.clone(), quality)
                .with_output(OutputTarget::Triple(outputs))
        })
        .collect()
}

/// Find complete red/green/blue triples and merge each into `decrypted/`
///
/// Red channels with a missing sibling are logged and left out.
pub fn plan_decrypt_etc(files: &[PathBuf], key: &CryptoKey) -> Vec<CryptoJob> {
    let mut jobs = Vec::new();
    for red in files.iter().filter(|f| is_etc_red_name(&file_name(f))) {
        let red_name = file_name(red);
        let siblings: Option<Vec<PathBuf>> = [Channel::Green, Channel::Blue]
            .iter()
            .map(|&channel| {
                etc_sibling_name(&red_name, channel)
                    .map(|name| red.with_file_name(name))
                    .filter(|path| path.is_file())
            })
            .collect();

        match siblings.as_deref() {
            Some([green, blue]) => jobs.push(
                CryptoJob::decrypt_etc(path_str(red), path_str(green), path_str(blue), key.clone())
                    .with_output(OutputTarget::Single(etc_decrypted_path(red))),
            ),
            _ => log::warn!("Incomplete channel triple for {}, skipping", red.display()),
        }
    }
    jobs
}

/// Encrypt every file to `N_encrypted.ext` beside it
pub fn plan_encrypt(files: &[PathBuf], key: &CryptoKey) -> Vec<CryptoJob> {
    files
        .iter()
        .map(|file| {
            let output = file.with_file_name(encrypted_name(&file_name(file)));
            CryptoJob::encrypt(path_str(file), key.clone()).with_output(OutputTarget::Single(output))
        })
        .collect()
}

/// Decrypt every file to `N_decrypted.ext` beside it
pub fn plan_decrypt(files: &[PathBuf], key: &CryptoKey) -> Vec<CryptoJob> {
    files
        .iter()
        .map(|file| {
            let output = file.with_file_name(decrypted_name(&file_name(file)));
            CryptoJob::decrypt(path_str(file), key.clone()).with_output(OutputTarget::Single(output))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::sample_image;
    use crate::engine::tests::MockCipher;
    use crate::engine::CryptoEngine;
    use crate::fetch::FileFetcher;
    use crate::layout::StorageLayout;
    use crate::writer::JobWriter;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sequencer(root: &Path, mock: Arc<MockCipher>) -> BatchSequencer {
        let mut engine = CryptoEngine::new();
        engine.register(mock);
        BatchSequencer::new(Pipeline::new(
            Arc::new(FileFetcher::new()),
            Arc::new(engine),
            JobWriter::default(),
            StorageLayout::new(root),
        ))
    }

    fn write_png(path: &Path) -> PathBuf {
        std::fs::write(path, sample_image(16, 16, image::ImageFormat::Png)).unwrap();
        path.to_path_buf()
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockCipher::default());
        let batch = sequencer(dir.path(), mock.clone());

        let files = vec![
            dir.path().join("a.png"),
            write_png(&dir.path().join("b.png")),
            write_png(&dir.path().join("c.png")),
        ];
        let key = CryptoKey::fixed().unwrap();
        let report = batch
            .run(plan_encrypt_etc(&files, &dir.path().join("out"), &key, 50))
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let names: Vec<&str> = report.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert!(report.entries[0].outcome.is_failure());
        assert_eq!(mock.calls(), 2);
        assert!(dir.path().join("out/c_encrypted_blue.png").exists());
    }

    #[tokio::test]
    async fn test_wrong_phase_is_skipped_without_engine() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockCipher::default());
        let batch = sequencer(dir.path(), mock.clone());

        let files = vec![write_png(&dir.path().join("a_encrypted.png"))];
        let report = batch
            .run(plan_encrypt(&files, &CryptoKey::fixed().unwrap()))
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_decrypt_of_plain_name_is_skipped() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockCipher::default());
        let batch = sequencer(dir.path(), mock.clone());

        let files = vec![write_png(&dir.path().join("a.png"))];
        let report = batch
            .run(plan_decrypt(&files, &CryptoKey::fixed().unwrap()))
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert!(matches!(report.entries[0].outcome, JobOutcome::Skipped { .. }));
        assert_eq!(mock.calls(), 0);
        assert!(!dir.path().join("a_decrypted.png").exists());
    }

    #[tokio::test]
    async fn test_decrypt_etc_from_non_red_channel_is_skipped() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockCipher::default());
        let batch = sequencer(dir.path(), mock.clone());

        let [red, green, blue] = etc_channel_names("a.png").map(|n| write_png(&dir.path().join(n)));
        // green passed where the red channel belongs
        let job = CryptoJob::decrypt_etc(
            path_str(&green),
            path_str(&red),
            path_str(&blue),
            CryptoKey::fixed().unwrap(),
        )
        .with_output(OutputTarget::Single(dir.path().join("decrypted/a_decrypted.png")));

        let report = batch.run(vec![job]).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(matches!(report.entries[0].outcome, JobOutcome::Skipped { .. }));
        assert_eq!(mock.calls(), 0);
        assert!(!dir.path().join("decrypted").exists());
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_running() {
        let dir = tempdir().unwrap();
        let batch = sequencer(dir.path(), Arc::new(MockCipher::default()));
        let key = CryptoKey::fixed().unwrap();
        let files = vec![write_png(&dir.path().join("a.png"))];

        let (first, second) = tokio::join!(
            batch.run(plan_encrypt(&files, &key)),
            batch.run(plan_encrypt(&files, &key)),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(PipelineError::BatchAlreadyRunning)));
        assert!(!batch.is_running());

        // the earlier output makes this one a no-op
        let third = batch.run(plan_encrypt(&files, &key)).await.unwrap();
        assert_eq!(third.already_produced, 1);
    }

    #[test]
    fn test_plan_decrypt_etc_finds_triples() {
        let dir = tempdir().unwrap();
        for name in [
            "a_encrypted_red.jpg",
            "a_encrypted_green.jpg",
            "a_encrypted_blue.jpg",
            "b_encrypted_red.jpg",
            "b_encrypted_blue.jpg",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let files = list_images(dir.path()).unwrap();
        let jobs = plan_decrypt_etc(&files, &CryptoKey::fixed().unwrap());

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name(), "a_encrypted_red.jpg");
        assert_eq!(
            jobs[0].output,
            Some(OutputTarget::Single(dir.path().join("decrypted/a_decrypted.jpg")))
        );
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.png", "a.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn test_report_json() {
        let dir = tempdir().unwrap();
        let mut report = BatchReport::new(1);
        report.record(
            "a.png".into(),
            JobOutcome::Skipped {
                reason: "source is already encrypted".into(),
            },
        );
        let path = dir.path().join("report.json");
        report.save(&path).unwrap();

        let loaded: BatchReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.skipped, 1);
        assert!(loaded.success());
    }
}
