//! Chaos Image Pipeline - Job Execution
//!
//! Runs one job through fetch, join, transform and write. Every error is
//! caught here and turned into a `JobOutcome::Failed`; nothing escapes to
//! the caller.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::crypto::CryptoKey;
use crate::engine::CryptoEngine;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{DefaultFetcher, SourceFetcher};
use crate::job::{CryptoJob, CryptoMode, JobListener, JobOutcome, JobSources, SizeRow};
use crate::join::{join_single, join_triple, ChannelBundle};
use crate::layout::{etc_channel_names, file_name, StorageLayout};
use crate::writer::{JobWriter, OutputTarget, WriteStatus};

/// Fetch, transform and write jobs
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn SourceFetcher>,
    engine: Arc<CryptoEngine>,
    writer: JobWriter,
    layout: StorageLayout,
    listener: Option<Arc<dyn JobListener>>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        engine: Arc<CryptoEngine>,
        writer: JobWriter,
        layout: StorageLayout,
    ) -> Self {
        Self {
            fetcher,
            engine,
            writer,
            layout,
            listener: None,
        }
    }

    /// Default fetcher, block scrambler and logging notifier
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Arc::new(DefaultFetcher::new()),
            Arc::new(CryptoEngine::with_defaults(config.single_quality)),
            JobWriter::default(),
            config.layout(),
        )
    }

    /// Observe every terminal outcome
    pub fn with_listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Run `job` to its terminal outcome
    pub async fn run_job(&self, job: CryptoJob) -> JobOutcome {
        let name = job.name();
        let target = self.resolve_target(&job);

        let outcome = match self.execute(&job, &target).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(
                    "{} job failed: sources={:?} outputs={:?} key={} error={}",
                    job.mode,
                    job.sources.uris(),
                    target.paths(),
                    job.key.fingerprint(),
                    e
                );
                JobOutcome::failed(&e)
            }
        };

        if let Some(listener) = &self.listener {
            listener.on_terminal(&name, &outcome);
        }
        outcome
    }

    /// Explicit output, or a unique temp path in the encryption directory
    fn resolve_target(&self, job: &CryptoJob) -> OutputTarget {
        if let Some(output) = &job.output {
            return output.clone();
        }

        let temp = self.layout.temp_output(&job.name());
        match job.mode {
            CryptoMode::EncryptEtc => {
                let dir = self.layout.encrypted();
                OutputTarget::Triple(etc_channel_names(&file_name(&temp)).map(|n| dir.join(n)))
            }
            _ => OutputTarget::Single(temp),
        }
    }

    async fn execute(&self, job: &CryptoJob, target: &OutputTarget) -> PipelineResult<JobOutcome> {
        job.validate()?;

        if self.writer.existing_output(target).await {
            log::warn!(
                "Skipping {} of {}: {} already exists",
                job.mode,
                job.name(),
                target.primary().display()
            );
            self.writer.notify(target);
            return Ok(already_produced(target));
        }

        log::debug!("{} {}: fetching {:?}", job.mode, job.name(), job.sources.uris());
        let bundle = match &job.sources {
            JobSources::Single(uri) => join_single(self.fetcher.fetch(uri)).await?,
            JobSources::Triple { red, green, blue } => {
                join_triple(
                    self.fetcher.fetch(red),
                    self.fetcher.fetch(green),
                    self.fetcher.fetch(blue),
                )
                .await?
            }
        };
        let original_bytes = bundle.total_bytes();

        log::debug!("{} {}: transforming {} bytes", job.mode, job.name(), original_bytes);
        let engine = Arc::clone(&self.engine);
        let (key, mode, quality) = (job.key.clone(), job.mode, job.quality);
        let (bundle, transformed) = tokio::task::spawn_blocking(move || {
            let result = transform(&engine, mode, &bundle, &key, quality);
            (bundle, result)
        })
        .await?;

        let streams = match transformed {
            Ok(streams) => streams,
            Err(e) => {
                if e.deletes_partial_output() {
                    self.writer.discard(target).await;
                }
                return Err(e);
            }
        };

        let refs: Vec<&[u8]> = streams.iter().map(Vec::as_slice).collect();
        let status = self.writer.write(target, &refs).await?;
        drop(bundle);
        self.writer.notify(target);

        let output_bytes = match status {
            WriteStatus::Written(bytes) => bytes,
            WriteStatus::AlreadyPresent => {
                log::warn!(
                    "Dropping {} result of {}: {} was produced while it ran",
                    job.mode,
                    job.name(),
                    target.primary().display()
                );
                return Ok(already_produced(target));
            }
        };

        let sizes = SizeRow {
            name: job.name(),
            original_bytes,
            output_bytes,
        };
        log::info!("CSV: {}", sizes);

        if let Some(display) = &job.display {
            display.show(target.primary());
        }

        Ok(JobOutcome::Completed {
            outputs: target.paths().to_vec(),
            sizes,
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", &self.engine)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

fn already_produced(target: &OutputTarget) -> JobOutcome {
    JobOutcome::AlreadyProduced {
        outputs: target.paths().to_vec(),
    }
}

fn transform(
    engine: &CryptoEngine,
    mode: CryptoMode,
    bundle: &ChannelBundle,
    key: &CryptoKey,
    quality: u8,
) -> PipelineResult<Vec<Vec<u8>>> {
    match (mode, bundle) {
        (CryptoMode::Encrypt, ChannelBundle::Single(buffer)) => Ok(vec![engine.encrypt(buffer, key)?]),
        (CryptoMode::Decrypt, ChannelBundle::Single(buffer)) => Ok(vec![engine.decrypt(buffer, key)?]),
        (CryptoMode::EncryptEtc, ChannelBundle::Single(buffer)) => {
            let channels = engine.encrypt_etc(buffer, key, quality)?;
            Ok(vec![channels.red, channels.green, channels.blue])
        }
        (CryptoMode::DecryptEtc, ChannelBundle::Triple { red, green, blue }) => {
            Ok(vec![engine.decrypt_etc(red, green, blue, key)?])
        }
        (mode, bundle) => Err(PipelineError::InvalidJob(format!(
            "{} cannot run on {} channel(s)",
            mode,
            bundle.channel_count()
        ))),
    }
}
