//! Chaos Image Pipeline - Crypto Jobs
//!
//! A job is consumed once by the pipeline and always ends in one terminal
//! `JobOutcome`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoKey;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::SourceUri;
use crate::writer::OutputTarget;

/// Transform applied by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptoMode {
    Encrypt,
    Decrypt,
    EncryptEtc,
    DecryptEtc,
}

impl CryptoMode {
    /// Number of fetched sources
    pub fn source_count(&self) -> usize {
        match self {
            CryptoMode::DecryptEtc => 3,
            _ => 1,
        }
    }

    /// Number of written outputs
    pub fn output_count(&self) -> usize {
        match self {
            CryptoMode::EncryptEtc => 3,
            _ => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoMode::Encrypt => "encrypt",
            CryptoMode::Decrypt => "decrypt",
            CryptoMode::EncryptEtc => "encrypt-etc",
            CryptoMode::DecryptEtc => "decrypt-etc",
        }
    }
}

impl fmt::Display for CryptoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source URI(s) of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSources {
    Single(String),
    Triple {
        red: String,
        green: String,
        blue: String,
    },
}

impl JobSources {
    pub fn uris(&self) -> Vec<&str> {
        match self {
            JobSources::Single(uri) => vec![uri.as_str()],
            JobSources::Triple { red, green, blue } => vec![red.as_str(), green.as_str(), blue.as_str()],
        }
    }

    /// First source, the red channel for triples
    pub fn primary(&self) -> &str {
        match self {
            JobSources::Single(uri) => uri,
            JobSources::Triple { red, .. } => red,
        }
    }
}

/// Optional consumer that shows a finished image
pub trait DisplaySink: Send + Sync {
    fn show(&self, path: &Path);
}

/// Observer of terminal job outcomes
pub trait JobListener: Send + Sync {
    fn on_terminal(&self, job: &str, outcome: &JobOutcome);
}

/// One unit of pipeline work
#[derive(Clone)]
pub struct CryptoJob {
    pub mode: CryptoMode,
    pub sources: JobSources,
    pub key: CryptoKey,
    /// `None` writes to a temp path in the encryption directory
    pub output: Option<OutputTarget>,
    /// Channel quality for etc encryption
    pub quality: u8,
    pub display: Option<Arc<dyn DisplaySink>>,
}

impl CryptoJob {
    fn new(mode: CryptoMode, sources: JobSources, key: CryptoKey) -> Self {
        Self {
            mode,
            sources,
            key,
            output: None,
            quality: crate::config::DEFAULT_ETC_QUALITY,
            display: None,
        }
    }

    pub fn encrypt(source: impl Into<String>, key: CryptoKey) -> Self {
        Self::new(CryptoMode::Encrypt, JobSources::Single(source.into()), key)
    }

    pub fn decrypt(source: impl Into<String>, key: CryptoKey) -> Self {
        Self::new(CryptoMode::Decrypt, JobSources::Single(source.into()), key)
    }

    pub fn encrypt_etc(source: impl Into<String>, key: CryptoKey, quality: u8) -> Self {
        let mut job = Self::new(CryptoMode::EncryptEtc, JobSources::Single(source.into()), key);
        job.quality = quality;
        job
    }

    pub fn decrypt_etc(
        red: impl Into<String>,
        green: impl Into<String>,
        blue: impl Into<String>,
        key: CryptoKey,
    ) -> Self {
        let sources = JobSources::Triple {
            red: red.into(),
            green: green.into(),
            blue: blue.into(),
        };
        Self::new(CryptoMode::DecryptEtc, sources, key)
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(display);
        self
    }

    /// File name of the primary source
    pub fn name(&self) -> String {
        SourceUri::parse(self.sources.primary())
            .map(|uri| uri.file_name())
            .unwrap_or_else(|_| self.sources.primary().to_string())
    }

    /// Check that sources and outputs match the mode
    pub fn validate(&self) -> PipelineResult<()> {
        let sources = self.sources.uris().len();
        if sources != self.mode.source_count() {
            return Err(PipelineError::InvalidJob(format!(
                "{} needs {} source(s), got {}",
                self.mode,
                self.mode.source_count(),
                sources
            )));
        }

        if let Some(output) = &self.output {
            let outputs = output.paths().len();
            if outputs != self.mode.output_count() {
                return Err(PipelineError::InvalidJob(format!(
                    "{} writes {} output(s), got {} path(s)",
                    self.mode,
                    self.mode.output_count(),
                    outputs
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for CryptoJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoJob")
            .field("mode", &self.mode)
            .field("sources", &self.sources)
            .field("key", &self.key)
            .field("output", &self.output)
            .field("quality", &self.quality)
            .field("display", &self.display.is_some())
            .finish()
    }
}

/// Size comparison logged once per completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeRow {
    pub name: String,
    pub original_bytes: u64,
    pub output_bytes: u64,
}

impl SizeRow {
    /// Output size over input size
    pub fn ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.output_bytes as f64 / self.original_bytes as f64
    }
}

impl fmt::Display for SizeRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.name,
            self.original_bytes,
            self.output_bytes,
            self.ratio()
        )
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { outputs: Vec<PathBuf>, sizes: SizeRow },
    /// Outputs were already on disk; nothing was fetched
    AlreadyProduced { outputs: Vec<PathBuf> },
    /// Not submitted, e.g. a file from the wrong phase
    Skipped { reason: String },
    Failed { kind: String, reason: String },
}

impl JobOutcome {
    pub fn failed(error: &PipelineError) -> Self {
        JobOutcome::Failed {
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            JobOutcome::Completed { .. } | JobOutcome::AlreadyProduced { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}
