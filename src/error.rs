//! Chaos Image Pipeline - Error Types

use thiserror::Error;

use crate::buffer::Channel;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error types
///
/// Every variant is local to one job: the job boundary catches it, logs it
/// and the batch moves on.
#[derive(Error, Debug)]
pub enum PipelineError {
    // ═══════════════════════════════════════════════════════════════
    // KEY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid key parameter {name}={value:?}: {reason}")]
    InvalidKeyParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════
    // FETCH ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Failed to fetch {uri}: {reason}")]
    FetchFailure { uri: String, reason: String },

    #[error("Channel join incomplete, {channel} fetch failed: {source}")]
    JoinIncomplete {
        channel: Channel,
        #[source]
        source: Box<PipelineError>,
    },

    // ═══════════════════════════════════════════════════════════════
    // ENGINE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("No transform registered for image format: {0}")]
    UnsupportedFormat(String),

    #[error("Engine produced an empty output: {0}")]
    EmptyOutput(String),

    #[error("Channel images do not match: {0}")]
    ChannelMismatch(String),

    #[error("Image processing error: {0}")]
    Image(String),

    // ═══════════════════════════════════════════════════════════════
    // FILE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // JOB / BATCH ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("A batch run is already in progress")]
    BatchAlreadyRunning,

    #[error("Engine task aborted: {0}")]
    TaskAborted(String),

    // ═══════════════════════════════════════════════════════════════
    // CONFIG ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Short stable name used in logs and batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidKeyParameter { .. } => "InvalidKeyParameter",
            PipelineError::FetchFailure { .. } => "FetchFailure",
            PipelineError::JoinIncomplete { .. } => "JoinIncomplete",
            PipelineError::UnsupportedFormat(_) => "UnsupportedFormat",
            PipelineError::EmptyOutput(_) => "EmptyOutput",
            PipelineError::ChannelMismatch(_) => "ChannelMismatch",
            PipelineError::Image(_) => "Image",
            PipelineError::Io(_) => "IOFailure",
            PipelineError::InvalidJob(_) => "InvalidJob",
            PipelineError::BatchAlreadyRunning => "BatchAlreadyRunning",
            PipelineError::TaskAborted(_) => "TaskAborted",
            PipelineError::Config(_) => "Config",
        }
    }

    /// Check if the failure happened before any bytes reached the engine
    pub fn is_fetch_related(&self) -> bool {
        matches!(
            self,
            PipelineError::FetchFailure { .. } | PipelineError::JoinIncomplete { .. }
        )
    }

    /// Check if this error requires the job's partial outputs to be removed
    pub fn deletes_partial_output(&self) -> bool {
        matches!(self, PipelineError::EmptyOutput(_) | PipelineError::Io(_))
    }

    pub(crate) fn fetch(uri: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::FetchFailure {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Unsupported(u) => PipelineError::UnsupportedFormat(u.to_string()),
            other => PipelineError::Image(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        let uri = e.url().map(|u| u.to_string()).unwrap_or_default();
        PipelineError::FetchFailure {
            uri,
            reason: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::TaskAborted(e.to_string())
    }
}
