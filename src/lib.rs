//! # Chaos Image Pipeline
//!
//! Asynchronous image crypto pipeline built on a chaotic logistic map.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    BATCH SEQUENCER                        │
//! │          one job at a time, failures counted              │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │ CryptoJob
//! ┌───────────────┐   ┌───────┴───────┐   ┌──────────────────┐
//! │ SOURCE FETCH  │──▶│ CHANNEL JOIN  │──▶│  CRYPTO ENGINE   │
//! │ file / http   │   │ 1 or 3 ready  │   │  block scramble  │
//! └───────────────┘   └───────────────┘   │  decrypt-etc lock│
//!                                         └────────┬─────────┘
//!                                         ┌────────┴─────────┐
//!                                         │   JOB WRITER     │
//!                                         │ temp + rename    │
//!                                         └──────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Outputs are written at most once; a non-empty target skips the job
//! - A failed 3-way join never reaches the engine
//! - Failed jobs leave no partial files behind
//! - decrypt-etc runs one call at a time per process

pub mod batch;
pub mod buffer;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod job;
pub mod join;
pub mod layout;
pub mod pipeline;
pub mod thumbs;
pub mod writer;

pub use batch::{BatchReport, BatchSequencer};
pub use buffer::{BufferTracker, Channel, EncodedImageBuffer, ImageFormatTag};
pub use config::PipelineConfig;
pub use crypto::CryptoKey;
pub use engine::{CryptoEngine, ImageCipher};
pub use error::{PipelineError, PipelineResult};
pub use fetch::{DefaultFetcher, FetchEvent, FetchHandle, SourceFetcher};
pub use job::{CryptoJob, CryptoMode, JobOutcome};
pub use layout::StorageLayout;
pub use pipeline::Pipeline;
pub use thumbs::ThumbnailStage;
pub use writer::{IndexNotifier, JobWriter, OutputTarget, WriteStatus};

/// Chaos Image Pipeline version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
