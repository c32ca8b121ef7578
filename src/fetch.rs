//! Chaos Image Pipeline - Source Fetch
//!
//! A fetch is a spawned task that streams `FetchEvent`s over a channel: any
//! number of progress notifications followed by exactly one terminal
//! `Ready` or `Failed`. Consumers only care about the terminal event.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::buffer::{BufferTracker, EncodedImageBuffer};
use crate::error::{PipelineError, PipelineResult};

/// Read size for local sources
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Event channel depth per fetch
const EVENT_CAPACITY: usize = 16;

/// Where a source image lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceUri {
    Local(PathBuf),
    Remote(String),
}

impl SourceUri {
    /// Parse a plain path, `file://` URI or `http(s)://` URL
    pub fn parse(uri: &str) -> PipelineResult<Self> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::fetch(uri, "empty source URI"));
        }

        if let Some(path) = trimmed.strip_prefix("file://") {
            return Ok(SourceUri::Local(PathBuf::from(path)));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(SourceUri::Remote(trimmed.to_string()));
        }
        Ok(SourceUri::Local(PathBuf::from(trimmed)))
    }

    /// Last path segment, used for naming outputs and CSV rows
    pub fn file_name(&self) -> String {
        match self {
            SourceUri::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            SourceUri::Remote(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|u| u.rsplit('/').next())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl From<&Path> for SourceUri {
    fn from(path: &Path) -> Self {
        SourceUri::Local(path.to_path_buf())
    }
}

impl fmt::Display for SourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceUri::Local(path) => write!(f, "{}", path.display()),
            SourceUri::Remote(url) => f.write_str(url),
        }
    }
}

/// Notification emitted by a running fetch
#[derive(Debug)]
pub enum FetchEvent {
    /// Bytes received so far
    Progress { received: u64, total: Option<u64> },
    /// Terminal success
    Ready(EncodedImageBuffer),
    /// Terminal failure
    Failed(PipelineError),
}

/// Receiving end of one fetch
#[derive(Debug)]
pub struct FetchHandle {
    uri: String,
    events: mpsc::Receiver<FetchEvent>,
}

impl FetchHandle {
    /// Open an event channel for a fetch producer
    pub fn channel(uri: &str) -> (mpsc::Sender<FetchEvent>, FetchHandle) {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        (
            tx,
            FetchHandle {
                uri: uri.to_string(),
                events: rx,
            },
        )
    }

    /// Handle that resolves immediately to a failure
    pub fn failed(uri: &str, error: PipelineError) -> FetchHandle {
        let (tx, handle) = Self::channel(uri);
        // capacity is non-zero and the receiver is alive
        let _ = tx.try_send(FetchEvent::Failed(error));
        handle
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Wait for the terminal event, skipping intermediate notifications
    ///
    /// A producer that goes away without a terminal event is a fetch failure.
    pub async fn terminal(mut self) -> PipelineResult<EncodedImageBuffer> {
        while let Some(event) = self.events.recv().await {
            match event {
                FetchEvent::Progress { received, total } => {
                    log::trace!("fetch {}: {} / {:?} bytes", self.uri, received, total);
                }
                FetchEvent::Ready(buffer) => return Ok(buffer),
                FetchEvent::Failed(e) => return Err(e),
            }
        }
        Err(PipelineError::fetch(
            self.uri,
            "source closed without producing a result",
        ))
    }
}

/// Run `produce` on the runtime and deliver its result as the terminal event
///
/// Must be called from inside a tokio runtime.
pub fn spawn_fetch<F, Fut>(uri: &str, produce: F) -> FetchHandle
where
    F: FnOnce(mpsc::Sender<FetchEvent>) -> Fut,
    Fut: Future<Output = PipelineResult<EncodedImageBuffer>> + Send + 'static,
{
    let (tx, handle) = FetchHandle::channel(uri);
    let work = produce(tx.clone());

    tokio::spawn(async move {
        let event = match work.await {
            Ok(buffer) => FetchEvent::Ready(buffer),
            Err(e) => FetchEvent::Failed(e),
        };
        // A closed receiver drops the event and with it the buffer
        let _ = tx.send(event).await;
    });

    handle
}

/// Asynchronous source of encoded image bytes
pub trait SourceFetcher: Send + Sync {
    /// Start fetching `uri`
    fn fetch(&self, uri: &str) -> FetchHandle;
}

// ═══════════════════════════════════════════════════════════════
// LOCAL FILES
// ═══════════════════════════════════════════════════════════════

/// Reads local files in chunks on the tokio runtime
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    tracker: Option<BufferTracker>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count produced buffers with `tracker`
    pub fn with_tracker(tracker: BufferTracker) -> Self {
        Self {
            tracker: Some(tracker),
        }
    }

    fn fetch_path(&self, uri: &str, path: PathBuf) -> FetchHandle {
        let tracker = self.tracker.clone();
        let uri_owned = uri.to_string();

        spawn_fetch(uri, move |events| async move {
            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| PipelineError::fetch(&uri_owned, e))?;
            let total = file.metadata().await.ok().map(|m| m.len());

            let mut data = Vec::with_capacity(total.unwrap_or(0) as usize);
            let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
            loop {
                let n = file
                    .read(&mut chunk)
                    .await
                    .map_err(|e| PipelineError::fetch(&uri_owned, e))?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&chunk[..n]);
                let _ = events
                    .send(FetchEvent::Progress {
                        received: data.len() as u64,
                        total,
                    })
                    .await;
            }

            EncodedImageBuffer::from_bytes(&uri_owned, data, tracker.as_ref())
        })
    }
}

impl SourceFetcher for FileFetcher {
    fn fetch(&self, uri: &str) -> FetchHandle {
        match SourceUri::parse(uri) {
            Ok(SourceUri::Local(path)) => self.fetch_path(uri, path),
            Ok(SourceUri::Remote(_)) => FetchHandle::failed(
                uri,
                PipelineError::fetch(uri, "remote URI given to the file fetcher"),
            ),
            Err(e) => FetchHandle::failed(uri, e),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// REMOTE SOURCES
// ═══════════════════════════════════════════════════════════════

/// Downloads `http(s)://` sources with reqwest
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
    tracker: Option<BufferTracker>,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    pub fn new(client: reqwest::Client, tracker: Option<BufferTracker>) -> Self {
        Self { client, tracker }
    }
}

#[cfg(feature = "remote")]
impl SourceFetcher for HttpFetcher {
    fn fetch(&self, uri: &str) -> FetchHandle {
        use futures_util::StreamExt;

        let client = self.client.clone();
        let tracker = self.tracker.clone();
        let url = uri.to_string();

        spawn_fetch(uri, move |events| async move {
            let response = client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(PipelineError::fetch(&url, format!("HTTP {}", response.status())));
            }

            let total = response.content_length();
            let mut data = Vec::with_capacity(total.unwrap_or(0) as usize);
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                data.extend_from_slice(&chunk);
                let _ = events
                    .send(FetchEvent::Progress {
                        received: data.len() as u64,
                        total,
                    })
                    .await;
            }

            EncodedImageBuffer::from_bytes(&url, data, tracker.as_ref())
        })
    }
}

/// Routes each URI to the file or HTTP fetcher
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    file: FileFetcher,
    #[cfg(feature = "remote")]
    http: HttpFetcher,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(tracker: BufferTracker) -> Self {
        Self {
            file: FileFetcher::with_tracker(tracker.clone()),
            #[cfg(feature = "remote")]
            http: HttpFetcher::new(reqwest::Client::new(), Some(tracker)),
        }
    }
}

impl SourceFetcher for DefaultFetcher {
    fn fetch(&self, uri: &str) -> FetchHandle {
        match SourceUri::parse(uri) {
            Ok(SourceUri::Local(path)) => self.file.fetch_path(uri, path),
            #[cfg(feature = "remote")]
            Ok(SourceUri::Remote(_)) => self.http.fetch(uri),
            #[cfg(not(feature = "remote"))]
            Ok(SourceUri::Remote(_)) => FetchHandle::failed(
                uri,
                PipelineError::fetch(uri, "built without remote source support"),
            ),
            Err(e) => FetchHandle::failed(uri, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::sample_image;
    use crate::buffer::ImageFormatTag;
    use tempfile::tempdir;

    #[test]
    fn test_parse_uri_forms() {
        assert_eq!(
            SourceUri::parse("file:///tmp/a.jpg").unwrap(),
            SourceUri::Local(PathBuf::from("/tmp/a.jpg"))
        );
        assert_eq!(
            SourceUri::parse("photos/b.png").unwrap(),
            SourceUri::Local(PathBuf::from("photos/b.png"))
        );
        assert!(matches!(
            SourceUri::parse("https://host/img/c.jpg?size=2").unwrap(),
            SourceUri::Remote(_)
        ));
        assert!(SourceUri::parse("  ").is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(SourceUri::parse("/a/b/c.jpg").unwrap().file_name(), "c.jpg");
        assert_eq!(
            SourceUri::parse("https://host/img/c.jpg?size=2").unwrap().file_name(),
            "c.jpg"
        );
    }

    #[tokio::test]
    async fn test_file_fetch_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pic.png");
        // large enough to produce several progress events
        std::fs::write(&path, sample_image(300, 300, image::ImageFormat::Png)).unwrap();

        let tracker = BufferTracker::new();
        let fetcher = FileFetcher::with_tracker(tracker.clone());
        let buffer = fetcher
            .fetch(path.to_str().unwrap())
            .terminal()
            .await
            .unwrap();

        assert_eq!(buffer.format(), ImageFormatTag::Png);
        assert_eq!(buffer.width(), 300);
        assert_eq!(tracker.outstanding(), 1);
        drop(buffer);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_fetch_failure() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");

        let err = DefaultFetcher::new()
            .fetch(&format!("file://{}", missing.display()))
            .terminal()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailure { .. }));
    }

    #[tokio::test]
    async fn test_closed_producer_is_fetch_failure() {
        let (tx, handle) = FetchHandle::channel("mock://gone");
        tx.send(FetchEvent::Progress { received: 1, total: None })
            .await
            .unwrap();
        drop(tx);

        let err = handle.terminal().await.unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailure { ref uri, .. } if uri == "mock://gone"));
    }
}
