//! Chaos Image Pipeline - Channel Join
//!
//! Barrier between fetching and transforming. A bundle is only produced when
//! every fetch it depends on reached `Ready`; otherwise the buffers that did
//! arrive are dropped on the spot and nothing reaches the engine.

use crate::buffer::{Channel, EncodedImageBuffer};
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::FetchHandle;

/// One or three fetched buffers owned by a single job
#[derive(Debug)]
pub enum ChannelBundle {
    Single(EncodedImageBuffer),
    Triple {
        red: EncodedImageBuffer,
        green: EncodedImageBuffer,
        blue: EncodedImageBuffer,
    },
}

impl ChannelBundle {
    /// Sum of the encoded sizes of all buffers
    pub fn total_bytes(&self) -> u64 {
        match self {
            ChannelBundle::Single(b) => b.len() as u64,
            ChannelBundle::Triple { red, green, blue } => {
                (red.len() + green.len() + blue.len()) as u64
            }
        }
    }

    /// Originating URIs in channel order
    pub fn uris(&self) -> Vec<&str> {
        match self {
            ChannelBundle::Single(b) => vec![b.uri()],
            ChannelBundle::Triple { red, green, blue } => vec![red.uri(), green.uri(), blue.uri()],
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            ChannelBundle::Single(_) => 1,
            ChannelBundle::Triple { .. } => 3,
        }
    }
}

/// Forward a single fetch result
pub async fn join_single(handle: FetchHandle) -> PipelineResult<ChannelBundle> {
    handle.terminal().await.map(ChannelBundle::Single)
}

/// Wait for all three channel fetches
///
/// Fetches are polled in red, green, blue order. The first failure
/// short-circuits the join; ready buffers are released before this returns.
/// There is no timeout: a fetch that never terminates stalls the join.
pub async fn join_triple(
    red: FetchHandle,
    green: FetchHandle,
    blue: FetchHandle,
) -> PipelineResult<ChannelBundle> {
    let (red, green, blue) = tokio::try_join!(
        tagged(Channel::Red, red),
        tagged(Channel::Green, green),
        tagged(Channel::Blue, blue),
    )?;

    Ok(ChannelBundle::Triple { red, green, blue })
}

async fn tagged(channel: Channel, handle: FetchHandle) -> PipelineResult<EncodedImageBuffer> {
    handle.terminal().await.map_err(|e| {
        log::debug!("{} channel fetch failed: {}", channel, e);
        PipelineError::JoinIncomplete {
            channel,
            source: Box::new(e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::sample_image;
    use crate::buffer::BufferTracker;
    use crate::fetch::FetchEvent;
    use std::time::Duration;

    fn ready(uri: &str, tracker: &BufferTracker) -> FetchHandle {
        let (tx, handle) = FetchHandle::channel(uri);
        let bytes = sample_image(16, 16, image::ImageFormat::Png);
        let buffer = EncodedImageBuffer::from_bytes(uri, bytes, Some(tracker)).unwrap();
        tx.try_send(FetchEvent::Ready(buffer)).unwrap();
        handle
    }

    #[tokio::test]
    async fn test_triple_join_complete() {
        let tracker = BufferTracker::new();
        let bundle = join_triple(
            ready("r.png", &tracker),
            ready("g.png", &tracker),
            ready("b.png", &tracker),
        )
        .await
        .unwrap();

        assert_eq!(bundle.channel_count(), 3);
        assert_eq!(bundle.uris(), vec!["r.png", "g.png", "b.png"]);
        assert_eq!(tracker.outstanding(), 3);
        drop(bundle);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_one_failure_releases_ready_buffers() {
        let tracker = BufferTracker::new();
        let (green_tx, green) = FetchHandle::channel("g.png");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = green_tx
                .send(FetchEvent::Failed(PipelineError::fetch("g.png", "connection reset")))
                .await;
        });

        let err = join_triple(ready("r.png", &tracker), green, ready("b.png", &tracker))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::JoinIncomplete { channel: Channel::Green, .. }
        ));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_single_join_forwards_failure() {
        let handle = FetchHandle::failed("x.jpg", PipelineError::fetch("x.jpg", "gone"));
        let err = join_single(handle).await.unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailure { .. }));
    }
}
