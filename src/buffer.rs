//! Chaos Image Pipeline - Encoded Image Buffers
//!
//! Fetched bytes travel through the pipeline as `EncodedImageBuffer`s. A buffer
//! is owned by exactly one stage at a time and released when dropped; the
//! optional `BufferTracker` counts buffers that are still alive.

use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Colour channel of an etc-mode triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    /// Channels in join and plane order
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        }
    }

    /// Plane index inside an RGB image
    pub fn index(&self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected container format of an encoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormatTag {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Unknown,
}

impl ImageFormatTag {
    /// Detect the format from magic bytes
    pub fn detect(data: &[u8]) -> Self {
        match image::guess_format(data) {
            Ok(image::ImageFormat::Jpeg) => ImageFormatTag::Jpeg,
            Ok(image::ImageFormat::Png) => ImageFormatTag::Png,
            Ok(image::ImageFormat::Gif) => ImageFormatTag::Gif,
            Ok(image::ImageFormat::WebP) => ImageFormatTag::Webp,
            Ok(image::ImageFormat::Bmp) => ImageFormatTag::Bmp,
            _ => ImageFormatTag::Unknown,
        }
    }

    /// Matching `image` crate format, if any
    pub fn image_format(&self) -> Option<image::ImageFormat> {
        match self {
            ImageFormatTag::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormatTag::Png => Some(image::ImageFormat::Png),
            ImageFormatTag::Gif => Some(image::ImageFormat::Gif),
            ImageFormatTag::Webp => Some(image::ImageFormat::WebP),
            ImageFormatTag::Bmp => Some(image::ImageFormat::Bmp),
            ImageFormatTag::Unknown => None,
        }
    }
}

impl fmt::Display for ImageFormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormatTag::Jpeg => "jpeg",
            ImageFormatTag::Png => "png",
            ImageFormatTag::Gif => "gif",
            ImageFormatTag::Webp => "webp",
            ImageFormatTag::Bmp => "bmp",
            ImageFormatTag::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Counts buffers that have been handed out and not yet released
#[derive(Debug, Clone, Default)]
pub struct BufferTracker {
    live: Arc<AtomicUsize>,
}

impl BufferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers currently alive
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn lease(&self) -> Lease {
        self.live.fetch_add(1, Ordering::SeqCst);
        Lease {
            live: Arc::clone(&self.live),
        }
    }
}

#[derive(Debug)]
struct Lease {
    live: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Encoded bytes of one image plus header metadata
#[derive(Debug)]
pub struct EncodedImageBuffer {
    uri: String,
    bytes: Arc<[u8]>,
    format: ImageFormatTag,
    width: u32,
    height: u32,
    _lease: Option<Lease>,
}

impl EncodedImageBuffer {
    /// Wrap fetched bytes, reading format and dimensions from the header
    ///
    /// Empty input and unreadable headers of a known format are fetch
    /// failures. Unknown formats are accepted so the engine can reject them.
    pub fn from_bytes(
        uri: &str,
        bytes: Vec<u8>,
        tracker: Option<&BufferTracker>,
    ) -> PipelineResult<Self> {
        if bytes.is_empty() {
            return Err(PipelineError::fetch(uri, "source is empty"));
        }

        let format = ImageFormatTag::detect(&bytes);
        let (width, height) = match format.image_format() {
            Some(fmt) => image::ImageReader::with_format(Cursor::new(&bytes), fmt)
                .into_dimensions()
                .map_err(|e| PipelineError::fetch(uri, format!("corrupt {} header: {}", format, e)))?,
            None => (0, 0),
        };

        Ok(Self {
            uri: uri.to_string(),
            bytes: Arc::from(bytes),
            format,
            width,
            height,
            _lease: tracker.map(BufferTracker::lease),
        })
    }

    /// Originating URI
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Encoded bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> ImageFormatTag {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode a small RGB test pattern
    pub(crate) fn sample_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), format)
            .unwrap();
        out
    }

    #[test]
    fn test_metadata_from_header() {
        let bytes = sample_image(40, 24, image::ImageFormat::Png);
        let buffer = EncodedImageBuffer::from_bytes("file:///a.png", bytes, None).unwrap();

        assert_eq!(buffer.format(), ImageFormatTag::Png);
        assert_eq!((buffer.width(), buffer.height()), (40, 24));
        assert_eq!(buffer.uri(), "file:///a.png");
    }

    #[test]
    fn test_unknown_format_is_accepted() {
        let buffer = EncodedImageBuffer::from_bytes("x", b"definitely not an image".to_vec(), None).unwrap();
        assert_eq!(buffer.format(), ImageFormatTag::Unknown);
    }

    #[test]
    fn test_empty_source_is_fetch_failure() {
        let err = EncodedImageBuffer::from_bytes("x", Vec::new(), None).unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailure { .. }));
    }

    #[test]
    fn test_tracker_counts_live_buffers() {
        let tracker = BufferTracker::new();
        let bytes = sample_image(8, 8, image::ImageFormat::Png);

        let a = EncodedImageBuffer::from_bytes("a", bytes.clone(), Some(&tracker)).unwrap();
        let b = EncodedImageBuffer::from_bytes("b", bytes, Some(&tracker)).unwrap();
        assert_eq!(tracker.outstanding(), 2);

        drop(a);
        assert_eq!(tracker.outstanding(), 1);
        drop(b);
        assert_eq!(tracker.outstanding(), 0);
    }
}
