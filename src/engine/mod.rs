//! Chaos Image Pipeline - Crypto Engine
//!
//! Dispatches transforms to the first registered cipher that handles the
//! detected format. The decrypt-etc entry point is serialized process-wide.

pub mod block_cipher;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{EncodedImageBuffer, ImageFormatTag};
use crate::crypto::CryptoKey;
use crate::error::{PipelineError, PipelineResult};

pub use block_cipher::BlockScrambleCipher;

/// Guards the decrypt-etc section for the whole process
static DECRYPT_ETC_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Valid quality range for etc channel encoding
pub const QUALITY_RANGE: std::ops::RangeInclusive<u8> = 1..=100;

/// Encoded red, green and blue channel images
#[derive(Debug, Clone, Default)]
pub struct EtcChannels {
    pub red: Vec<u8>,
    pub green: Vec<u8>,
    pub blue: Vec<u8>,
}

impl EtcChannels {
    /// Streams in red, green, blue order
    pub fn streams(&self) -> [&[u8]; 3] {
        [&self.red, &self.green, &self.blue]
    }

    pub fn total_bytes(&self) -> u64 {
        (self.red.len() + self.green.len() + self.blue.len()) as u64
    }
}

/// A format-specific image transform
pub trait ImageCipher: Send + Sync {
    /// Name used in logs
    fn identifier(&self) -> &str;

    /// Whether this cipher can decode and re-encode `format`
    fn can_handle(&self, format: ImageFormatTag) -> bool;

    fn encrypt(&self, buffer: &EncodedImageBuffer, key: &CryptoKey) -> PipelineResult<Vec<u8>>;

    fn decrypt(&self, buffer: &EncodedImageBuffer, key: &CryptoKey) -> PipelineResult<Vec<u8>>;

    /// Split into three scrambled single-channel images
    fn encrypt_etc(
        &self,
        buffer: &EncodedImageBuffer,
        key: &CryptoKey,
        quality: u8,
    ) -> PipelineResult<EtcChannels>;

    /// Unscramble three channel images and merge them back
    fn decrypt_etc(
        &self,
        red: &EncodedImageBuffer,
        green: &EncodedImageBuffer,
        blue: &EncodedImageBuffer,
        key: &CryptoKey,
    ) -> PipelineResult<Vec<u8>>;
}

/// Cipher registry and entry points
#[derive(Clone, Default)]
pub struct CryptoEngine {
    ciphers: Vec<Arc<dyn ImageCipher>>,
}

impl CryptoEngine {
    /// Engine with no ciphers registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with the block scrambler for JPEG and PNG
    pub fn with_defaults(single_quality: u8) -> Self {
        let mut engine = Self::new();
        engine.register(Arc::new(BlockScrambleCipher::new(single_quality)));
        engine
    }

    /// Add a cipher; earlier registrations win
    pub fn register(&mut self, cipher: Arc<dyn ImageCipher>) {
        log::debug!("Registered cipher {}", cipher.identifier());
        self.ciphers.push(cipher);
    }

    fn cipher_for(&self, format: ImageFormatTag) -> PipelineResult<&dyn ImageCipher> {
        self.ciphers
            .iter()
            .find(|c| c.can_handle(format))
            .map(|c| c.as_ref())
            .ok_or_else(|| PipelineError::UnsupportedFormat(format.to_string()))
    }

    pub fn encrypt(&self, buffer: &EncodedImageBuffer, key: &CryptoKey) -> PipelineResult<Vec<u8>> {
        let out = self.cipher_for(buffer.format())?.encrypt(buffer, key)?;
        non_empty(out, "encrypt")
    }

    pub fn decrypt(&self, buffer: &EncodedImageBuffer, key: &CryptoKey) -> PipelineResult<Vec<u8>> {
        let out = self.cipher_for(buffer.format())?.decrypt(buffer, key)?;
        non_empty(out, "decrypt")
    }

    /// Encrypt into three channel images at `quality` (1-100)
    pub fn encrypt_etc(
        &self,
        buffer: &EncodedImageBuffer,
        key: &CryptoKey,
        quality: u8,
    ) -> PipelineResult<EtcChannels> {
        if !QUALITY_RANGE.contains(&quality) {
            return Err(PipelineError::InvalidJob(format!(
                "quality {} outside 1-100",
                quality
            )));
        }

        let channels = self.cipher_for(buffer.format())?.encrypt_etc(buffer, key, quality)?;
        for (name, stream) in ["red", "green", "blue"].iter().zip(channels.streams()) {
            if stream.is_empty() {
                return Err(PipelineError::EmptyOutput(format!("encrypt-etc {} channel", name)));
            }
        }
        Ok(channels)
    }

    /// Merge three channel images; only one caller at a time in the process
    pub fn decrypt_etc(
        &self,
        red: &EncodedImageBuffer,
        green: &EncodedImageBuffer,
        blue: &EncodedImageBuffer,
        key: &CryptoKey,
    ) -> PipelineResult<Vec<u8>> {
        let _guard = DECRYPT_ETC_LOCK.lock();

        for other in [green, blue] {
            if other.format() != red.format() {
                return Err(PipelineError::ChannelMismatch(format!(
                    "{} is {}, {} is {}",
                    red.uri(),
                    red.format(),
                    other.uri(),
                    other.format()
                )));
            }
        }

        let out = self
            .cipher_for(red.format())?
            .decrypt_etc(red, green, blue, key)?;
        non_empty(out, "decrypt-etc")
    }
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.ciphers.iter().map(|c| c.identifier()).collect();
        f.debug_struct("CryptoEngine").field("ciphers", &ids).finish()
    }
}

fn non_empty(out: Vec<u8>, operation: &str) -> PipelineResult<Vec<u8>> {
    if out.is_empty() {
        return Err(PipelineError::EmptyOutput(operation.to_string()));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Cipher that echoes its input and counts calls
    #[derive(Default)]
    pub(crate) struct MockCipher {
        pub calls: AtomicUsize,
        pub inside: AtomicUsize,
        pub max_inside: AtomicUsize,
        pub empty_output: bool,
        pub hold: Option<Duration>,
    }

    impl MockCipher {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn output(&self, input: &[u8]) -> Vec<u8> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.empty_output {
                Vec::new()
            } else {
                input.to_vec()
            }
        }
    }

    impl ImageCipher for MockCipher {
        fn identifier(&self) -> &str {
            "mock"
        }

        fn can_handle(&self, _format: ImageFormatTag) -> bool {
            true
        }

        fn encrypt(&self, buffer: &EncodedImageBuffer, _key: &CryptoKey) -> PipelineResult<Vec<u8>> {
            Ok(self.output(buffer.bytes()))
        }

        fn decrypt(&self, buffer: &EncodedImageBuffer, _key: &CryptoKey) -> PipelineResult<Vec<u8>> {
            Ok(self.output(buffer.bytes()))
        }

        fn encrypt_etc(
            &self,
            buffer: &EncodedImageBuffer,
            _key: &CryptoKey,
            _quality: u8,
        ) -> PipelineResult<EtcChannels> {
            let out = self.output(buffer.bytes());
            Ok(EtcChannels {
                red: out.clone(),
                green: out.clone(),
                blue: out,
            })
        }

        fn decrypt_etc(
            &self,
            red: &EncodedImageBuffer,
            _green: &EncodedImageBuffer,
            _blue: &EncodedImageBuffer,
            _key: &CryptoKey,
        ) -> PipelineResult<Vec<u8>> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inside.fetch_max(now, Ordering::SeqCst);
            if let Some(hold) = self.hold {
                std::thread::sleep(hold);
            }
            self.inside.fetch_sub(1, Ordering::SeqCst);
            Ok(self.output(red.bytes()))
        }
    }

    fn buffer(uri: &str) -> EncodedImageBuffer {
        EncodedImageBuffer::from_bytes(uri, b"opaque bytes".to_vec(), None).unwrap()
    }

    #[test]
    fn test_no_cipher_is_unsupported_format() {
        let engine = CryptoEngine::new();
        let key = CryptoKey::fixed().unwrap();
        let err = engine.encrypt(&buffer("a.gif"), &key).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_output_is_rejected() {
        let mut engine = CryptoEngine::new();
        engine.register(Arc::new(MockCipher {
            empty_output: true,
            ..Default::default()
        }));
        let key = CryptoKey::fixed().unwrap();

        assert!(matches!(
            engine.encrypt_etc(&buffer("a.jpg"), &key, 50),
            Err(PipelineError::EmptyOutput(_))
        ));
        assert!(matches!(
            engine.decrypt(&buffer("a.jpg"), &key),
            Err(PipelineError::EmptyOutput(_))
        ));
    }

    #[test]
    fn test_quality_out_of_range() {
        let mut engine = CryptoEngine::new();
        engine.register(Arc::new(MockCipher::default()));
        let key = CryptoKey::fixed().unwrap();

        assert!(engine.encrypt_etc(&buffer("a.jpg"), &key, 0).is_err());
        assert!(engine.encrypt_etc(&buffer("a.jpg"), &key, 101).is_err());
        assert!(engine.encrypt_etc(&buffer("a.jpg"), &key, 100).is_ok());
    }

    #[test]
    fn test_decrypt_etc_never_overlaps() {
        let mock = Arc::new(MockCipher {
            hold: Some(Duration::from_millis(15)),
            ..Default::default()
        });
        let mut engine = CryptoEngine::new();
        engine.register(mock.clone());
        let engine = Arc::new(engine);

        let workers: Vec<_> = (0..6)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let key = CryptoKey::fixed().unwrap();
                    let (r, g, b) = (
                        buffer(&format!("{}_red", i)),
                        buffer(&format!("{}_green", i)),
                        buffer(&format!("{}_blue", i)),
                    );
                    engine.decrypt_etc(&r, &g, &b, &key).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(mock.calls(), 6);
        assert_eq!(mock.max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decrypt_etc_rejects_mixed_formats() {
        let mut engine = CryptoEngine::new();
        engine.register(Arc::new(MockCipher::default()));
        let key = CryptoKey::fixed().unwrap();

        let png = crate::buffer::tests::sample_image(8, 8, image::ImageFormat::Png);
        let green = EncodedImageBuffer::from_bytes("g.png", png, None).unwrap();
        let err = engine
            .decrypt_etc(&buffer("r"), &green, &buffer("b"), &key)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ChannelMismatch(_)));
    }
}
