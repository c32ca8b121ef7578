//! Chaos Image Pipeline - Configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::{self, CryptoKey};
use crate::error::{PipelineError, PipelineResult};
use crate::layout::StorageLayout;

/// JPEG quality of etc channel images
pub const DEFAULT_ETC_QUALITY: u8 = 50;
/// JPEG quality when re-encoding single images
pub const DEFAULT_SINGLE_QUALITY: u8 = 95;
/// Bounding box edge for thumbnails
pub const DEFAULT_THUMBNAIL_BOX: u32 = 400;
/// JPEG quality of thumbnails
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 50;
/// Decimal digits of generated keys
pub const DEFAULT_KEY_PRECISION: usize = 72;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Storage root holding the managed directories
    pub root: PathBuf,
    /// Etc channel quality (1-100)
    pub etc_quality: u8,
    /// Single image re-encode quality (1-100)
    pub single_quality: u8,
    /// Downscale originals before etc encryption
    pub thumbnails_enabled: bool,
    pub thumbnail_box: u32,
    pub thumbnail_quality: u8,
    /// Batch runs use the static key instead of a fresh one
    pub use_static_key: bool,
    pub static_x0: String,
    pub static_mu: String,
    /// Digits for generated keys
    pub key_precision: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("chaos-pipeline"),
            etc_quality: DEFAULT_ETC_QUALITY,
            single_quality: DEFAULT_SINGLE_QUALITY,
            thumbnails_enabled: true,
            thumbnail_box: DEFAULT_THUMBNAIL_BOX,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
            use_static_key: true,
            static_x0: crypto::fixed::X0.into(),
            static_mu: crypto::fixed::MU.into(),
            key_precision: DEFAULT_KEY_PRECISION,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        self.validate()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> PipelineResult<()> {
        for (name, quality) in [
            ("etc_quality", self.etc_quality),
            ("single_quality", self.single_quality),
            ("thumbnail_quality", self.thumbnail_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(PipelineError::Config(format!(
                    "{} must be 1-100, got {}",
                    name, quality
                )));
            }
        }
        if self.thumbnail_box == 0 {
            return Err(PipelineError::Config("thumbnail_box must be positive".into()));
        }
        if self.key_precision < 2 {
            return Err(PipelineError::Config("key_precision must be at least 2".into()));
        }
        Ok(())
    }

    /// Key for a batch run: the static key or a freshly generated one
    pub fn batch_key(&self) -> PipelineResult<CryptoKey> {
        if self.use_static_key {
            CryptoKey::build(&self.static_x0, &self.static_mu)
        } else {
            CryptoKey::generate(self.key_precision, self.key_precision)
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf/pipeline.json");

        let config = PipelineConfig {
            root: dir.path().to_path_buf(),
            etc_quality: 70,
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "root": "/srv/images" }"#).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/images"));
        assert_eq!(config.etc_quality, DEFAULT_ETC_QUALITY);
        assert_eq!(config.thumbnail_box, DEFAULT_THUMBNAIL_BOX);
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let config = PipelineConfig {
            etc_quality: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_batch_key() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_key().unwrap(), CryptoKey::fixed().unwrap());

        let fresh = PipelineConfig {
            use_static_key: false,
            key_precision: 20,
            ..Default::default()
        };
        assert_ne!(fresh.batch_key().unwrap(), CryptoKey::fixed().unwrap());
    }
}
