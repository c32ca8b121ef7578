//! Chaos Image Pipeline - Storage Layout and Naming
//!
//! Directory structure under the storage root and the file naming rules that
//! tie originals, encrypted outputs and decrypted results together.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::buffer::Channel;
use crate::error::PipelineResult;

/// Source images awaiting encryption
pub const ORIGINALS_DIR: &str = "originals";
/// Single and etc encryption results
pub const ENCRYPTED_DIR: &str = "encrypted-output";
/// Channel images after downstream recompression
pub const COMPRESSED_DIR: &str = "encrypted-gp-compressed";
/// Downscaled originals
pub const THUMBNAILS_DIR: &str = "resized-thumbnails";
/// Created beside each etc triple
pub const DECRYPTED_DIR: &str = "decrypted";

/// Marker present in every encrypted file name
pub const ENCRYPTED_MARKER: &str = "encrypted";
/// Marker present in every decrypted file name
pub const DECRYPTED_MARKER: &str = "decrypted";

/// Storage root and its fixed subdirectories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `root`, without touching the filesystem
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create the directory structure
    pub fn create<P: AsRef<Path>>(root: P) -> PipelineResult<Self> {
        let layout = Self::new(root);
        for dir in layout.directories() {
            fs::create_dir_all(&dir)?;
        }
        log::debug!("Storage layout ready at {}", layout.root.display());
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn originals(&self) -> PathBuf {
        self.root.join(ORIGINALS_DIR)
    }

    pub fn encrypted(&self) -> PathBuf {
        self.root.join(ENCRYPTED_DIR)
    }

    pub fn compressed(&self) -> PathBuf {
        self.root.join(COMPRESSED_DIR)
    }

    pub fn thumbnails(&self) -> PathBuf {
        self.root.join(THUMBNAILS_DIR)
    }

    /// All managed directories
    pub fn directories(&self) -> [PathBuf; 4] {
        [
            self.originals(),
            self.encrypted(),
            self.compressed(),
            self.thumbnails(),
        ]
    }

    /// Unique output path in the encryption directory for `source_name`
    pub fn temp_output(&self, source_name: &str) -> PathBuf {
        let (stem, ext) = split_name(source_name);
        let stem = if stem.is_empty() { "image" } else { stem };
        self.encrypted()
            .join(join_name(&format!("{}-{}", stem, Uuid::new_v4()), ext))
    }
}

// ═══════════════════════════════════════════════════════════════
// NAMING
// ═══════════════════════════════════════════════════════════════

/// Split `name` into stem and optional extension
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

fn join_name(stem: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// Replace the last occurrence of `from` in the stem
fn replace_last(stem: &str, from: &str, to: &str) -> Option<String> {
    stem.rfind(from)
        .map(|pos| format!("{}{}{}", &stem[..pos], to, &stem[pos + from.len()..]))
}

/// Whether a file name carries the encrypted marker
pub fn is_encrypted_name(name: &str) -> bool {
    name.contains(ENCRYPTED_MARKER)
}

/// `N.ext` -> `N_encrypted.ext`
pub fn encrypted_name(name: &str) -> String {
    let (stem, ext) = split_name(name);
    join_name(&format!("{}_{}", stem, ENCRYPTED_MARKER), ext)
}

/// `N_encrypted.ext` -> `N_decrypted.ext`; names without the marker gain a suffix
pub fn decrypted_name(name: &str) -> String {
    let (stem, ext) = split_name(name);
    let stem = replace_last(stem, ENCRYPTED_MARKER, DECRYPTED_MARKER)
        .unwrap_or_else(|| format!("{}_{}", stem, DECRYPTED_MARKER));
    join_name(&stem, ext)
}

/// `N.ext` -> red, green and blue channel names
pub fn etc_channel_names(name: &str) -> [String; 3] {
    let (stem, ext) = split_name(name);
    Channel::ALL.map(|channel| {
        join_name(&format!("{}_{}_{}", stem, ENCRYPTED_MARKER, channel), ext)
    })
}

/// Whether a file name is the red member of an etc triple
pub fn is_etc_red_name(name: &str) -> bool {
    let (stem, _) = split_name(name);
    stem.ends_with(Channel::Red.as_str())
}

/// Sibling channel name found by substituting the trailing `red` token
pub fn etc_sibling_name(red_name: &str, channel: Channel) -> Option<String> {
    let (stem, ext) = split_name(red_name);
    replace_last(stem, Channel::Red.as_str(), channel.as_str()).map(|s| join_name(&s, ext))
}

/// Output name for a merged triple
///
/// `N_encrypted_red.ext` -> `N_decrypted.ext`; other names replace `red`.
pub fn etc_decrypted_name(red_name: &str) -> String {
    let (stem, ext) = split_name(red_name);
    let suffix = format!("_{}_{}", ENCRYPTED_MARKER, Channel::Red);
    let stem = match stem.strip_suffix(&suffix) {
        Some(base) => format!("{}_{}", base, DECRYPTED_MARKER),
        None => replace_last(stem, Channel::Red.as_str(), DECRYPTED_MARKER)
            .unwrap_or_else(|| format!("{}_{}", stem, DECRYPTED_MARKER)),
    };
    join_name(&stem, ext)
}

/// `<dir>/decrypted/<merged name>` for a red channel path
pub fn etc_decrypted_path(red_path: &Path) -> PathBuf {
    let name = file_name(red_path);
    red_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(DECRYPTED_DIR)
        .join(etc_decrypted_name(&name))
}

/// File name of `path` as an owned string
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
