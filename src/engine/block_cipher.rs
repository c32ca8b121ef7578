//! Chaos Image Pipeline - Block Scramble Cipher
//!
//! Pixel-domain transform: decode, permute 8x8 blocks of every plane with the
//! key's orbit, re-encode in the source format. PNG round trips are exact;
//! JPEG round trips carry the usual re-encoding loss.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, GenericImageView, ImageEncoder};

use super::{EtcChannels, ImageCipher};
use crate::buffer::{EncodedImageBuffer, ImageFormatTag};
use crate::config::DEFAULT_SINGLE_QUALITY;
use crate::crypto::{scramble_plane, ChaoticOrbit, CryptoKey, Direction};
use crate::error::{PipelineError, PipelineResult};

/// 8-bit interleaved pixels
struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    color: ColorType,
}

impl RawImage {
    fn channels(&self) -> usize {
        self.color.channel_count() as usize
    }
}

/// Logistic-map block scrambler for JPEG and PNG
#[derive(Debug, Clone)]
pub struct BlockScrambleCipher {
    single_quality: u8,
}

impl BlockScrambleCipher {
    pub fn new(single_quality: u8) -> Self {
        Self {
            single_quality: single_quality.clamp(1, 100),
        }
    }

    fn transform(
        &self,
        buffer: &EncodedImageBuffer,
        key: &CryptoKey,
        direction: Direction,
    ) -> PipelineResult<Vec<u8>> {
        let mut raw = decode(buffer)?;
        let channels = raw.channels();
        let (width, height) = (raw.width as usize, raw.height as usize);

        let mut orbit = ChaoticOrbit::new(key);
        for c in 0..channels {
            let mut plane = extract_plane(&raw.data, channels, c);
            scramble_plane(&mut plane, width, height, &mut orbit, direction);
            insert_plane(&mut raw.data, channels, c, &plane);
        }

        encode(&raw, buffer.format(), self.single_quality)
    }
}

impl Default for BlockScrambleCipher {
    fn default() -> Self {
        Self::new(DEFAULT_SINGLE_QUALITY)
    }
}

impl ImageCipher for BlockScrambleCipher {
    fn identifier(&self) -> &str {
        "block-scramble"
    }

    fn can_handle(&self, format: ImageFormatTag) -> bool {
        matches!(format, ImageFormatTag::Jpeg | ImageFormatTag::Png)
    }

    fn encrypt(&self, buffer: &EncodedImageBuffer, key: &CryptoKey) -> PipelineResult<Vec<u8>> {
        self.transform(buffer, key, Direction::Forward)
    }

    fn decrypt(&self, buffer: &EncodedImageBuffer, key: &CryptoKey) -> PipelineResult<Vec<u8>> {
        self.transform(buffer, key, Direction::Inverse)
    }

    fn encrypt_etc(
        &self,
        buffer: &EncodedImageBuffer,
        key: &CryptoKey,
        quality: u8,
    ) -> PipelineResult<EtcChannels> {
        let rgb = load(buffer)?.into_rgb8();
        let (width, height) = rgb.dimensions();
        let data = rgb.into_raw();

        let mut orbit = ChaoticOrbit::new(key);
        let mut encoded = Vec::with_capacity(3);
        for c in 0..3 {
            let mut plane = extract_plane(&data, 3, c);
            scramble_plane(&mut plane, width as usize, height as usize, &mut orbit, Direction::Forward);
            let gray = RawImage {
                data: plane,
                width,
                height,
                color: ColorType::L8,
            };
            encoded.push(encode(&gray, buffer.format(), quality)?);
        }

        let blue = encoded.pop().unwrap_or_default();
        let green = encoded.pop().unwrap_or_default();
        let red = encoded.pop().unwrap_or_default();
        Ok(EtcChannels { red, green, blue })
    }

    fn decrypt_etc(
        &self,
        red: &EncodedImageBuffer,
        green: &EncodedImageBuffer,
        blue: &EncodedImageBuffer,
        key: &CryptoKey,
    ) -> PipelineResult<Vec<u8>> {
        let planes = [
            load(red)?.into_luma8(),
            load(green)?.into_luma8(),
            load(blue)?.into_luma8(),
        ];

        let (width, height) = planes[0].dimensions();
        for (plane, source) in planes[1..].iter().zip([green, blue]) {
            if plane.dimensions() != (width, height) {
                return Err(PipelineError::ChannelMismatch(format!(
                    "{} is {}x{}, {} is {}x{}",
                    red.uri(),
                    width,
                    height,
                    source.uri(),
                    plane.width(),
                    plane.height()
                )));
            }
        }

        let mut orbit = ChaoticOrbit::new(key);
        let mut data = vec![0u8; width as usize * height as usize * 3];
        for (c, plane) in planes.into_iter().enumerate() {
            let mut plane = plane.into_raw();
            scramble_plane(&mut plane, width as usize, height as usize, &mut orbit, Direction::Inverse);
            insert_plane(&mut data, 3, c, &plane);
        }

        let merged = RawImage {
            data,
            width,
            height,
            color: ColorType::Rgb8,
        };
        encode(&merged, red.format(), self.single_quality)
    }
}

// ═══════════════════════════════════════════════════════════════
// CODEC HELPERS
// ═══════════════════════════════════════════════════════════════

fn load(buffer: &EncodedImageBuffer) -> PipelineResult<DynamicImage> {
    let format = buffer
        .format()
        .image_format()
        .ok_or_else(|| PipelineError::UnsupportedFormat(buffer.format().to_string()))?;
    Ok(image::load_from_memory_with_format(buffer.bytes(), format)?)
}

/// Decode to 8-bit pixels, keeping gray/alpha layout
fn decode(buffer: &EncodedImageBuffer) -> PipelineResult<RawImage> {
    let img = load(buffer)?;
    let (width, height) = (img.width(), img.height());
    let color = img.color();

    let (data, color) = match (color.has_color(), color.has_alpha()) {
        (false, false) => (img.into_luma8().into_raw(), ColorType::L8),
        (false, true) => (img.into_luma_alpha8().into_raw(), ColorType::La8),
        (true, false) => (img.into_rgb8().into_raw(), ColorType::Rgb8),
        (true, true) => (img.into_rgba8().into_raw(), ColorType::Rgba8),
    };

    Ok(RawImage {
        data,
        width,
        height,
        color,
    })
}

fn encode(raw: &RawImage, format: ImageFormatTag, quality: u8) -> PipelineResult<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ImageFormatTag::Jpeg => {
            JpegEncoder::new_with_quality(Cursor::new(&mut out), quality).write_image(
                &raw.data,
                raw.width,
                raw.height,
                raw.color.into(),
            )?;
        }
        ImageFormatTag::Png => {
            PngEncoder::new(Cursor::new(&mut out)).write_image(
                &raw.data,
                raw.width,
                raw.height,
                raw.color.into(),
            )?;
        }
        other => return Err(PipelineError::UnsupportedFormat(other.to_string())),
    }
    Ok(out)
}

fn extract_plane(data: &[u8], channels: usize, channel: usize) -> Vec<u8> {
    data.iter().skip(channel).step_by(channels).copied().collect()
}

fn insert_plane(data: &mut [u8], channels: usize, channel: usize, plane: &[u8]) {
    for (dst, &value) in data.iter_mut().skip(channel).step_by(channels).zip(plane) {
        *dst = value;
    }
}
