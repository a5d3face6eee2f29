//! Prepare media for an external vision model.
//!
//! Large raster images are downsampled and re-encoded as JPEG; videos become
//! a single 2×2 storyboard JPEG. Everything else is forwarded untouched. The
//! result is base64 text ready to drop into a request body.

mod ffmpeg;
mod storyboard;

pub use ffmpeg::FfmpegDecoder;
pub use storyboard::{
    CAPTURE_POINTS_PERMILLE, FrameDecoder, VideoInfo, build_storyboard, capture_timestamps,
};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage, RgbImage};
use serde::Serialize;

use crate::config::PreprocessConfig;
use crate::embed::MediaKind;

/// What gets sent to the vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisPayload {
    pub mime_type: String,
    pub base64: String,
}

impl AnalysisPayload {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64: STANDARD.encode(bytes),
        }
    }

    /// The raw payload bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.base64)
            .context("Payload is not valid base64")
    }
}

/// Prepare `bytes` for analysis.
///
/// - Video: decoded with `ffmpeg` into a storyboard JPEG.
/// - Raster image larger than `compress_threshold_bytes`: downsampled to
///   `max_image_edge`, flattened onto white, re-encoded as JPEG.
/// - Anything else, including SVG and EPS: forwarded as-is.
///
/// Decode failures are errors; there is no fallback to the original bytes.
pub async fn prepare_for_analysis(
    bytes: &[u8],
    mime_type: &str,
    filename: &str,
    config: &PreprocessConfig,
) -> Result<AnalysisPayload> {
    if MediaKind::detect(mime_type, filename) == Some(MediaKind::Video) {
        let decoder = FfmpegDecoder::from_bytes(bytes, filename, config)?;
        return storyboard_payload(&decoder, config).await;
    }
    prepare_image(bytes, mime_type, filename, config)
}

/// Build and encode a storyboard from any [`FrameDecoder`].
pub async fn storyboard_payload<D>(decoder: &D, config: &PreprocessConfig) -> Result<AnalysisPayload>
where
    D: FrameDecoder + ?Sized,
{
    let board = build_storyboard(decoder, config.storyboard_max_edge).await?;
    let jpeg = encode_jpeg(&board, config.storyboard_quality)?;
    log::info!(
        "  Storyboard {}x{} ({} bytes)",
        board.width(),
        board.height(),
        jpeg.len()
    );
    Ok(AnalysisPayload::from_bytes(&jpeg, "image/jpeg"))
}

/// The non-video half of [`prepare_for_analysis`].
pub fn prepare_image(
    bytes: &[u8],
    mime_type: &str,
    filename: &str,
    config: &PreprocessConfig,
) -> Result<AnalysisPayload> {
    let kind = MediaKind::detect(mime_type, filename);
    let forward_mime = if mime_type.is_empty() {
        kind.map_or("application/octet-stream", |k| k.mime_type())
    } else {
        mime_type
    };

    let vector = kind.is_some_and(|k| !k.is_raster());
    if vector || !exceeds_threshold(bytes.len(), config.compress_threshold_bytes) {
        return Ok(AnalysisPayload::from_bytes(bytes, forward_mime));
    }

    let jpeg = downsample(bytes, config).with_context(|| format!("Failed to downsample {filename}"))?;
    log::info!("  Compressed {} -> {} bytes", bytes.len(), jpeg.len());
    Ok(AnalysisPayload::from_bytes(&jpeg, "image/jpeg"))
}

/// Strictly greater than: a file of exactly `threshold` bytes is forwarded.
fn exceeds_threshold(len: usize, threshold: u64) -> bool {
    len as u64 > threshold
}

/// Decode, cap the longer edge, flatten onto white and encode as JPEG.
fn downsample(bytes: &[u8], config: &PreprocessConfig) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;
    let (w, h) = fit_within(img.width(), img.height(), config.max_image_edge);
    let img = if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    };

    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    let flat = image::DynamicImage::ImageRgba8(canvas).to_rgb8();

    encode_jpeg(&flat, config.jpeg_quality)
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(img)
        .context("Failed to encode JPEG")?;
    Ok(buf)
}

/// Scale `(width, height)` so the longer edge is at most `max_edge`,
/// preserving aspect ratio. Never upscales; never returns a zero edge, and a
/// `max_edge` of 0 is treated as 1.
///
/// ```rust
/// use stockmeta::preprocess::fit_within;
///
/// assert_eq!(fit_within(8000, 6000, 3840), (3840, 2880));
/// assert_eq!(fit_within(640, 480, 800), (640, 480));
/// ```
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let max_edge = max_edge.max(1);
    let longer = width.max(height);
    if longer <= max_edge || longer == 0 {
        return (width, height);
    }
    let scale = |edge: u32| {
        let scaled = (u64::from(edge) * u64::from(max_edge) + u64::from(longer) / 2) / u64::from(longer);
        (scaled as u32).max(1)
    };
    if width >= height {
        (max_edge, scale(height))
    } else {
        (scale(width), max_edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat};
    use std::io::Cursor;

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn config_with_threshold(threshold: u64) -> PreprocessConfig {
        PreprocessConfig {
            compress_threshold_bytes: threshold,
            ..PreprocessConfig::default()
        }
    }

    // ── threshold ────────────────────────────────────────────────────

    #[test]
    fn nine_mebibytes_is_the_boundary() {
        let threshold = PreprocessConfig::default().compress_threshold_bytes;
        assert!(!exceeds_threshold(9 * 1024 * 1024, threshold));
        assert!(exceeds_threshold(9 * 1024 * 1024 + 1, threshold));
    }

    #[test]
    fn file_at_threshold_is_forwarded() {
        let bytes = png_bytes(&RgbaImage::from_pixel(32, 32, Rgba([1, 2, 3, 255])));
        let config = config_with_threshold(bytes.len() as u64);
        let payload = prepare_image(&bytes, "image/png", "a.png", &config).unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.decode().unwrap(), bytes);
    }

    #[test]
    fn file_one_byte_over_threshold_is_compressed() {
        let bytes = png_bytes(&RgbaImage::from_pixel(32, 32, Rgba([1, 2, 3, 255])));
        let config = config_with_threshold(bytes.len() as u64 - 1);
        let payload = prepare_image(&bytes, "image/png", "a.png", &config).unwrap();
        assert_eq!(payload.mime_type, "image/jpeg");
        let out = payload.decode().unwrap();
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
    }

    // ── downsampling ─────────────────────────────────────────────────

    #[test]
    fn longer_edge_is_capped() {
        let bytes = png_bytes(&RgbaImage::from_pixel(200, 100, Rgba([9, 9, 9, 255])));
        let config = PreprocessConfig {
            compress_threshold_bytes: 0,
            max_image_edge: 50,
            ..PreprocessConfig::default()
        };
        let payload = prepare_image(&bytes, "image/png", "wide.png", &config).unwrap();
        let img = image::load_from_memory(&payload.decode().unwrap()).unwrap();
        assert_eq!(img.dimensions(), (50, 25));
    }

    #[test]
    fn transparency_becomes_white() {
        let bytes = png_bytes(&RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0])));
        let payload = prepare_image(&bytes, "image/png", "clear.png", &config_with_threshold(0)).unwrap();
        let img = image::load_from_memory(&payload.decode().unwrap()).unwrap().to_rgb8();
        let px = img.get_pixel(8, 8);
        assert!(px.0.iter().all(|&c| c > 240), "expected white, got {px:?}");
    }

    #[test]
    fn undecodable_image_is_an_error() {
        let bytes = vec![0x42; 64];
        assert!(prepare_image(&bytes, "image/jpeg", "bad.jpg", &config_with_threshold(0)).is_err());
    }

    #[test]
    fn vector_formats_are_forwarded() {
        let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>";
        let payload = prepare_image(svg, "", "logo.svg", &config_with_threshold(0)).unwrap();
        assert_eq!(payload.mime_type, "image/svg+xml");
        assert_eq!(payload.decode().unwrap(), svg);

        let eps = b"%!PS-Adobe-3.0 EPSF-3.0\n";
        let payload = prepare_image(eps, "application/postscript", "art.eps", &config_with_threshold(0)).unwrap();
        assert_eq!(payload.decode().unwrap(), eps);
    }

    // ── fit_within ───────────────────────────────────────────────────

    #[test]
    fn fit_within_preserves_aspect() {
        assert_eq!(fit_within(1920, 1080, 800), (800, 450));
        assert_eq!(fit_within(1080, 1920, 800), (450, 800));
        assert_eq!(fit_within(800, 800, 800), (800, 800));
    }

    #[test]
    fn fit_within_never_collapses_an_edge() {
        assert_eq!(fit_within(10_000, 1, 100), (100, 1));
    }

    #[test]
    fn zero_max_edge_is_clamped() {
        assert_eq!(fit_within(10, 5, 0), (1, 1));
        assert_eq!(fit_within(3, 9, 0), (1, 1));
    }

    #[test]
    fn zero_max_image_edge_still_encodes() {
        let bytes = png_bytes(&RgbaImage::from_pixel(20, 10, Rgba([9, 9, 9, 255])));
        let config = PreprocessConfig {
            compress_threshold_bytes: 0,
            max_image_edge: 0,
            ..PreprocessConfig::default()
        };
        let payload = prepare_image(&bytes, "image/png", "tiny.png", &config).unwrap();
        let img = image::load_from_memory(&payload.decode().unwrap()).unwrap();
        assert_eq!(img.dimensions(), (1, 1));
    }

    #[tokio::test]
    async fn zero_storyboard_edge_still_builds() {
        let config = PreprocessConfig {
            storyboard_max_edge: 0,
            ..PreprocessConfig::default()
        };
        let board = build_storyboard(&SolidDecoder, config.storyboard_max_edge).await.unwrap();
        assert_eq!(board.dimensions(), (2, 2));
    }

    // ── video ────────────────────────────────────────────────────────

    struct SolidDecoder;

    #[async_trait::async_trait]
    impl FrameDecoder for SolidDecoder {
        async fn probe(&self) -> Result<VideoInfo> {
            Ok(VideoInfo { duration: 10.0, width: 1280, height: 720 })
        }

        async fn frame_at(&self, _seconds: f64) -> Result<RgbImage> {
            Ok(RgbImage::from_pixel(1280, 720, image::Rgb([20, 120, 220])))
        }
    }

    #[tokio::test]
    async fn storyboard_payload_is_jpeg() {
        let payload = storyboard_payload(&SolidDecoder, &PreprocessConfig::default()).await.unwrap();
        assert_eq!(payload.mime_type, "image/jpeg");
        let img = image::load_from_memory(&payload.decode().unwrap()).unwrap();
        assert_eq!(img.dimensions(), (1600, 900));
    }
}
