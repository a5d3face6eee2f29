//! Format-aware metadata embedding.
//!
//! [`embed_metadata`] routes a [`MediaAsset`] to the injector for its format:
//!
//! | Format | Container |
//! |--------|-----------|
//! | JPEG | EXIF APP1 (ImageDescription, XP*, Software) + XMP APP1 |
//! | PNG | XMP in an `iTXt` chunk right after IHDR |
//! | SVG | XMP inside `<metadata>` |
//! | EPS | XMP as a PostScript comment block after the DSC header |
//! | MP4/MOV | XMP in a trailing ISO-BMFF `uuid` box |
//!
//! Still-image injectors never fail outward: on any problem they return the
//! original bytes as [`Injection::PassThrough`] with a reason. Only the video
//! injector reports errors.

mod eps;
mod jpeg;
mod png;
mod svg;
mod video;

pub use eps::embed_eps;
pub use jpeg::embed_jpeg;
pub use png::{PNG_XMP_OFFSET, embed_png};
pub use svg::embed_svg;
pub use video::{XMP_UUID, embed_video};

pub(crate) use jpeg::XMP_HEADER;
pub(crate) use png::{XMP_KEYWORD, is_xmp_itxt};

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::config::EmbedConfig;
use crate::record::MetadataRecord;

/// The container family of a media file.
///
/// # Example
///
/// ```rust
/// use stockmeta::embed::MediaKind;
///
/// assert_eq!(MediaKind::detect("image/png", "upload.bin"), Some(MediaKind::Png));
/// assert_eq!(MediaKind::detect("", "clip.MOV"), Some(MediaKind::Video));
/// assert_eq!(MediaKind::detect("application/pdf", "doc.pdf"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Jpeg,
    Png,
    Svg,
    Eps,
    /// MP4/MOV and anything else served as `video/*`.
    Video,
}

impl MediaKind {
    /// Route by MIME type first, file extension second.
    pub fn detect(mime_type: &str, filename: &str) -> Option<Self> {
        Self::from_mime(mime_type).or_else(|| Self::from_path(Path::new(filename)))
    }

    /// Determine the kind from a MIME type (parameters are ignored).
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/svg+xml" => Some(Self::Svg),
            "application/postscript" | "application/eps" | "image/eps" | "image/x-eps" => {
                Some(Self::Eps)
            }
            m if m.starts_with("video/") => Some(Self::Video),
            _ => None,
        }
    }

    /// Determine the kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "svg" => Some(Self::Svg),
            "eps" => Some(Self::Eps),
            "mp4" | "mov" | "m4v" => Some(Self::Video),
            _ => None,
        }
    }

    /// The canonical MIME type for this kind.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Svg => "image/svg+xml",
            Self::Eps => "application/postscript",
            Self::Video => "video/mp4",
        }
    }

    /// Raster formats the preprocessing pipeline can decode.
    pub fn is_raster(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

/// An input file: bytes plus the type information used for routing.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

impl MediaAsset {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::detect(&self.mime_type, &self.filename)
    }
}

/// Why an injector returned the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassThroughReason {
    /// No injector handles this MIME type / extension.
    UnsupportedFormat,
    /// The container signature check failed.
    MalformedContainer(String),
    /// Building or splicing the metadata failed.
    InjectionFailure(String),
}

impl fmt::Display for PassThroughReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFormat => write!(f, "unsupported format"),
            Self::MalformedContainer(why) => write!(f, "malformed container: {why}"),
            Self::InjectionFailure(why) => write!(f, "injection failed: {why}"),
        }
    }
}

/// Outcome of a single injector run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// New bytes carrying the metadata.
    Embedded(Vec<u8>),
    /// The original bytes, unchanged.
    PassThrough {
        bytes: Vec<u8>,
        reason: PassThroughReason,
    },
}

impl Injection {
    pub(crate) fn pass_through(original: &[u8], reason: PassThroughReason) -> Self {
        match &reason {
            PassThroughReason::UnsupportedFormat => log::debug!("Passing through: {reason}"),
            _ => log::warn!("Metadata not embedded, passing original through: {reason}"),
        }
        Self::PassThrough {
            bytes: original.to_vec(),
            reason,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Embedded(bytes) | Self::PassThrough { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Embedded(bytes) | Self::PassThrough { bytes, .. } => bytes,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded(_))
    }

    pub fn pass_through_reason(&self) -> Option<&PassThroughReason> {
        match self {
            Self::Embedded(_) => None,
            Self::PassThrough { reason, .. } => Some(reason),
        }
    }
}

/// Result of [`embed_metadata`]: the injector outcome plus the MIME type the
/// output should be served as.
#[derive(Debug, Clone)]
pub struct InjectionResult {
    pub injection: Injection,
    pub mime_type: String,
    pub kind: Option<MediaKind>,
}

impl InjectionResult {
    pub fn bytes(&self) -> &[u8] {
        self.injection.bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.injection.into_bytes()
    }
}

/// Embed `record` into `asset` with the default [`EmbedConfig`].
///
/// # Example
///
/// ```rust
/// use stockmeta::embed::{MediaAsset, embed_metadata};
/// use stockmeta::record::MetadataRecord;
///
/// let asset = MediaAsset::new(vec![0xFF, 0xD8], "image/jpeg", "stub.jpg");
/// let record = MetadataRecord::new("City skyline at dusk", "A calm evening view", ["city"]);
/// let result = embed_metadata(&asset, &record).unwrap();
/// assert_eq!(&result.bytes()[..4], &[0xFF, 0xD8, 0xFF, 0xE1]);
/// ```
pub fn embed_metadata(asset: &MediaAsset, record: &MetadataRecord) -> Result<InjectionResult> {
    embed_metadata_with(asset, record, &EmbedConfig::default())
}

/// Embed `record` into `asset`.
///
/// Returns `Err` only for video containers; every still-image failure is an
/// [`Injection::PassThrough`].
pub fn embed_metadata_with(
    asset: &MediaAsset,
    record: &MetadataRecord,
    config: &EmbedConfig,
) -> Result<InjectionResult> {
    let kind = asset.kind();
    let mime_type = if asset.mime_type.trim().is_empty() {
        kind.map_or("application/octet-stream", |k| k.mime_type())
            .to_string()
    } else {
        asset.mime_type.clone()
    };

    log::debug!(
        "Embedding metadata into {} ({mime_type}, {} bytes) as {kind:?}",
        asset.filename,
        asset.bytes.len()
    );

    let injection = match kind {
        Some(MediaKind::Jpeg) => embed_jpeg(&asset.bytes, record, &config.software),
        Some(MediaKind::Png) => embed_png(&asset.bytes, record),
        Some(MediaKind::Svg) => embed_svg(&asset.bytes, record),
        Some(MediaKind::Eps) => embed_eps(&asset.bytes, record),
        Some(MediaKind::Video) => Injection::Embedded(embed_video(&asset.bytes, record, &mime_type)?),
        None => Injection::pass_through(&asset.bytes, PassThroughReason::UnsupportedFormat),
    };

    Ok(InjectionResult {
        injection,
        mime_type,
        kind,
    })
}
