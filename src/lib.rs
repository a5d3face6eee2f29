//! # stockmeta
//!
//! Embed stock-marketplace metadata (title, description, ordered keywords)
//! into media files in the container each format natively understands, and
//! prepare media for analysis by an external vision model.
//!
//! ## Quick Start
//!
//! The simplest way to use the library is through the pipeline module, which
//! handles the full read → embed → write flow:
//!
//! ```rust,no_run
//! use stockmeta::config::Config;
//! use stockmeta::pipeline::{collect_media, process_batch};
//! use stockmeta::record::MetadataRecord;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load config from file (Software tag, output behavior, etc.)
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!
//!     // Metadata usually comes back from a vision model as JSON
//!     let record = MetadataRecord::load("metadata.json".as_ref())?;
//!
//!     // Collect supported files from paths (files or directories)
//!     let files = collect_media(&[PathBuf::from("./uploads")]);
//!
//!     for result in process_batch(files, &record, &config).await {
//!         if let Some(ref err) = result.error {
//!             eprintln!("Error processing {}: {err}", result.path.display());
//!         } else if result.embedded {
//!             println!("Embedded: {}", result.path.display());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The embedders work on byte buffers and never touch the filesystem:
//!
//! ```rust
//! use stockmeta::embed::{Injection, MediaAsset, embed_metadata};
//! use stockmeta::record::MetadataRecord;
//!
//! let record = MetadataRecord::new("Blue icon", "Flat blue circle", ["icon", "blue"]);
//! let asset = MediaAsset::new(b"<svg></svg>".to_vec(), "image/svg+xml", "icon.svg");
//!
//! let result = embed_metadata(&asset, &record).unwrap();
//! assert!(matches!(result.injection, Injection::Embedded(_)));
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Container | Preprocessing |
//! |--------|-----------|---------------|
//! | JPEG | EXIF APP1 + XMP APP1 | Downsampled above 9 MiB |
//! | PNG | XMP `iTXt` chunk | Downsampled above 9 MiB |
//! | SVG | `<metadata>` element | Forwarded |
//! | EPS | `%`-comment block | Forwarded |
//! | MP4 / MOV | Trailing `uuid` box | 2×2 storyboard via `ffmpeg` |

pub mod config;
pub mod crc;
pub mod embed;
pub mod inspect;
pub mod pipeline;
pub mod preprocess;
pub mod record;
pub mod scan;
pub mod xmp;

pub use embed::{Injection, InjectionResult, MediaAsset, MediaKind, PassThroughReason, embed_metadata};
pub use preprocess::{AnalysisPayload, prepare_for_analysis};
pub use record::MetadataRecord;
pub use xmp::generate_xmp_packet;
