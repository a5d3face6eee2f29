use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::config::Config;
use crate::embed::{Injection, MediaAsset, MediaKind, embed_metadata_with};
use crate::preprocess::{AnalysisPayload, prepare_for_analysis};
use crate::record::MetadataRecord;

/// Extensions picked up by [`collect_media`].
const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "svg", "eps", "mp4", "mov", "m4v"];

/// The outcome of embedding metadata into one file.
///
/// # Example
///
/// ```rust,no_run
/// # use stockmeta::config::Config;
/// # use stockmeta::pipeline::process_file;
/// # use stockmeta::record::MetadataRecord;
/// # let config = Config::default();
/// # let record = MetadataRecord::new("Title", "Description", ["tag"]);
/// let result = process_file("photo.jpg".as_ref(), &record, &config);
///
/// if result.error.is_none() && result.embedded {
///     println!("Wrote {:?}", result.output_path);
/// } else if let Some(reason) = &result.pass_through {
///     println!("Left unchanged: {reason}");
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub path: PathBuf,
    pub kind: Option<MediaKind>,
    /// `true` if the metadata made it into the output bytes.
    pub embedded: bool,
    /// Why the file was left unchanged, for pass-through results.
    pub pass_through: Option<String>,
    /// Where the output was (or, in a dry run, would be) written.
    pub output_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub bytes_written: usize,
    pub dry_run: bool,
    pub error: Option<String>,
}

impl ProcessResult {
    fn new(path: &Path, dry_run: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: MediaKind::from_path(path),
            embedded: false,
            pass_through: None,
            output_path: None,
            backup_path: None,
            bytes_written: 0,
            dry_run,
            error: None,
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Collect supported media files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only files with supported extensions
/// are included.
///
/// # Example
///
/// ```rust,no_run
/// use stockmeta::pipeline::collect_media;
/// use std::path::PathBuf;
///
/// let files = collect_media(&[
///     PathBuf::from("cover.jpg"),  // single file
///     PathBuf::from("./uploads/"), // entire directory
/// ]);
/// println!("Found {} files", files.len());
/// ```
pub fn collect_media(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_media(path) {
                files.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_media(p) {
                    files.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    files
}

fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// MIME type to route and label a file by. Container-specific for video.
fn mime_for_path(path: &Path, kind: MediaKind) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match (kind, ext.as_str()) {
        (MediaKind::Video, "mov") => "video/quicktime",
        (MediaKind::Video, "m4v") => "video/x-m4v",
        _ => kind.mime_type(),
    }
}

/// Create a backup of the original file next to it, as `<name>.<ext>.bak`.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

/// Embed `record` into a single file.
///
/// Writes in place, or into `config.output.output_dir` when set. In-place
/// writes are preceded by a `.bak` copy if `backup_originals` is on. A dry
/// run reads and embeds but writes nothing. A pass-through leaves the file
/// untouched.
pub fn process_file(path: &Path, record: &MetadataRecord, config: &Config) -> ProcessResult {
    let mut result = ProcessResult::new(path, config.output.dry_run);

    let Some(kind) = result.kind else {
        return result.failed("Unsupported file type");
    };

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => return result.failed(format!("Failed to read file: {e}")),
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let asset = MediaAsset::new(bytes, mime_for_path(path, kind), filename.clone());
    let injected = match embed_metadata_with(&asset, record, &config.embed) {
        Ok(r) => r,
        Err(e) => return result.failed(format!("{e:#}")),
    };

    let output = match injected.injection {
        Injection::Embedded(b) => b,
        Injection::PassThrough { reason, .. } => {
            log::warn!("  {}: left unchanged ({reason})", path.display());
            result.pass_through = Some(reason.to_string());
            return result;
        }
    };
    result.embedded = true;

    let destination = match &config.output.output_dir {
        Some(dir) => dir.join(&filename),
        None => path.to_path_buf(),
    };
    result.output_path = Some(destination.clone());

    if config.output.dry_run {
        log::info!(
            "  [dry run] would write {} bytes to {}",
            output.len(),
            destination.display()
        );
        return result;
    }

    if let Err(e) = write_output(path, &destination, &output, config, &mut result) {
        return result.failed(format!("{e:#}"));
    }
    result.bytes_written = output.len();
    log::info!("  Wrote {} ({} bytes)", destination.display(), output.len());
    result
}

fn write_output(
    source: &Path,
    destination: &Path,
    bytes: &[u8],
    config: &Config,
    result: &mut ProcessResult,
) -> Result<()> {
    if destination == source {
        if config.output.backup_originals {
            result.backup_path = Some(backup_file(source)?);
        }
    } else if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    std::fs::write(destination, bytes)
        .with_context(|| format!("Failed to write {}", destination.display()))
}

/// Run [`process_file`] over `paths`, at most `config.max_workers` at a time.
///
/// Results come back in input order.
pub async fn process_batch(
    paths: Vec<PathBuf>,
    record: &MetadataRecord,
    config: &Config,
) -> Vec<ProcessResult> {
    let semaphore = Arc::new(Semaphore::new(config.workers()));
    let record = Arc::new(record.clone());
    let config = Arc::new(config.clone());
    let total = paths.len();

    let mut handles = Vec::with_capacity(total);
    for (i, path) in paths.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let record = Arc::clone(&record);
        let config = Arc::clone(&config);
        let task_path = path.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            log::info!("[{}/{total}] {}", i + 1, task_path.display());
            tokio::task::spawn_blocking(move || process_file(&task_path, &record, &config)).await
        });
        handles.push((path, handle));
    }

    let mut results = Vec::with_capacity(total);
    for (path, handle) in handles {
        let result = match handle.await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) | Err(e) => {
                ProcessResult::new(&path, config.output.dry_run).failed(format!("Worker failed: {e}"))
            }
        };
        results.push(result);
    }
    results
}

/// Read a file and prepare it for analysis.
pub async fn prepare_file(path: &Path, config: &Config) -> Result<AnalysisPayload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = MediaKind::from_path(path).map_or("", |k| mime_for_path(path, k));

    prepare_for_analysis(&bytes, mime_type, &filename, &config.preprocess).await
}
