use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the stockmeta library.
///
/// Controls what gets written into embedded metadata, how media is prepared
/// for analysis, and output behavior (dry run, backups).
///
/// # Loading
///
/// ```rust,no_run
/// use stockmeta::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.preprocess.ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg".into();
/// config.output.dry_run = true;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Metadata embedding settings.
    pub embed: EmbedConfig,
    /// Image downsampling and video storyboard settings.
    pub preprocess: PreprocessConfig,
    /// Output behavior (dry run, backups, destination).
    pub output: OutputConfig,
    /// Maximum number of files processed concurrently in a batch.
    pub max_workers: usize,
}

/// Settings applied while embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Value of the EXIF Software tag written into JPEGs.
    pub software: String,
}

/// Settings for [`crate::preprocess::prepare_for_analysis`].
///
/// # Example
///
/// ```rust
/// use stockmeta::config::PreprocessConfig;
///
/// let pre = PreprocessConfig {
///     compress_threshold_bytes: 4 * 1024 * 1024, // tighter upload limit
///     max_image_edge: 2048,
///     ..PreprocessConfig::default()
/// };
/// assert_eq!(pre.jpeg_quality, 92);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Raster files strictly larger than this are downsampled and re-encoded.
    pub compress_threshold_bytes: u64,
    /// Longest edge, in pixels, of a downsampled image.
    pub max_image_edge: u32,
    /// JPEG quality (1-100) for downsampled images.
    pub jpeg_quality: u8,
    /// Longest edge, in pixels, of each storyboard frame.
    pub storyboard_max_edge: u32,
    /// JPEG quality (1-100) for the storyboard.
    pub storyboard_quality: u8,
    /// `ffmpeg` executable used to grab frames.
    pub ffmpeg_path: String,
    /// `ffprobe` executable used to read duration and size.
    pub ffprobe_path: String,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, report what would be written without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying a file in place.
    pub backup_originals: bool,
    /// Write results here instead of overwriting the input files.
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embed: EmbedConfig::default(),
            preprocess: PreprocessConfig::default(),
            output: OutputConfig::default(),
            max_workers: 4,
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            software: "stockmeta".to_string(),
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            compress_threshold_bytes: 9 * 1024 * 1024,
            max_image_edge: 3840,
            jpeg_quality: 92,
            storyboard_max_edge: 800,
            storyboard_quality: 92,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup_originals: true,
            output_dir: None,
        }
    }
}

impl Config {
    /// Resolve the config file path, next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Batch concurrency, never less than one.
    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }
}
