use anyhow::{Context, Result, anyhow, bail};
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::storyboard::{FrameDecoder, VideoInfo};
use crate::config::PreprocessConfig;

/// Frame source backed by the `ffprobe` and `ffmpeg` executables.
pub struct FfmpegDecoder {
    path: PathBuf,
    ffmpeg: String,
    ffprobe: String,
    // Keeps a spooled copy alive for as long as the decoder.
    _spool: Option<NamedTempFile>,
}

impl FfmpegDecoder {
    /// Decode a video that already lives on disk.
    pub fn open(path: &Path, config: &PreprocessConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            _spool: None,
        }
    }

    /// Spool an in-memory video to a temporary file and decode that.
    pub fn from_bytes(bytes: &[u8], filename: &str, config: &PreprocessConfig) -> Result<Self> {
        let suffix = Path::new(filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".mp4".to_string());

        let mut spool = tempfile::Builder::new()
            .prefix("stockmeta-")
            .suffix(&suffix)
            .tempfile()
            .context("Failed to create temporary video file")?;
        spool
            .write_all(bytes)
            .context("Failed to write temporary video file")?;
        spool.flush().context("Failed to flush temporary video file")?;

        let mut decoder = Self::open(spool.path(), config);
        decoder._spool = Some(spool);
        Ok(decoder)
    }
}

#[async_trait::async_trait]
impl FrameDecoder for FfmpegDecoder {
    async fn probe(&self) -> Result<VideoInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args([
                "-show_entries",
                "stream=width,height:stream_tags=rotate:stream_side_data=rotation:format=duration",
            ])
            .args(["-of", "json"])
            .arg(&self.path)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffprobe))?;

        if !output.status.success() {
            bail!(
                "ffprobe failed for {}: {}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let json = String::from_utf8(output.stdout).context("ffprobe output is not UTF-8")?;
        parse_probe_output(&json)
    }

    async fn frame_at(&self, seconds: f64) -> Result<RgbImage> {
        let timestamp = format!("{seconds:.3}");
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss", &timestamp, "-i"])
            .arg(&self.path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg))?;

        if !output.status.success() || output.stdout.is_empty() {
            bail!(
                "ffmpeg could not decode a frame at {timestamp}s: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let frame = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .context("Failed to decode frame from ffmpeg")?;
        Ok(frame.to_rgb8())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    // Older muxers: "90", "-90", "270"
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0)
    }

    /// ffmpeg auto-rotates decoded frames, so quarter turns swap the edges.
    fn display_size(&self, width: u32, height: u32) -> (u32, u32) {
        let quarter_turns = (self.rotation() / 90.0).round() as i64;
        if quarter_turns.rem_euclid(2) == 1 {
            (height, width)
        } else {
            (width, height)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    // ffprobe prints numbers as strings here
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output into a [`VideoInfo`].
fn parse_probe_output(json: &str) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json).context("Failed to parse ffprobe output")?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| anyhow!("No video stream found"))?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        bail!("Video stream has no frame size");
    };
    let (width, height) = stream.display_size(width, height);

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| anyhow!("Video has no readable duration"))?;

    Ok(VideoInfo {
        duration,
        width,
        height,
    })
}
