use anyhow::{Context, Result, bail};
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::fit_within;

/// Where frames are grabbed, in thousandths of the clip duration.
pub const CAPTURE_POINTS_PERMILLE: [u32; 4] = [100, 350, 600, 850];

/// Duration and native frame size of a clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

/// Source of decoded video frames.
///
/// [`crate::preprocess::FfmpegDecoder`] is the production implementation;
/// tests substitute an in-memory one.
#[async_trait::async_trait]
pub trait FrameDecoder: Send + Sync {
    /// Read duration and frame size.
    async fn probe(&self) -> Result<VideoInfo>;
    /// Decode the frame shown at `seconds`.
    async fn frame_at(&self, seconds: f64) -> Result<RgbImage>;
}

/// Capture timestamps for a clip of `duration` seconds.
///
/// ```rust
/// use stockmeta::preprocess::capture_timestamps;
///
/// assert_eq!(capture_timestamps(10.0), [1.0, 3.5, 6.0, 8.5]);
/// ```
pub fn capture_timestamps(duration: f64) -> [f64; 4] {
    CAPTURE_POINTS_PERMILLE.map(|p| duration * f64::from(p) / 1000.0)
}

/// Compose a 2×2 storyboard from four frames of the clip.
///
/// Frames fill the top-left, top-right, bottom-left and bottom-right
/// quadrants in time order. Frames are fetched one at a time; the first
/// failure aborts the whole storyboard.
pub async fn build_storyboard<D>(decoder: &D, max_edge: u32) -> Result<RgbImage>
where
    D: FrameDecoder + ?Sized,
{
    let info = decoder.probe().await.context("Failed to probe video")?;
    if !info.duration.is_finite() || info.duration <= 0.0 {
        bail!("Video has no usable duration ({})", info.duration);
    }
    if info.width == 0 || info.height == 0 {
        bail!("Video has no usable frame size ({}x{})", info.width, info.height);
    }

    let (w, h) = fit_within(info.width, info.height, max_edge);
    log::debug!(
        "  Storyboard: {:.2}s source {}x{}, frames {w}x{h}",
        info.duration,
        info.width,
        info.height
    );

    let mut canvas = RgbImage::new(w * 2, h * 2);
    for (i, t) in capture_timestamps(info.duration).into_iter().enumerate() {
        let frame = decoder
            .frame_at(t)
            .await
            .with_context(|| format!("Failed to capture frame at {t:.2}s"))?;

        let frame = if frame.dimensions() == (w, h) {
            frame
        } else {
            imageops::resize(&frame, w, h, FilterType::Triangle)
        };

        let x = (i % 2) as u32 * w;
        let y = (i / 2) as u32 * h;
        imageops::replace(&mut canvas, &frame, i64::from(x), i64::from(y));
    }

    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Mutex;

    const COLORS: [Rgb<u8>; 4] = [
        Rgb([255, 0, 0]),
        Rgb([0, 255, 0]),
        Rgb([0, 0, 255]),
        Rgb([255, 255, 0]),
    ];

    /// Serves solid frames, one color per capture, and records requests.
    struct FakeDecoder {
        info: VideoInfo,
        fail_at: Option<usize>,
        requested: Mutex<Vec<f64>>,
    }

    impl FakeDecoder {
        fn new(duration: f64, width: u32, height: u32) -> Self {
            Self {
                info: VideoInfo { duration, width, height },
                fail_at: None,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl FrameDecoder for FakeDecoder {
        async fn probe(&self) -> Result<VideoInfo> {
            Ok(self.info)
        }

        async fn frame_at(&self, seconds: f64) -> Result<RgbImage> {
            let mut requested = self.requested.lock().unwrap();
            let index = requested.len();
            requested.push(seconds);
            if self.fail_at == Some(index) {
                bail!("decoder error");
            }
            Ok(RgbImage::from_pixel(self.info.width, self.info.height, COLORS[index]))
        }
    }

    // ── capture_timestamps ───────────────────────────────────────────

    #[test]
    fn ten_second_clip_timestamps_are_exact() {
        assert_eq!(capture_timestamps(10.0), [1.0, 3.5, 6.0, 8.5]);
    }

    #[test]
    fn timestamps_scale_with_duration() {
        let ts = capture_timestamps(2.0);
        assert!((ts[0] - 0.2).abs() < 1e-12);
        assert!((ts[3] - 1.7).abs() < 1e-12);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    // ── build_storyboard ─────────────────────────────────────────────

    #[tokio::test]
    async fn canvas_is_twice_the_fitted_frame() {
        let decoder = FakeDecoder::new(10.0, 1920, 1080);
        let board = build_storyboard(&decoder, 800).await.unwrap();
        assert_eq!(board.dimensions(), (1600, 900));
    }

    #[tokio::test]
    async fn quadrants_follow_time_order() {
        let decoder = FakeDecoder::new(10.0, 40, 20);
        let board = build_storyboard(&decoder, 800).await.unwrap();

        assert_eq!(board.dimensions(), (80, 40));
        assert_eq!(*board.get_pixel(5, 5), COLORS[0]);
        assert_eq!(*board.get_pixel(45, 5), COLORS[1]);
        assert_eq!(*board.get_pixel(5, 25), COLORS[2]);
        assert_eq!(*board.get_pixel(45, 25), COLORS[3]);
    }

    #[tokio::test]
    async fn frames_requested_sequentially_at_capture_points() {
        let decoder = FakeDecoder::new(10.0, 64, 36);
        build_storyboard(&decoder, 800).await.unwrap();
        assert_eq!(*decoder.requested.lock().unwrap(), vec![1.0, 3.5, 6.0, 8.5]);
    }

    #[tokio::test]
    async fn portrait_video_fits_height() {
        let decoder = FakeDecoder::new(4.0, 1080, 1920);
        let board = build_storyboard(&decoder, 800).await.unwrap();
        assert_eq!(board.dimensions(), (900, 1600));
    }

    #[tokio::test]
    async fn frame_failure_aborts() {
        let mut decoder = FakeDecoder::new(10.0, 32, 32);
        decoder.fail_at = Some(2);
        let err = build_storyboard(&decoder, 800).await.unwrap_err();
        assert!(format!("{err:#}").contains("6.00s"));
        assert_eq!(decoder.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let decoder = FakeDecoder::new(0.0, 32, 32);
        assert!(build_storyboard(&decoder, 800).await.is_err());
        assert!(decoder.requested.lock().unwrap().is_empty());
    }
}
