use chrono::{DateTime, Local, TimeZone};
use image::RgbImage;
use std::time::Instant;

/// A decoded camera frame with capture metadata.
///
/// Pixels are packed RGB24, row-major, `width * height * 3` bytes, the same
/// layout ffmpeg emits for `-f rawvideo -pix_fmt rgb24`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Wall-clock capture time, Unix millis. Used for names and overlays.
    pub captured_at_ms: i64,
    /// Monotonic capture time. Elapsed-time decisions use this, never the
    /// wall clock.
    pub captured_at: Instant,
    pub seq: u64,
}

impl Frame {
    /// Stamps the monotonic capture time with `Instant::now()`.
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            captured_at: Instant::now(),
            seq,
        }
    }

    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Build a frame from a raw RGB24 buffer as read from a capture pipe.
    pub fn from_rgb24(
        width: u32,
        height: u32,
        data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = rgb24_len(width, height);
        let got = data.len();
        let size_error = FrameError::BufferSize {
            got,
            expected,
            width,
            height,
        };
        if got != expected {
            return Err(size_error);
        }
        let image = RgbImage::from_raw(width, height, data).ok_or(size_error)?;
        Ok(Self::new(image, captured_at_ms, seq))
    }

    /// Same capture metadata, different pixels (used by visual filters).
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            image,
            captured_at_ms: self.captured_at_ms,
            captured_at: self.captured_at,
            seq: self.seq,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn captured_at_local(&self) -> DateTime<Local> {
        Local
            .timestamp_millis_opt(self.captured_at_ms)
            .single()
            .unwrap_or_else(Local::now)
    }

    /// Human-readable capture time for overlays, e.g. `2026-02-18 09:30:00`.
    pub fn timestamp_label(&self) -> String {
        self.captured_at_local()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

/// Byte length of one RGB24 frame.
pub fn rgb24_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected} for {width}x{height} RGB24")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
}
