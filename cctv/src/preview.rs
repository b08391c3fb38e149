use image::ImageFormat;
use motion_cctv_common::config::PreviewConfig;
use motion_cctv_common::frame::Frame;
use std::path::PathBuf;
use tracing::debug;

use crate::filter::overlay::stamp_timestamp;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("failed to encode preview {path}: {source}")]
    Encode {
        path: String,
        source: image::ImageError,
    },
    #[error("failed to publish preview {path}: {source}")]
    Publish {
        path: String,
        source: std::io::Error,
    },
}

/// Writes every n-th displayed frame, timestamp stamped, as a JPEG snapshot.
/// The file is replaced atomically so viewers never see a half-written image.
pub struct PreviewWriter {
    path: PathBuf,
    every_n_frames: u64,
    shown: u64,
}

impl PreviewWriter {
    pub fn new(path: PathBuf, every_n_frames: u32) -> Self {
        Self {
            path,
            every_n_frames: every_n_frames.max(1) as u64,
            shown: 0,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Option<Self> {
        config
            .path
            .as_ref()
            .map(|path| Self::new(path.clone(), config.every_n_frames))
    }

    /// Returns whether a snapshot was written for this frame.
    pub fn show(&mut self, frame: &Frame) -> Result<bool, PreviewError> {
        let index = self.shown;
        self.shown += 1;
        if index % self.every_n_frames != 0 {
            return Ok(false);
        }

        let mut image = frame.image.clone();
        stamp_timestamp(&mut image, &frame.timestamp_label());

        let tmp = self.path.with_extension("tmp.jpg");
        image
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .map_err(|e| PreviewError::Encode {
                path: tmp.display().to_string(),
                source: e,
            })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| PreviewError::Publish {
            path: self.path.display().to_string(),
            source: e,
        })?;

        debug!(seq = frame.seq, path = self.path.display().to_string(), "preview updated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(seq: u64) -> Frame {
        Frame::new(RgbImage::from_pixel(64, 48, Rgb([30, 60, 90])), 1708300000000, seq)
    }

    #[test]
    fn writes_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut preview = PreviewWriter::new(path.clone(), 3);

        let written: Vec<bool> = (0..7).map(|i| preview.show(&frame(i)).unwrap()).collect();
        assert_eq!(written, vec![true, false, false, true, false, false, true]);

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert!(!path.with_extension("tmp.jpg").exists());
    }

    #[test]
    fn disabled_without_path() {
        assert!(PreviewWriter::from_config(&PreviewConfig::default()).is_none());
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let mut preview = PreviewWriter::new(PathBuf::from("/nonexistent/dir/preview.jpg"), 1);
        assert!(preview.show(&frame(0)).is_err());
    }
}
