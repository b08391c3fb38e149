use image::{Rgb, RgbImage};
use motion_cctv_common::frame::Frame;

use super::traits::VisualFilter;

pub const DEFAULT_THRESHOLD: u8 = 100;

/// Synthetic night-vision rendering.
///
/// Grayscale, binarize (brighter than `threshold` → white), invert, then
/// expand back to three channels. Dark areas come out white and lit areas
/// black, which keeps outlines readable in low light.
pub struct NightVision {
    threshold: u8,
}

impl NightVision {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }
}

impl Default for NightVision {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl VisualFilter for NightVision {
    fn apply(&self, frame: &Frame) -> Frame {
        frame.with_image(night_vision(&frame.image, self.threshold))
    }

    fn name(&self) -> &str {
        "night_vision"
    }
}

pub fn night_vision(image: &RgbImage, threshold: u8) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let binary = if luma_bt601(pixel) > threshold { 255 } else { 0 };
        let inverted = 255 - binary;
        out.put_pixel(x, y, Rgb([inverted, inverted, inverted]));
    }
    out
}

/// BT.601 luma (0.299 R + 0.587 G + 0.114 B), rounded.
fn luma_bt601(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let weighted = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
    ((weighted + 500) / 1000) as u8
}
