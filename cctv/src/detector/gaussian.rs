use image::RgbImage;
use motion_cctv_common::config::MotionConfig;
use tracing::{debug, warn};

use super::traits::BackgroundModel;

#[derive(Debug, Clone)]
pub struct GaussianParams {
    /// A pixel is foreground when its squared distance from the mean exceeds
    /// `var_threshold * variance`.
    pub var_threshold: f32,
    /// Learning rate is `1 / min(frames_seen, history)`.
    pub history: u32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    pub detect_shadows: bool,
    /// Lowest brightness ratio against the mean still treated as a shadow.
    pub shadow_threshold: f32,
}

impl Default for GaussianParams {
    fn default() -> Self {
        Self {
            var_threshold: 100.0,
            history: 500,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            detect_shadows: true,
            shadow_threshold: 0.5,
        }
    }
}

impl From<&MotionConfig> for GaussianParams {
    fn from(config: &MotionConfig) -> Self {
        Self {
            var_threshold: config.var_threshold,
            history: config.history.max(1),
            detect_shadows: config.detect_shadows,
            shadow_threshold: config.shadow_threshold,
            ..Self::default()
        }
    }
}

/// Running single-Gaussian background model, one mean (RGB) and one
/// variance per pixel, with shadow suppression.
///
/// Shadow test: with brightness ratio `a = (x·μ)/|μ|²`, a foreground pixel is
/// reclassified as shadow when `shadow_threshold <= a <= 1` and the colour
/// residual `|x − aμ|²` stays within `var_threshold * variance * a²`, i.e.
/// the pixel is a darker version of the background colour.
pub struct GaussianBackground {
    params: GaussianParams,
    width: u32,
    height: u32,
    mean: Vec<[f32; 3]>,
    variance: Vec<f32>,
    frames_seen: u64,
}

impl GaussianBackground {
    pub fn new(params: GaussianParams) -> Self {
        Self {
            params,
            width: 0,
            height: 0,
            mean: Vec::new(),
            variance: Vec::new(),
            frames_seen: 0,
        }
    }

    fn seed(&mut self, image: &RgbImage) {
        let (width, height) = image.dimensions();
        self.width = width;
        self.height = height;
        self.mean = image
            .pixels()
            .map(|p| [p.0[0] as f32, p.0[1] as f32, p.0[2] as f32])
            .collect();
        self.variance = vec![self.params.var_init; self.mean.len()];
        self.frames_seen = 1;
        debug!(width, height, "background model seeded");
    }

    fn is_shadow(&self, x: &[f32; 3], mu: &[f32; 3], var: f32) -> bool {
        let mu_sq = dot(mu, mu);
        if mu_sq <= f32::EPSILON {
            return false;
        }
        let a = dot(x, mu) / mu_sq;
        if a < self.params.shadow_threshold || a > 1.0 {
            return false;
        }
        let residual: f32 = (0..3).map(|c| (x[c] - a * mu[c]).powi(2)).sum();
        residual < self.params.var_threshold * var * a * a
    }
}

impl BackgroundModel for GaussianBackground {
    fn apply(&mut self, image: &RgbImage) -> u64 {
        if self.mean.is_empty() {
            self.seed(image);
            return 0;
        }
        if image.dimensions() != (self.width, self.height) {
            warn!(
                old_width = self.width,
                old_height = self.height,
                new_width = image.width(),
                new_height = image.height(),
                "frame dimensions changed, reseeding background model"
            );
            self.seed(image);
            return 0;
        }

        self.frames_seen += 1;
        let alpha = 1.0 / self.frames_seen.min(self.params.history as u64) as f32;
        let mut foreground = 0u64;

        for (i, pixel) in image.pixels().enumerate() {
            let x = [pixel.0[0] as f32, pixel.0[1] as f32, pixel.0[2] as f32];
            let mu = self.mean[i];
            let var = self.variance[i];

            let d = [x[0] - mu[0], x[1] - mu[1], x[2] - mu[2]];
            let dist_sq = dot(&d, &d);

            let mut is_foreground = dist_sq > self.params.var_threshold * var;
            if is_foreground && self.params.detect_shadows && self.is_shadow(&x, &mu, var) {
                is_foreground = false;
            }
            if is_foreground {
                foreground += 1;
            }

            self.mean[i] = [
                mu[0] + alpha * d[0],
                mu[1] + alpha * d[1],
                mu[2] + alpha * d[2],
            ];
            self.variance[i] = (var + alpha * (dist_sq - var))
                .clamp(self.params.var_min, self.params.var_max);
        }

        foreground
    }

    fn reset(&mut self) {
        self.mean.clear();
        self.variance.clear();
        self.frames_seen = 0;
    }

    fn name(&self) -> &str {
        "gaussian"
    }
}

fn dot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
