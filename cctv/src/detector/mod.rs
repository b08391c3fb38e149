pub mod gaussian;
pub mod traits;

use motion_cctv_common::config::MotionConfig;
use motion_cctv_common::frame::Frame;
use tracing::{debug, info};

use gaussian::{GaussianBackground, GaussianParams};
use traits::BackgroundModel;

/// Reports how many pixels of each frame differ from the learned background.
///
/// The detector has no side effects beyond updating its model; deciding what
/// counts as motion is left to the recording controller.
pub struct MotionDetector {
    model: Box<dyn BackgroundModel>,
    frames_observed: u64,
}

impl MotionDetector {
    pub fn new(model: Box<dyn BackgroundModel>) -> Self {
        Self {
            model,
            frames_observed: 0,
        }
    }

    pub fn from_config(config: &MotionConfig) -> Self {
        let params = GaussianParams::from(config);
        info!(
            var_threshold = params.var_threshold,
            history = params.history,
            detect_shadows = params.detect_shadows,
            "motion detector configured"
        );
        Self::new(Box::new(GaussianBackground::new(params)))
    }

    /// Foreground pixel count for `frame`; the frame is folded into the
    /// model before returning.
    pub fn observe(&mut self, frame: &Frame) -> u64 {
        let count = self.model.apply(&frame.image);
        self.frames_observed += 1;
        debug!(
            seq = frame.seq,
            ts = frame.captured_at_ms,
            motion_pixels = count,
            model = self.model.name(),
            "frame observed"
        );
        count
    }

    /// Explicit reinitialization of the background model.
    pub fn reset(&mut self) {
        info!(
            frames_observed = self.frames_observed,
            model = self.model.name(),
            "background model reset"
        );
        self.model.reset();
        self.frames_observed = 0;
    }
}
