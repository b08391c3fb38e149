use motion_cctv_common::frame::Frame;

/// Per-frame visual transform for frames that are displayed or recorded.
///
/// Filters never see the frames fed to the motion detector, so enabling one
/// cannot change what counts as motion.
pub trait VisualFilter: Send + Sync {
    /// Returns the transformed frame; capture metadata is preserved.
    fn apply(&self, frame: &Frame) -> Frame;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
