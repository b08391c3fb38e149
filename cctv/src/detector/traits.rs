use image::RgbImage;

/// Background-subtraction strategy behind [`super::MotionDetector`].
///
/// Implementations keep their own statistical model of the scene. Any model
/// is acceptable as long as the returned count grows with the amount of
/// scene change.
pub trait BackgroundModel: Send {
    /// Compare `image` against the model, fold it into the model, and return
    /// the number of foreground pixels. The model reflects `image` once this
    /// returns.
    fn apply(&mut self, image: &RgbImage) -> u64;

    /// Forget everything learned so far.
    fn reset(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
