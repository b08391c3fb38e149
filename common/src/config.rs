use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    pub recording: RecordingConfig,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Device path or any ffmpeg input URL (a video file works too).
    #[serde(default = "default_device")]
    pub device: String,
    /// ffmpeg input format, e.g. `v4l2`, `avfoundation`, `dshow`.
    /// When omitted ffmpeg probes the input.
    #[serde(default)]
    pub input_format: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Per-pixel squared-distance bound, in units of the pixel's variance.
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f32,
    /// Foreground pixel count a frame must exceed to count as motion.
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: u64,
    /// Quiet time after the last motion frame before recording stops.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_history")]
    pub history: u32,
    #[serde(default = "default_detect_shadows")]
    pub detect_shadows: bool,
    #[serde(default = "default_shadow_threshold")]
    pub shadow_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_recording_fps")]
    pub fps: f64,
    /// Initial night-vision state; toggled at runtime from the console.
    #[serde(default)]
    pub night_vision: bool,
    #[serde(default = "default_night_vision_threshold")]
    pub night_vision_threshold: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_every_n_frames")]
    pub every_n_frames: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            input_format: None,
            width: default_width(),
            height: default_height(),
            fps: default_camera_fps(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            var_threshold: default_var_threshold(),
            motion_threshold: default_motion_threshold(),
            timeout_secs: default_timeout_secs(),
            history: default_history(),
            detect_shadows: default_detect_shadows(),
            shadow_threshold: default_shadow_threshold(),
        }
    }
}

impl MotionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            path: None,
            every_n_frames: default_every_n_frames(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        debug!(path = path.display().to_string(), "config loaded");
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_device() -> String {
    "/dev/video0".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_camera_fps() -> u32 {
    20
}
fn default_var_threshold() -> f32 {
    100.0
}
fn default_motion_threshold() -> u64 {
    500
}
fn default_timeout_secs() -> f64 {
    2.0
}
fn default_history() -> u32 {
    500
}
fn default_detect_shadows() -> bool {
    true
}
fn default_shadow_threshold() -> f32 {
    0.5
}
fn default_recording_fps() -> f64 {
    20.0
}
fn default_night_vision_threshold() -> u8 {
    100
}
fn default_crf() -> u32 {
    23
}
fn default_preset() -> String {
    "veryfast".into()
}
fn default_every_n_frames() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_only_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [recording]
            output_dir = "/var/cctv/recorded"

            [archive]
            output_dir = "/var/cctv/archive"
            "#,
        )
        .unwrap();

        assert_eq!(config.recording.output_dir, PathBuf::from("/var/cctv/recorded"));
        assert_eq!(config.recording.fps, 20.0);
        assert!(!config.recording.night_vision);
        assert_eq!(config.motion.var_threshold, 100.0);
        assert_eq!(config.motion.motion_threshold, 500);
        assert_eq!(config.motion.timeout(), Duration::from_secs(2));
        assert_eq!(config.camera.device, "/dev/video0");
        assert!(config.camera.input_format.is_none());
        assert!(config.preview.path.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn overrides_are_applied() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            device = "/dev/video2"
            input_format = "v4l2"
            width = 1280
            height = 720

            [motion]
            motion_threshold = 1200
            timeout_secs = 0.5
            detect_shadows = false

            [recording]
            output_dir = "rec"
            night_vision = true

            [archive]
            output_dir = "out"
            preset = "medium"
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.input_format.as_deref(), Some("v4l2"));
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.motion.motion_threshold, 1200);
        assert_eq!(config.motion.timeout(), Duration::from_millis(500));
        assert!(!config.motion.detect_shadows);
        assert!(config.recording.night_vision);
        assert_eq!(config.archive.preset, "medium");
        assert_eq!(config.archive.crf, 23);
    }

    #[test]
    fn missing_archive_dir_is_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [recording]
            output_dir = "rec"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/motion-cctv.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
