use async_trait::async_trait;
use chrono::Utc;
use motion_cctv_common::config::CameraConfig;
use motion_cctv_common::frame::{rgb24_len, Frame};
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to spawn ffmpeg capture: {0}")]
    Spawn(String),
    #[error("capture device closed the stream")]
    EndOfStream,
    #[error("failed to read frame from capture device: {0}")]
    Read(String),
}

/// A live source of frames whose dimensions are fixed at connect time.
#[async_trait]
pub trait FrameSource: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Next frame from the device. Returns promptly (bounded by the device
    /// frame rate) or fails fast when the device is gone.
    async fn read_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Release the device. Called once when the detection loop exits.
    async fn release(&mut self) {}
}

/// Splits a byte stream of packed RGB24 frames into [`Frame`]s.
pub struct RawVideoReader<R> {
    reader: R,
    width: u32,
    height: u32,
    seq: u64,
}

impl<R: AsyncRead + Unpin + Send> RawVideoReader<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
            seq: 0,
        }
    }

    pub async fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        let mut data = vec![0u8; rgb24_len(self.width, self.height)];
        match self.reader.read_exact(&mut data).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(DeviceError::EndOfStream)
            }
            Err(e) => return Err(DeviceError::Read(e.to_string())),
        }

        let seq = self.seq;
        self.seq += 1;
        Frame::from_rgb24(
            self.width,
            self.height,
            data,
            Utc::now().timestamp_millis(),
            seq,
        )
        .map_err(|e| DeviceError::Read(e.to_string()))
    }
}

/// Camera backed by an ffmpeg child process that decodes the device and
/// writes raw RGB24 frames to stdout, scaled to the configured size.
pub struct FfmpegCamera {
    child: Child,
    frames: RawVideoReader<ChildStdout>,
}

impl FfmpegCamera {
    pub fn open(config: &CameraConfig) -> Result<Self, DeviceError> {
        let size = format!("{}x{}", config.width, config.height);
        let fps = config.fps.to_string();
        let scale = format!("scale={}:{}", config.width, config.height);

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if let Some(format) = &config.input_format {
            cmd.args(["-f", format, "-video_size", &size, "-framerate", &fps]);
        }
        cmd.args(["-i", &config.device])
            .args(["-vf", &scale])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| DeviceError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::Spawn("could not get stdout handle".into()))?;

        // Drain stderr so ffmpeg never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(stderr = %line, "ffmpeg capture");
                }
            });
        }

        info!(
            device = config.device,
            input_format = config.input_format.as_deref().unwrap_or("auto"),
            width = config.width,
            height = config.height,
            fps = config.fps,
            "camera opened"
        );

        Ok(Self {
            child,
            frames: RawVideoReader::new(stdout, config.width, config.height),
        })
    }
}

#[async_trait]
impl FrameSource for FfmpegCamera {
    fn dimensions(&self) -> (u32, u32) {
        (self.frames.width, self.frames.height)
    }

    async fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        self.frames.next_frame().await
    }

    async fn release(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "ffmpeg capture already exited");
        }
        info!("camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_stream_into_frames() {
        // Two 2x2 frames followed by a truncated third.
        let mut bytes = vec![10u8; 12];
        bytes.extend_from_slice(&[20u8; 12]);
        bytes.extend_from_slice(&[30u8; 5]);

        let mut reader = RawVideoReader::new(&bytes[..], 2, 2);

        let first = reader.next_frame().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(first.image.get_pixel(1, 1).0, [10, 10, 10]);

        let second = reader.next_frame().await.unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.image.get_pixel(0, 0).0, [20, 20, 20]);

        assert!(matches!(
            reader.next_frame().await,
            Err(DeviceError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn empty_stream_is_end_of_stream() {
        let mut reader = RawVideoReader::new(&[][..], 4, 4);
        assert!(matches!(
            reader.next_frame().await,
            Err(DeviceError::EndOfStream)
        ));
    }
}
