use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bytes of ffmpeg's stderr kept for the error message.
const STDERR_TAIL: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("ffmpeg stopped accepting frames: {0}")]
    Write(String),
    #[error("failed to reap ffmpeg: {0}")]
    Finalize(String),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Exited { status: ExitStatus, stderr: String },
}

/// A session clip as ffmpeg left it on disk.
#[derive(Debug)]
pub struct FinishedClip {
    pub path: PathBuf,
    pub frame_count: u32,
}

/// Feeds packed RGB24 frames to an ffmpeg child that writes an AVI with
/// MPEG-4 Part 2 video under the XVID fourcc.
pub struct ClipEncoder {
    child: Child,
    stdin: ChildStdin,
    stderr: JoinHandle<String>,
    path: PathBuf,
    frame_len: usize,
    frame_count: u32,
}

impl ClipEncoder {
    pub fn start(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self, EncoderError> {
        let size = format!("{width}x{height}");
        let rate = fps.to_string();

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "-r", &rate])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "mpeg4", "-vtag", "XVID", "-q:v", "5", "-pix_fmt", "yuv420p"])
            .args(["-f", "avi", "-y"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("ffmpeg stdin not captured".into()))?;
        let stderr = match child.stderr.take() {
            Some(mut pipe) => tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = pipe.read_to_end(&mut buf).await {
                    debug!(error = %e, "ffmpeg stderr closed early");
                }
                let start = buf.len().saturating_sub(STDERR_TAIL);
                String::from_utf8_lossy(&buf[start..]).trim().to_string()
            }),
            None => tokio::spawn(async { String::new() }),
        };

        debug!(path = path.display().to_string(), width, height, fps, "clip encoder started");

        Ok(Self {
            child,
            stdin,
            stderr,
            path: path.to_path_buf(),
            frame_len: width as usize * height as usize * 3,
            frame_count: 0,
        })
    }

    pub async fn push_frame(&mut self, rgb24: &[u8]) -> Result<(), EncoderError> {
        if rgb24.len() != self.frame_len {
            return Err(EncoderError::Write(format!(
                "frame is {} bytes, encoder expects {}",
                rgb24.len(),
                self.frame_len
            )));
        }
        self.stdin
            .write_all(rgb24)
            .await
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.frame_count += 1;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Signal end of input and wait for ffmpeg to write the trailer. When
    /// ffmpeg fails, whatever it left behind is removed.
    pub async fn finish(self) -> Result<FinishedClip, EncoderError> {
        let Self {
            mut child,
            stdin,
            stderr,
            path,
            frame_count,
            ..
        } = self;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| EncoderError::Finalize(e.to_string()))?;
        let stderr = stderr.await.unwrap_or_default();

        if !status.success() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = path.display().to_string(), error = %e, "no partial clip to remove");
            }
            return Err(EncoderError::Exited { status, stderr });
        }
        if !stderr.is_empty() {
            warn!(path = path.display().to_string(), stderr, "ffmpeg reported problems");
        }

        debug!(path = path.display().to_string(), frame_count, "clip finalized");
        Ok(FinishedClip { path, frame_count })
    }
}

/// Logs a warning when ffmpeg is not runnable; capture, recording and
/// archiving all depend on it.
pub async fn check_ffmpeg_available() {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(out) if out.status.success() => debug!("ffmpeg found"),
        Ok(out) => warn!(status = %out.status, "ffmpeg -version failed"),
        Err(e) => warn!(
            error = %e,
            "ffmpeg not on PATH; install it with mpeg4 and libx264 support"
        ),
    }
}

#[cfg(test)]
pub(crate) fn tools_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        std::process::Command::new(tool)
            .arg("-version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "needs ffmpeg and ffprobe on PATH"]
    async fn writes_avi_with_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");

        let mut encoder = ClipEncoder::start(&path, 64, 48, 20.0).unwrap();
        let frame = vec![128u8; 64 * 48 * 3];
        for _ in 0..5 {
            encoder.push_frame(&frame).await.unwrap();
        }
        assert_eq!(encoder.frame_count(), 5);

        let clip = encoder.finish().await.unwrap();
        assert_eq!(clip.frame_count, 5);
        assert_eq!(clip.path, path);
        assert_eq!(crate::concat::count_frames(&path).await.unwrap(), 5);
    }

    #[tokio::test]
    #[ignore = "needs ffmpeg and ffprobe on PATH"]
    async fn rejects_wrong_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = ClipEncoder::start(&dir.path().join("clip.avi"), 64, 48, 20.0).unwrap();

        let err = encoder.push_frame(&[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, EncoderError::Write(_)));
        assert_eq!(encoder.frame_count(), 0);
        encoder.finish().await.ok();
    }
}
