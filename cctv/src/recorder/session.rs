use async_trait::async_trait;
use motion_cctv_common::config::RecordingConfig;
use motion_cctv_common::frame::Frame;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::filter::overlay::stamp_timestamp;

use super::encoder::{ClipEncoder, EncoderError};
use super::keys::unique_session_path;

/// Identifies one open recording session. Handles from closed or aborted
/// sessions are rejected by the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: u64,
    path: PathBuf,
    started_at_ms: i64,
    width: u32,
    height: u32,
}

impl SessionHandle {
    pub fn new(id: u64, path: PathBuf, started_at_ms: i64, width: u32, height: u32) -> Self {
        Self {
            id,
            path,
            started_at_ms,
            width,
            height,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no open recording session")]
    NoOpenSession,
    #[error("a recording session is already open: {0}")]
    SessionAlreadyOpen(String),
    #[error("frame is {got_width}x{got_height}, session expects {width}x{height}")]
    DimensionMismatch {
        got_width: u32,
        got_height: u32,
        width: u32,
        height: u32,
    },
    #[error("failed to prepare recordings directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

/// Writes frames of one motion episode to one file.
///
/// At most one session is open at a time. A failed `write` aborts the
/// session: the handle becomes stale and no further frames are accepted.
#[async_trait]
pub trait Recorder: Send {
    async fn open(
        &mut self,
        started_at_ms: i64,
        width: u32,
        height: u32,
    ) -> Result<SessionHandle, StorageError>;

    /// Stamp `frame` with its capture time and append it to the session.
    async fn write(&mut self, handle: &SessionHandle, frame: &Frame) -> Result<(), StorageError>;

    /// Flush and release the session, yielding the finished file's path.
    async fn close(&mut self, handle: SessionHandle) -> Result<PathBuf, StorageError>;
}

struct OpenSession {
    handle: SessionHandle,
    encoder: ClipEncoder,
}

/// [`Recorder`] writing one AVI per session into the recordings directory.
pub struct FfmpegRecorder {
    output_dir: PathBuf,
    fps: f64,
    next_id: u64,
    current: Option<OpenSession>,
}

impl FfmpegRecorder {
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            fps: config.fps,
            next_id: 0,
            current: None,
        }
    }

    fn take_session(&mut self, handle: &SessionHandle) -> Result<OpenSession, StorageError> {
        match self.current.take() {
            Some(session) if session.handle.id == handle.id => Ok(session),
            other => {
                self.current = other;
                Err(StorageError::NoOpenSession)
            }
        }
    }

    async fn push(session: &mut OpenSession, frame: &Frame) -> Result<(), StorageError> {
        let (width, height) = session.handle.dimensions();
        if frame.dimensions() != (width, height) {
            warn!(
                seq = frame.seq,
                width = frame.width(),
                height = frame.height(),
                "frame size does not match session"
            );
            return Err(StorageError::DimensionMismatch {
                got_width: frame.width(),
                got_height: frame.height(),
                width,
                height,
            });
        }

        let mut stamped = frame.image.clone();
        stamp_timestamp(&mut stamped, &frame.timestamp_label());
        session.encoder.push_frame(stamped.as_raw()).await?;
        Ok(())
    }

    /// Finalize whatever was written before a storage failure. The partial
    /// file is kept when ffmpeg manages to close it, but never registered.
    async fn abort(session: OpenSession) {
        let path = session.handle.path.display().to_string();
        let frames = session.encoder.frame_count();
        match session.encoder.finish().await {
            Ok(clip) => error!(
                path,
                frames = clip.frame_count,
                "recording session aborted; partial clip left on disk and not registered"
            ),
            Err(e) => error!(
                path,
                frames,
                error = %e,
                "recording session aborted; partial clip could not be finalized"
            ),
        }
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    async fn open(
        &mut self,
        started_at_ms: i64,
        width: u32,
        height: u32,
    ) -> Result<SessionHandle, StorageError> {
        if let Some(session) = &self.current {
            return Err(StorageError::SessionAlreadyOpen(
                session.handle.path.display().to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| StorageError::Directory {
                path: self.output_dir.display().to_string(),
                source: e,
            })?;

        let path = unique_session_path(&self.output_dir, started_at_ms);
        let encoder = ClipEncoder::start(&path, width, height, self.fps)?;

        let handle = SessionHandle::new(self.next_id, path, started_at_ms, width, height);
        self.next_id += 1;

        info!(
            id = handle.id,
            path = handle.path.display().to_string(),
            width,
            height,
            fps = self.fps,
            "recording session opened"
        );

        self.current = Some(OpenSession {
            handle: handle.clone(),
            encoder,
        });
        Ok(handle)
    }

    async fn write(&mut self, handle: &SessionHandle, frame: &Frame) -> Result<(), StorageError> {
        let session = self
            .current
            .as_mut()
            .filter(|s| s.handle.id == handle.id)
            .ok_or(StorageError::NoOpenSession)?;

        let pushed = Self::push(session, frame).await;
        if let Err(e) = pushed {
            if let Some(session) = self.current.take() {
                Self::abort(session).await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn close(&mut self, handle: SessionHandle) -> Result<PathBuf, StorageError> {
        let session = self.take_session(&handle)?;
        let clip = session.encoder.finish().await?;
        info!(
            id = handle.id,
            path = clip.path.display().to_string(),
            frames = clip.frame_count,
            duration_ms = clip.frame_count as f64 * 1000.0 / self.fps,
            "recording session closed"
        );
        Ok(clip.path)
    }
}
