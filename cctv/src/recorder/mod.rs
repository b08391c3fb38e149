pub mod encoder;
pub mod keys;
pub mod registry;
pub mod session;
pub mod state;

pub use registry::ClipRegistry;
pub use session::{FfmpegRecorder, Recorder};
pub use state::{ControllerConfig, MotionRecordingController, Transition};

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use motion_cctv_common::frame::Frame;
    use std::path::PathBuf;

    use super::encoder::EncoderError;
    use super::session::{Recorder, SessionHandle, StorageError};

    /// Keeps sessions in memory; can be told to fail opening or the n-th
    /// write (counted across all sessions, from zero).
    #[derive(Default)]
    pub struct MemoryRecorder {
        pub fail_open: bool,
        pub fail_on_write: Option<usize>,
        pub sessions: Vec<Vec<Frame>>,
        writes: usize,
        current: Option<u64>,
    }

    impl MemoryRecorder {
        pub fn failing_open() -> Self {
            Self {
                fail_open: true,
                ..Self::default()
            }
        }

        pub fn failing_on_write(index: usize) -> Self {
            Self {
                fail_on_write: Some(index),
                ..Self::default()
            }
        }

        pub fn opened(&self) -> usize {
            self.sessions.len()
        }

        pub fn frames_in(&self, session: usize) -> usize {
            self.sessions.get(session).map(Vec::len).unwrap_or(0)
        }

        pub fn total_frames(&self) -> usize {
            self.sessions.iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl Recorder for MemoryRecorder {
        async fn open(
            &mut self,
            started_at_ms: i64,
            width: u32,
            height: u32,
        ) -> Result<SessionHandle, StorageError> {
            if self.fail_open {
                return Err(StorageError::Encoder(EncoderError::Spawn(
                    "memory recorder refused to open".into(),
                )));
            }
            if self.current.is_some() {
                return Err(StorageError::SessionAlreadyOpen("memory".into()));
            }
            let id = self.sessions.len() as u64;
            self.sessions.push(Vec::new());
            self.current = Some(id);
            Ok(SessionHandle::new(
                id,
                PathBuf::from(format!("memory_{id}.avi")),
                started_at_ms,
                width,
                height,
            ))
        }

        async fn write(
            &mut self,
            handle: &SessionHandle,
            frame: &Frame,
        ) -> Result<(), StorageError> {
            if self.current != Some(handle.id()) {
                return Err(StorageError::NoOpenSession);
            }
            let index = self.writes;
            self.writes += 1;
            if self.fail_on_write == Some(index) {
                self.current = None;
                return Err(StorageError::Encoder(EncoderError::Write(
                    "no space left on device".into(),
                )));
            }
            self.sessions[handle.id() as usize].push(frame.clone());
            Ok(())
        }

        async fn close(&mut self, handle: SessionHandle) -> Result<PathBuf, StorageError> {
            if self.current != Some(handle.id()) {
                return Err(StorageError::NoOpenSession);
            }
            self.current = None;
            Ok(handle.path().to_path_buf())
        }
    }
}
