use motion_cctv_common::config::MotionConfig;
use motion_cctv_common::frame::Frame;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::filter::traits::VisualFilter;

use super::registry::ClipRegistry;
use super::session::{Recorder, SessionHandle};

/// Externally visible recording state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Active,
}

/// What a single frame did to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Idle→Active, a session was opened.
    Started,
    /// Active→Idle, the session was closed and registered.
    Stopped,
    /// The session failed to store a frame and was dropped.
    Aborted,
}

#[derive(Debug)]
pub struct FrameOutcome {
    pub state: MotionState,
    pub transition: Transition,
    /// The frame as it should be shown: filtered when night vision is on.
    pub displayed: Frame,
    /// Whether `displayed` was handed to the recorder.
    pub recorded: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Foreground pixel count a frame must exceed to count as motion.
    pub motion_threshold: u64,
    /// Quiet time after the last motion frame before the session closes.
    pub timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 500,
            timeout: Duration::from_secs(2),
        }
    }
}

impl From<&MotionConfig> for ControllerConfig {
    fn from(config: &MotionConfig) -> Self {
        Self {
            motion_threshold: config.motion_threshold,
            timeout: config.timeout(),
        }
    }
}

enum RecordingState {
    /// No motion; frames are observed but not stored.
    Idle,
    /// Motion seen within the timeout; every frame goes to the session.
    Active {
        session: SessionHandle,
        motion_start_ms: i64,
        /// Monotonic capture time of the most recent above-threshold frame.
        last_motion_at: Instant,
        frames_written: u32,
    },
}

/// Ties detector output to recorder sessions, with a hysteresis timeout so
/// short gaps in motion do not split a recording.
pub struct MotionRecordingController<R: Recorder> {
    state: RecordingState,
    config: ControllerConfig,
    recorder: R,
    registry: ClipRegistry,
    filter: Box<dyn VisualFilter>,
    night_vision: bool,
}

impl<R: Recorder> MotionRecordingController<R> {
    pub fn new(config: ControllerConfig, recorder: R, filter: Box<dyn VisualFilter>) -> Self {
        Self {
            state: RecordingState::Idle,
            config,
            recorder,
            registry: ClipRegistry::new(),
            filter,
            night_vision: false,
        }
    }

    pub fn state(&self) -> MotionState {
        match self.state {
            RecordingState::Idle => MotionState::Idle,
            RecordingState::Active { .. } => MotionState::Active,
        }
    }

    pub fn registry(&self) -> &ClipRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ClipRegistry {
        self.registry
    }

    pub fn night_vision(&self) -> bool {
        self.night_vision
    }

    pub fn set_night_vision(&mut self, enabled: bool) {
        self.night_vision = enabled;
        info!(enabled, filter = self.filter.name(), "night vision set");
    }

    pub fn toggle_night_vision(&mut self) -> bool {
        self.set_night_vision(!self.night_vision);
        self.night_vision
    }

    #[cfg(test)]
    pub(crate) fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Feed one frame and its foreground pixel count through the state
    /// machine. This is the main entry point.
    pub async fn process_frame(&mut self, frame: &Frame, motion_pixels: u64) -> FrameOutcome {
        let motion = motion_pixels > self.config.motion_threshold;
        let now_ms = frame.captured_at_ms;
        let now = frame.captured_at;
        let mut transition = Transition::None;

        let previous = std::mem::replace(&mut self.state, RecordingState::Idle);
        self.state = match previous {
            RecordingState::Idle if motion => {
                let (width, height) = frame.dimensions();
                match self.recorder.open(now_ms, width, height).await {
                    Ok(session) => {
                        info!(
                            motion_pixels,
                            threshold = self.config.motion_threshold,
                            ts = now_ms,
                            path = session.path().display().to_string(),
                            "IDLE→ACTIVE: motion detected, recording started"
                        );
                        transition = Transition::Started;
                        RecordingState::Active {
                            session,
                            motion_start_ms: now_ms,
                            last_motion_at: now,
                            frames_written: 0,
                        }
                    }
                    Err(e) => {
                        error!(error = %e, ts = now_ms, "failed to open recording session, staying IDLE");
                        RecordingState::Idle
                    }
                }
            }
            RecordingState::Idle => RecordingState::Idle,
            RecordingState::Active {
                session,
                motion_start_ms,
                last_motion_at,
                frames_written,
            } => {
                if motion {
                    RecordingState::Active {
                        session,
                        motion_start_ms,
                        last_motion_at: now,
                        frames_written,
                    }
                } else {
                    let quiet = now.saturating_duration_since(last_motion_at);
                    if quiet >= self.config.timeout {
                        info!(
                            quiet_ms = quiet.as_millis() as u64,
                            timeout_ms = self.config.timeout.as_millis() as u64,
                            motion_start_ms,
                            frames = frames_written,
                            "ACTIVE→IDLE: motion stopped, recording stopped"
                        );
                        self.finish_session(session).await;
                        transition = Transition::Stopped;
                        RecordingState::Idle
                    } else {
                        debug!(
                            quiet_ms = quiet.as_millis() as u64,
                            motion_pixels,
                            "ACTIVE: quiet frame within timeout"
                        );
                        RecordingState::Active {
                            session,
                            motion_start_ms,
                            last_motion_at,
                            frames_written,
                        }
                    }
                }
            }
        };

        let displayed = if self.night_vision {
            self.filter.apply(frame)
        } else {
            frame.clone()
        };

        let mut recorded = false;
        if matches!(self.state, RecordingState::Active { .. }) {
            let mut failed = None;
            if let RecordingState::Active {
                session,
                frames_written,
                ..
            } = &mut self.state
            {
                match self.recorder.write(session, &displayed).await {
                    Ok(()) => *frames_written += 1,
                    Err(e) => failed = Some(e),
                }
            }

            match failed {
                None => recorded = true,
                Some(e) => {
                    error!(error = %e, seq = frame.seq, "ACTIVE→IDLE: storage failure, session aborted");
                    self.state = RecordingState::Idle;
                    transition = Transition::Aborted;
                }
            }
        }

        FrameOutcome {
            state: self.state(),
            transition,
            displayed,
            recorded,
        }
    }

    /// Force Active→Idle now, closing and registering any open session.
    /// Returns `false` (and does nothing) when already idle.
    pub async fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.state, RecordingState::Idle) {
            RecordingState::Idle => {
                debug!("stop requested while IDLE, nothing to do");
                false
            }
            RecordingState::Active {
                session,
                frames_written,
                ..
            } => {
                info!(frames = frames_written, "ACTIVE→IDLE: recording stopped on request");
                self.finish_session(session).await;
                true
            }
        }
    }

    async fn finish_session(&mut self, session: SessionHandle) {
        let started_at_ms = session.started_at_ms();
        match self.recorder.close(session).await {
            Ok(path) => {
                if self.registry.contains(&path) {
                    warn!(path = path.display().to_string(), "clip already registered");
                    return;
                }
                info!(
                    path = path.display().to_string(),
                    started_at_ms,
                    clips = self.registry.len() + 1,
                    "clip registered"
                );
                self.registry.push(path);
            }
            Err(e) => {
                error!(error = %e, started_at_ms, "failed to close recording session, clip lost");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::night_vision::NightVision;
    use crate::recorder::testing::MemoryRecorder;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use std::sync::OnceLock;

    const SECOND: i64 = 1_000;

    /// Shared monotonic origin so `ms` offsets map to real elapsed time.
    fn origin() -> Instant {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        *ORIGIN.get_or_init(Instant::now)
    }

    fn controller(recorder: MemoryRecorder) -> MotionRecordingController<MemoryRecorder> {
        MotionRecordingController::new(
            ControllerConfig::default(),
            recorder,
            Box::new(NightVision::default()),
        )
    }

    /// Frame captured `ms` after the origin, with a matching wall clock.
    fn frame_at(ms: i64) -> Frame {
        stamped_frame(ms, ms)
    }

    fn stamped_frame(wall_ms: i64, mono_ms: i64) -> Frame {
        Frame::new(
            RgbImage::from_pixel(8, 8, Rgb([180, 180, 180])),
            wall_ms,
            mono_ms as u64,
        )
        .with_captured_at(origin() + Duration::from_millis(mono_ms as u64))
    }

    async fn feed(
        c: &mut MotionRecordingController<MemoryRecorder>,
        samples: &[(i64, u64)],
    ) -> Vec<(MotionState, Transition)> {
        let mut out = Vec::new();
        for &(ms, count) in samples {
            let outcome = c.process_frame(&frame_at(ms), count).await;
            out.push((outcome.state, outcome.transition));
        }
        out
    }

    #[tokio::test]
    async fn starts_only_above_threshold() {
        let mut c = controller(MemoryRecorder::default());
        let states = feed(&mut c, &[(0, 0), (100, 500), (200, 501)]).await;
        assert_eq!(states[0], (MotionState::Idle, Transition::None));
        // At the threshold is not above it.
        assert_eq!(states[1], (MotionState::Idle, Transition::None));
        assert_eq!(states[2], (MotionState::Active, Transition::Started));
        assert_eq!(c.recorder().opened(), 1);
    }

    #[tokio::test]
    async fn stops_exactly_at_timeout() {
        let mut c = controller(MemoryRecorder::default());
        let states = feed(
            &mut c,
            &[(0, 600), (SECOND, 50), (2 * SECOND - 1, 50), (2 * SECOND, 50)],
        )
        .await;
        assert_eq!(states[0].1, Transition::Started);
        assert_eq!(states[1], (MotionState::Active, Transition::None));
        // 1999 ms of quiet is not enough.
        assert_eq!(states[2], (MotionState::Active, Transition::None));
        assert_eq!(states[3], (MotionState::Idle, Transition::Stopped));
        assert_eq!(c.registry().len(), 1);
    }

    #[tokio::test]
    async fn one_second_samples_split_at_timeout() {
        // counts [600, 50, 50, 600] at t = 0, 1, 2, 3 s with a 2 s timeout:
        // the t=2 sample has seen 2 s of quiet, which reaches the timeout.
        let mut c = controller(MemoryRecorder::default());
        let states = feed(
            &mut c,
            &[(0, 600), (SECOND, 50), (2 * SECOND, 50), (3 * SECOND, 600)],
        )
        .await;
        assert_eq!(
            states,
            vec![
                (MotionState::Active, Transition::Started),
                (MotionState::Active, Transition::None),
                (MotionState::Idle, Transition::Stopped),
                (MotionState::Active, Transition::Started),
            ]
        );
        assert_eq!(c.registry().len(), 1);
        assert_eq!(c.recorder().opened(), 2);
    }

    #[tokio::test]
    async fn motion_refreshes_the_timeout() {
        let mut c = controller(MemoryRecorder::default());
        let states = feed(
            &mut c,
            &[
                (0, 600),
                (SECOND, 50),
                (1_500, 600),
                (3 * SECOND, 50),
                (3_500, 50),
            ],
        )
        .await;
        // 1.5 s after the refresh at t=1.5 s: still recording.
        assert_eq!(states[3], (MotionState::Active, Transition::None));
        assert_eq!(states[4], (MotionState::Idle, Transition::Stopped));
        assert_eq!(c.recorder().opened(), 1);
    }

    #[tokio::test]
    async fn wall_clock_jump_back_does_not_extend_session() {
        let mut c = controller(MemoryRecorder::default());
        // Motion at wall time 1h, then the wall clock steps back to 0 while
        // real time keeps moving forward in 50 ms steps.
        let first = c.process_frame(&stamped_frame(3_600 * SECOND, 0), 900).await;
        assert_eq!(first.transition, Transition::Started);

        let mut stopped_at = None;
        for i in 1..=200i64 {
            let mono = i * 50;
            let outcome = c.process_frame(&stamped_frame(mono, mono), 0).await;
            if outcome.transition == Transition::Stopped {
                stopped_at = Some(mono);
                break;
            }
        }
        assert_eq!(stopped_at, Some(2 * SECOND));
        assert_eq!(c.state(), MotionState::Idle);
        assert_eq!(c.registry().len(), 1);
    }

    #[tokio::test]
    async fn wall_clock_jump_forward_does_not_cut_session() {
        let mut c = controller(MemoryRecorder::default());
        feed(&mut c, &[(0, 900)]).await;
        // Wall clock leaps a day ahead, only 100 ms have really passed.
        let outcome = c.process_frame(&stamped_frame(86_400 * SECOND, 100), 0).await;
        assert_eq!(outcome.state, MotionState::Active);
        assert_eq!(outcome.transition, Transition::None);
    }

    #[tokio::test]
    async fn frames_are_recorded_only_while_active() {
        let mut c = controller(MemoryRecorder::default());
        feed(
            &mut c,
            &[
                (0, 10),
                (100, 10),
                (200, 900),
                (300, 900),
                (400, 10),
                (3 * SECOND, 10),
                (3_100, 10),
            ],
        )
        .await;
        // t=200, 300, 400 are written; t=3000 closes the session unwritten.
        assert_eq!(c.recorder().frames_in(0), 3);
        assert_eq!(c.recorder().total_frames(), 3);
    }

    #[tokio::test]
    async fn stop_while_idle_is_noop() {
        let mut c = controller(MemoryRecorder::default());
        assert!(!c.stop().await);
        assert!(!c.stop().await);
        assert_eq!(c.state(), MotionState::Idle);
        assert!(c.registry().is_empty());
        assert_eq!(c.recorder().opened(), 0);
    }

    #[tokio::test]
    async fn stop_closes_active_session_once() {
        let mut c = controller(MemoryRecorder::default());
        feed(&mut c, &[(0, 900)]).await;
        assert!(c.stop().await);
        assert!(!c.stop().await);
        assert_eq!(c.state(), MotionState::Idle);
        assert_eq!(c.registry().clips(), &[PathBuf::from("memory_0.avi")]);
    }

    #[tokio::test]
    async fn registry_follows_close_order() {
        let mut c = controller(MemoryRecorder::default());
        for episode in 0..3 {
            let base = episode * 10 * SECOND;
            feed(&mut c, &[(base, 900), (base + 3 * SECOND, 0)]).await;
        }
        assert_eq!(
            c.registry().clips(),
            &[
                PathBuf::from("memory_0.avi"),
                PathBuf::from("memory_1.avi"),
                PathBuf::from("memory_2.avi"),
            ]
        );
    }

    #[tokio::test]
    async fn storage_failure_aborts_session() {
        let recorder = MemoryRecorder::failing_on_write(2);
        let mut c = controller(recorder);
        let states = feed(&mut c, &[(0, 900), (100, 900), (200, 900), (300, 900)]).await;

        assert_eq!(states[0].1, Transition::Started);
        assert_eq!(states[1], (MotionState::Active, Transition::None));
        assert_eq!(states[2], (MotionState::Idle, Transition::Aborted));
        // Loop keeps going: the next motion frame opens a new session.
        assert_eq!(states[3], (MotionState::Active, Transition::Started));
        assert!(c.registry().is_empty());
        assert_eq!(c.recorder().frames_in(0), 2);
    }

    #[tokio::test]
    async fn open_failure_stays_idle() {
        let recorder = MemoryRecorder::failing_open();
        let mut c = controller(recorder);
        let states = feed(&mut c, &[(0, 900), (100, 900)]).await;
        assert!(states
            .iter()
            .all(|s| *s == (MotionState::Idle, Transition::None)));
    }

    #[tokio::test]
    async fn night_vision_changes_recorded_frames() {
        let mut c = controller(MemoryRecorder::default());
        let plain = c.process_frame(&frame_at(0), 900).await;
        assert!(plain.recorded);
        assert_eq!(plain.displayed.image.get_pixel(0, 0).0, [180, 180, 180]);

        assert!(c.toggle_night_vision());
        let filtered = c.process_frame(&frame_at(100), 900).await;
        // Bright scene renders black under night vision.
        assert!(filtered.recorded);
        assert_eq!(filtered.displayed.image.get_pixel(0, 0).0, [0, 0, 0]);

        assert!(!c.toggle_night_vision());
    }

    #[tokio::test]
    async fn idle_frames_are_displayed_but_not_recorded() {
        let mut c = controller(MemoryRecorder::default());
        c.set_night_vision(true);
        let outcome = c.process_frame(&frame_at(0), 0).await;
        assert!(!outcome.recorded);
        assert_eq!(outcome.displayed.image.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(c.recorder().total_frames(), 0);
    }
}
