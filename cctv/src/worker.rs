use motion_cctv_common::frame::Frame;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera::{DeviceError, FrameSource};
use crate::concat::{ClipConcatenator, ConcatError, ConcatOutcome};
use crate::detector::MotionDetector;
use crate::preview::PreviewWriter;
use crate::recorder::{ClipRegistry, MotionRecordingController, Recorder, Transition};

const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Requests from the front-end. The worker applies them at the top of its
/// next iteration; nothing else touches processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StopRecording,
    ToggleNightVision,
    Shutdown,
}

#[derive(Debug)]
pub enum ExitReason {
    /// `Shutdown` was received.
    Requested,
    /// Every command sender was dropped.
    FrontendGone,
    Device(DeviceError),
}

/// What the worker hands back when it exits.
#[derive(Debug)]
pub struct LoopReport {
    pub registry: ClipRegistry,
    pub exit: ExitReason,
    pub frames: u64,
}

#[derive(Debug)]
pub struct FinishReport {
    pub exit: ExitReason,
    /// Empty after a successful archive; intact for a retry on failure.
    pub registry: ClipRegistry,
    pub outcome: Result<ConcatOutcome, ConcatError>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("detection loop task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub motion_pixels: u64,
    pub transition: Transition,
}

/// Detector, controller and optional preview, driven one frame at a time.
pub struct Pipeline<R: Recorder> {
    detector: MotionDetector,
    controller: MotionRecordingController<R>,
    preview: Option<PreviewWriter>,
}

impl<R: Recorder> Pipeline<R> {
    pub fn new(
        detector: MotionDetector,
        controller: MotionRecordingController<R>,
        preview: Option<PreviewWriter>,
    ) -> Self {
        Self {
            detector,
            controller,
            preview,
        }
    }

    #[cfg(test)]
    pub fn controller(&self) -> &MotionRecordingController<R> {
        &self.controller
    }

    /// Detection always runs on the unfiltered frame; the night-vision
    /// filter only affects what is recorded and previewed.
    pub async fn step(&mut self, frame: &Frame) -> StepReport {
        let motion_pixels = self.detector.observe(frame);
        let outcome = self.controller.process_frame(frame, motion_pixels).await;

        if let Some(preview) = self.preview.as_mut() {
            if let Err(e) = preview.show(&outcome.displayed) {
                warn!(error = %e, "preview update failed");
            }
        }

        StepReport {
            motion_pixels,
            transition: outcome.transition,
        }
    }

    pub async fn handle(&mut self, command: Command) {
        match command {
            Command::StopRecording => {
                if !self.controller.stop().await {
                    info!("stop recording requested, but nothing is being recorded");
                }
            }
            Command::ToggleNightVision => {
                self.controller.toggle_night_vision();
            }
            Command::Shutdown => {}
        }
    }

    pub fn into_registry(self) -> ClipRegistry {
        self.controller.into_registry()
    }
}

/// Front-end side of a running detection loop.
pub struct DetectionHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<LoopReport>,
}

/// Spawn the detection loop. The returned handle is the only way to talk
/// to it; dropping the handle stops the loop on its next iteration.
pub fn start_detection_loop<S, R>(source: S, pipeline: Pipeline<R>) -> DetectionHandle
where
    S: FrameSource + 'static,
    R: Recorder + 'static,
{
    let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let task = tokio::spawn(run_detection_loop(source, pipeline, rx));
    DetectionHandle { commands, task }
}

impl DetectionHandle {
    /// Returns `false` when the loop has already exited.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn stop_recording(&self) -> bool {
        self.send(Command::StopRecording).await
    }

    pub async fn toggle_night_vision(&self) -> bool {
        self.send(Command::ToggleNightVision).await
    }

    /// Resolves once the loop has exited on its own or been stopped.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    /// Ask the loop to exit and wait for its report. Also collects the report
    /// of a loop that already exited (e.g. after a device error).
    pub async fn stop_detection_loop(self) -> Result<LoopReport, WorkerError> {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("detection loop already exited");
        }
        self.task
            .await
            .map_err(|e| WorkerError::Join(e.to_string()))
    }

    /// Stop the loop, then archive everything it recorded.
    pub async fn concatenate_and_finish(
        self,
        concatenator: &ClipConcatenator,
    ) -> Result<FinishReport, WorkerError> {
        let report = self.stop_detection_loop().await?;
        let mut registry = report.registry;
        let outcome = concatenator.concatenate(&mut registry).await;
        Ok(FinishReport {
            exit: report.exit,
            registry,
            outcome,
        })
    }
}

async fn run_detection_loop<S, R>(
    mut source: S,
    mut pipeline: Pipeline<R>,
    mut commands: mpsc::Receiver<Command>,
) -> LoopReport
where
    S: FrameSource,
    R: Recorder,
{
    let (width, height) = source.dimensions();
    info!(width, height, "detection loop started");
    let mut frames: u64 = 0;

    let exit = 'run: loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Shutdown) => break 'run ExitReason::Requested,
                Ok(command) => {
                    debug!(?command, "command received");
                    pipeline.handle(command).await;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'run ExitReason::FrontendGone,
            }
        }

        let frame = match source.read_frame().await {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, frames, "capture device failed, stopping detection loop");
                break ExitReason::Device(e);
            }
        };

        let step = pipeline.step(&frame).await;
        frames += 1;
        if frames % 100 == 0 {
            debug!(frames, motion_pixels = step.motion_pixels, "frames processed");
        }
    };

    // Close any open session before handing the registry back.
    pipeline.controller.stop().await;
    commands.close();
    source.release().await;

    info!(?exit, frames, "detection loop stopped");
    LoopReport {
        registry: pipeline.into_registry(),
        exit,
        frames,
    }
}
