mod camera;
mod concat;
mod detector;
mod filter;
mod preview;
mod recorder;
mod worker;

use camera::FfmpegCamera;
use concat::{ClipConcatenator, ConcatOutcome};
use detector::MotionDetector;
use filter::night_vision::NightVision;
use motion_cctv_common::config::Config;
use preview::PreviewWriter;
use recorder::{ClipRegistry, ControllerConfig, FfmpegRecorder, MotionRecordingController};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use worker::{DetectionHandle, ExitReason, Pipeline};

const HELP: &str = "commands: r = stop recording, n = toggle night vision, \
                    s = stop detection, q = archive recordings and quit, h = help";

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        device = config.camera.device,
        width = config.camera.width,
        height = config.camera.height,
        motion_threshold = config.motion.motion_threshold,
        timeout_secs = config.motion.timeout_secs,
        recordings = config.recording.output_dir.display().to_string(),
        archive = config.archive.output_dir.display().to_string(),
        "starting motion-cctv"
    );

    // Recording and archiving both shell out to ffmpeg.
    recorder::encoder::check_ffmpeg_available().await;

    let source = match FfmpegCamera::open(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, device = config.camera.device, "failed to open capture device");
            std::process::exit(1);
        }
    };

    let mut controller = MotionRecordingController::new(
        ControllerConfig::from(&config.motion),
        FfmpegRecorder::new(&config.recording),
        Box::new(NightVision::new(config.recording.night_vision_threshold)),
    );
    controller.set_night_vision(config.recording.night_vision);

    let pipeline = Pipeline::new(
        MotionDetector::from_config(&config.motion),
        controller,
        PreviewWriter::from_config(&config.preview),
    );

    let handle = worker::start_detection_loop(source, pipeline);
    info!("{HELP}");
    let finished = run_console(handle).await;

    let concatenator = ClipConcatenator::new(&config.archive);
    let (registry, outcome) = match finished {
        Console::Running(handle) => match handle.concatenate_and_finish(&concatenator).await {
            Ok(finish) => {
                log_exit(&finish.exit);
                (finish.registry, finish.outcome)
            }
            Err(e) => {
                error!(error = %e, "detection loop did not shut down cleanly");
                std::process::exit(1);
            }
        },
        Console::Stopped(mut registry) => {
            let outcome = concatenator.concatenate(&mut registry).await;
            (registry, outcome)
        }
    };

    match outcome {
        Ok(ConcatOutcome::NoOp) => info!("nothing was recorded"),
        Ok(ConcatOutcome::Archived(archive)) => info!(
            path = archive.path.display().to_string(),
            clips = archive.clip_count,
            frames = archive.frame_count,
            "recordings archived"
        ),
        Err(e) => {
            error!(
                error = %e,
                clips = registry.len(),
                "failed to archive recordings, session clips left on disk"
            );
            std::process::exit(1);
        }
    }
}

/// Where the console left the detection loop.
enum Console {
    Running(DetectionHandle),
    Stopped(ClipRegistry),
}

enum Input {
    Line(std::io::Result<Option<String>>),
    Interrupted,
    LoopExited,
}

fn log_exit(exit: &ExitReason) {
    if let ExitReason::Device(e) = exit {
        warn!(error = %e, "capture ended on a device error");
    }
}

/// Read single-letter commands from stdin until the user asks to finish,
/// Ctrl-C arrives or stdin closes. A loop that exits by itself (device
/// failure) also ends the console.
async fn run_console(handle: DetectionHandle) -> Console {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console = Console::Running(handle);

    loop {
        let input = match &console {
            Console::Running(handle) => tokio::select! {
                line = lines.next_line() => Input::Line(line),
                _ = tokio::signal::ctrl_c() => Input::Interrupted,
                _ = handle.closed() => Input::LoopExited,
            },
            Console::Stopped(_) => tokio::select! {
                line = lines.next_line() => Input::Line(line),
                _ = tokio::signal::ctrl_c() => Input::Interrupted,
            },
        };

        let line = match input {
            Input::Line(Ok(Some(l))) => l,
            Input::Line(Ok(None)) => {
                info!("stdin closed, finishing up");
                return console;
            }
            Input::Line(Err(e)) => {
                warn!(error = %e, "failed to read console input, finishing up");
                return console;
            }
            Input::Interrupted => {
                info!("interrupted, finishing up");
                return console;
            }
            Input::LoopExited => {
                warn!("detection loop exited");
                return console;
            }
        };

        console = match (line.trim(), console) {
            ("q", console) => return console,
            ("s", Console::Running(handle)) => match handle.stop_detection_loop().await {
                Ok(report) => {
                    log_exit(&report.exit);
                    info!(
                        clips = report.registry.len(),
                        frames = report.frames,
                        "detection stopped; q archives the recordings"
                    );
                    Console::Stopped(report.registry)
                }
                Err(e) => {
                    error!(error = %e, "detection loop did not shut down cleanly");
                    std::process::exit(1);
                }
            },
            ("r", Console::Running(handle)) => {
                handle.stop_recording().await;
                Console::Running(handle)
            }
            ("n", Console::Running(handle)) => {
                handle.toggle_night_vision().await;
                Console::Running(handle)
            }
            ("r" | "n" | "s", stopped @ Console::Stopped(_)) => {
                warn!("detection is stopped; q archives the recordings");
                stopped
            }
            ("h" | "", console) => {
                info!("{HELP}");
                console
            }
            (other, console) => {
                warn!(command = other, "unknown command; {HELP}");
                console
            }
        };
    }
}
