use motion_cctv_common::config::ArchiveConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::recorder::keys::{archive_path, ARCHIVE_FILE_NAME};
use crate::recorder::ClipRegistry;

/// The single file produced from every registered session clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveClip {
    pub path: PathBuf,
    pub frame_count: u64,
    pub clip_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatOutcome {
    /// Nothing was recorded; no archive was written.
    NoOp,
    Archived(ArchiveClip),
}

#[derive(Debug, thiserror::Error)]
pub enum ConcatError {
    #[error("failed to open clip {path}: {source}")]
    OpenClip {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode clip {path}: {reason}")]
    DecodeClip { path: String, reason: String },
    #[error("failed to run {tool}: {reason}")]
    Tool { tool: &'static str, reason: String },
    #[error("ffmpeg failed to encode archive: {0}")]
    Encode(String),
    #[error("archive has {got} frames, expected {expected}")]
    FrameCountMismatch { got: u64, expected: u64 },
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Joins session clips, in recording order, into one H.264 archive.
///
/// Sources are deleted and the registry cleared only once the archive is
/// finalized; any failure leaves both untouched so the call can be retried.
/// Runs ffmpeg to completion, so callers should not await it from anything
/// that must stay responsive.
pub struct ClipConcatenator {
    output_dir: PathBuf,
    crf: u32,
    preset: String,
}

impl ClipConcatenator {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            crf: config.crf,
            preset: config.preset.clone(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        archive_path(&self.output_dir)
    }

    pub async fn concatenate(
        &self,
        registry: &mut ClipRegistry,
    ) -> Result<ConcatOutcome, ConcatError> {
        if registry.is_empty() {
            info!("no recorded clips, nothing to concatenate");
            return Ok(ConcatOutcome::NoOp);
        }

        // Validate every source before touching the output directory.
        let mut sources = Vec::with_capacity(registry.len());
        let mut expected_frames = 0u64;
        for clip in registry.clips() {
            let absolute = tokio::fs::canonicalize(clip)
                .await
                .map_err(|e| ConcatError::OpenClip {
                    path: clip.display().to_string(),
                    source: e,
                })?;
            let frames = count_frames(&absolute).await?;
            debug!(path = absolute.display().to_string(), frames, "clip probed");
            expected_frames += frames;
            sources.push(absolute);
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| io_error(&self.output_dir, e))?;

        let final_path = self.archive_path();
        let partial_path = self.output_dir.join(format!("{ARCHIVE_FILE_NAME}.partial"));
        let list_path = self.output_dir.join("concat_list.txt");

        let result = self
            .encode(&sources, &list_path, &partial_path, expected_frames)
            .await;
        remove_quietly(&list_path).await;
        if let Err(e) = result {
            remove_quietly(&partial_path).await;
            error!(error = %e, clips = sources.len(), "concatenation failed, session clips kept");
            return Err(e);
        }

        publish(&partial_path, &final_path).await?;

        for source in &sources {
            if let Err(e) = tokio::fs::remove_file(source).await {
                warn!(path = source.display().to_string(), error = %e, "failed to delete session clip");
            }
        }
        let clip_count = registry.len();
        registry.clear();

        info!(
            path = final_path.display().to_string(),
            clips = clip_count,
            frames = expected_frames,
            "archive written, session clips deleted"
        );

        Ok(ConcatOutcome::Archived(ArchiveClip {
            path: final_path,
            frame_count: expected_frames,
            clip_count,
        }))
    }

    async fn encode(
        &self,
        sources: &[PathBuf],
        list_path: &Path,
        output_path: &Path,
        expected_frames: u64,
    ) -> Result<(), ConcatError> {
        tokio::fs::write(list_path, concat_list(sources))
            .await
            .map_err(|e| io_error(list_path, e))?;

        let crf = self.crf.to_string();
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list_path)
            .args(["-c:v", "libx264", "-preset", &self.preset, "-crf", &crf])
            .args(["-pix_fmt", "yuv420p", "-vsync", "passthrough"])
            .args(["-movflags", "+faststart", "-f", "mp4", "-y"])
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ConcatError::Tool {
                tool: "ffmpeg",
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ConcatError::Encode(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let got = count_frames(output_path).await?;
        if got != expected_frames {
            return Err(ConcatError::FrameCountMismatch {
                got,
                expected: expected_frames,
            });
        }
        Ok(())
    }
}

/// Decode the first video stream of `path` and count its frames.
pub async fn count_frames(path: &Path) -> Result<u64, ConcatError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0", "-count_frames"])
        .args(["-show_entries", "stream=nb_read_frames"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ConcatError::Tool {
            tool: "ffprobe",
            reason: e.to_string(),
        })?;

    let decode_error = |reason: String| ConcatError::DecodeClip {
        path: path.display().to_string(),
        reason,
    };

    if !output.status.success() {
        return Err(decode_error(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = stdout.trim();
    value
        .parse::<u64>()
        .map_err(|_| decode_error(format!("no decodable video stream (ffprobe said {value:?})")))
}

/// Move the finished archive into place. A partial file that cannot be
/// renamed is removed.
async fn publish(partial_path: &Path, final_path: &Path) -> Result<(), ConcatError> {
    if let Err(e) = tokio::fs::rename(partial_path, final_path).await {
        remove_quietly(partial_path).await;
        error!(path = final_path.display().to_string(), error = %e, "failed to publish archive, session clips kept");
        return Err(io_error(final_path, e));
    }
    Ok(())
}

/// ffmpeg concat demuxer list, one `file '...'` line per clip.
fn concat_list(sources: &[PathBuf]) -> String {
    sources
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

fn io_error(path: &Path, source: std::io::Error) -> ConcatError {
    ConcatError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = path.display().to_string(), error = %e, "failed to remove temp file");
        }
    }
}
