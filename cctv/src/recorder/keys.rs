use chrono::{DateTime, Local, TimeZone};
use std::path::{Path, PathBuf};

pub const SESSION_EXTENSION: &str = "avi";
pub const ARCHIVE_FILE_NAME: &str = "concatenated_video.mp4";

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Local> = Local
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Local::now);
    dt.format("%Y%m%d_%H%M%S").to_string()
}

/// File name for a recording session started at `started_at_ms`.
/// e.g. "recorded_video_20260218_093000.avi"
pub fn session_file_name(started_at_ms: i64) -> String {
    format!(
        "recorded_video_{ts}.{SESSION_EXTENSION}",
        ts = fmt_ts(started_at_ms)
    )
}

/// Path for a new session file in `dir`. Two sessions starting within the
/// same second get a `_1`, `_2`, ... suffix instead of overwriting.
pub fn unique_session_path(dir: &Path, started_at_ms: i64) -> PathBuf {
    let base = dir.join(session_file_name(started_at_ms));
    if !base.exists() {
        return base;
    }
    let ts = fmt_ts(started_at_ms);
    (1u32..)
        .map(|n| dir.join(format!("recorded_video_{ts}_{n}.{SESSION_EXTENSION}")))
        .find(|p| !p.exists())
        .unwrap_or(base)
}

pub fn archive_path(dir: &Path) -> PathBuf {
    dir.join(ARCHIVE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name_format() {
        // 2024-02-18T23:46:40Z
        let name = session_file_name(1708300000000);
        assert!(name.starts_with("recorded_video_2024021"));
        assert!(name.ends_with(".avi"));
        // recorded_video_ + YYYYMMDD_HHMMSS + .avi
        assert_eq!(name.len(), "recorded_video_".len() + 15 + 4);
        assert_eq!(&name[23..24], "_");
    }

    #[test]
    fn test_unique_session_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let ms = 1708300000000;

        let first = unique_session_path(dir.path(), ms);
        assert_eq!(first, dir.path().join(session_file_name(ms)));
        std::fs::write(&first, b"x").unwrap();

        let second = unique_session_path(dir.path(), ms);
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.avi"));
        std::fs::write(&second, b"x").unwrap();

        let third = unique_session_path(dir.path(), ms);
        assert!(third.to_string_lossy().ends_with("_2.avi"));
    }

    #[test]
    fn test_archive_name() {
        let path = archive_path(Path::new("/var/cctv/archive"));
        assert_eq!(path, PathBuf::from("/var/cctv/archive/concatenated_video.mp4"));
    }
}
