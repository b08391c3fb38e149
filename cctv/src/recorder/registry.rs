use std::path::{Path, PathBuf};

/// Completed session files in recording order.
///
/// Append-only while recording; only a successful concatenation clears it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClipRegistry {
    clips: Vec<PathBuf>,
}

impl ClipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: PathBuf) {
        self.clips.push(path);
    }

    pub fn clips(&self) -> &[PathBuf] {
        &self.clips
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.clips.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.clips.clear();
    }
}
