use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    pub roots: u64,
    pub files: u64,
    pub failed: u64,
    pub excluded: u64,
    /// Source bytes captured (full content or the current size of changed files).
    pub logical_bytes: u64,
    /// Size of the committed archive on disk.
    pub archive_bytes: u64,
}

impl Stats {
    pub fn compression_ratio(&self) -> f32 {
        if self.archive_bytes == 0 {
            return 0.0;
        }
        self.logical_bytes as f32 / self.archive_bytes as f32
    }
}
