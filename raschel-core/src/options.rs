use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

/// What to do with the output archive when some files could not be captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// Commit the archive with whatever was captured and report the failures.
    #[default]
    KeepPartial,
    /// Remove the output if a single file failed.
    DiscardOnAnyFailure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupOptions {
    /// Glob patterns matched against root-relative paths and bare file names.
    pub exclude: Vec<String>,
    pub fail_policy: FailPolicy,
    /// Files above this size are stored whole instead of diffed in memory.
    pub max_diff_bytes: u64,
    /// Worker count for re-hashing during change detection; `None` uses rayon's default.
    pub hash_threads: Option<usize>,
    /// Deflate level 0..=9.
    pub compression_level: Option<i64>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            fail_policy: FailPolicy::KeepPartial,
            max_diff_bytes: 8 * 1024 * 1024,
            hash_threads: None,
            compression_level: Some(9),
        }
    }
}

impl BackupOptions {
    pub fn validate(&self) -> Result<()> {
        if self.hash_threads == Some(0) {
            return Err(BackupError::Options("hash_threads must be at least 1".into()));
        }
        if let Some(level) = self.compression_level {
            if !(0..=9).contains(&level) {
                return Err(BackupError::Options(format!(
                    "compression level {level} outside 0..=9"
                )));
            }
        }
        Ok(())
    }
}
