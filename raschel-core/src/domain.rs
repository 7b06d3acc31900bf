use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::container::manifest::Payload;
use crate::error::BackupError;
use crate::hash::ContentHash;
use crate::stats::Stats;
use crate::util::archive_path::ArchivePath;

/// One manifest record as shown by listings.
#[derive(Clone, Debug)]
pub struct FileRow {
    pub root: String,
    pub filename: ArchivePath,
    pub hash: ContentHash,
    pub last_modified: OffsetDateTime,
    pub payload: Option<Payload>,
}

impl FileRow {
    /// Host path the record was captured from.
    pub fn display_path(&self) -> String {
        format!(
            "{}/{}",
            self.root.trim_end_matches(['/', '\\']),
            self.filename
        )
    }
}

/// A file that could not be processed; the run carried on without it.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: BackupError,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, error: impl Into<BackupError>) -> Self {
        Self {
            path: path.into(),
            error: error.into(),
        }
    }
}

/// Result of a backup run that was able to produce (or deliberately discard) an archive.
#[derive(Debug)]
pub struct BackupOutcome {
    /// `None` only when the fail policy discarded a partial archive.
    pub archive: Option<PathBuf>,
    pub manifest_id: String,
    pub stats: Stats,
    pub failures: Vec<FileFailure>,
}

impl BackupOutcome {
    /// True when every discovered file made it into the archive.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.archive.is_some()
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive.as_deref()
    }
}
