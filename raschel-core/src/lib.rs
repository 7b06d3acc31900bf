#![forbid(unsafe_code)]

pub mod context;
pub mod domain;
pub mod error;
pub mod hash;
pub mod options;
pub mod patch;
pub mod stats;

pub mod util {
    pub mod archive_path;
    pub mod hash_forward;
}

pub mod container {
    pub mod archive;
    pub mod manifest;
}

pub mod pack {
    pub mod walker;
    pub mod writer;
}

pub mod delta {
    pub mod detect;
    pub mod writer;
}

pub mod read {
    pub mod extract;
    pub mod opened;
}

pub mod list;

// Re-exports: stable API surface
pub use container::archive::is_valid_container;
pub use container::manifest::{FileRecord, Manifest, Payload};
pub use context::Context;
pub use delta::detect::{ChangeBody, ChangeReport, DetectedChange, detect_changes};
pub use delta::writer::build_diff_backup;
pub use domain::{BackupOutcome, FileFailure, FileRow};
pub use error::{BackupError, Result};
pub use hash::{ContentHash, hash_file};
pub use list::{list, list_rows};
pub use options::{BackupOptions, FailPolicy};
pub use pack::walker::SourceRoots;
pub use pack::writer::build_full_backup;
pub use patch::{apply_patch, make_patch};
pub use read::extract::{RestoreOutcome, VerifyReport, restore, verify};
pub use stats::Stats;
pub use util::archive_path::{ArchivePath, ConversionError, to_archive_path};
