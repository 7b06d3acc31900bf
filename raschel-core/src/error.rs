use std::path::PathBuf;

use thiserror::Error;

use crate::patch::PatchError;
use crate::util::archive_path::ConversionError;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read {}: {source}", path.display())]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    IoWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Invalid options: {0}")]
    Options(String),
}

impl BackupError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoRead {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoWrite {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            // well-formed JSON with the wrong shape
            serde_json::error::Category::Data => {
                BackupError::Validation(format!("manifest schema: {e}"))
            }
            _ => BackupError::Format(format!("manifest is not readable JSON: {e}")),
        }
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, BackupError>;
