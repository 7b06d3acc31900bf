use std::collections::BTreeMap;
use std::path::Path;

use crate::container::archive::ArchiveReader;
use crate::container::manifest::Manifest;
use crate::error::{BackupError, Result};
use crate::util::archive_path::{ArchivePath, ConversionError, entry_prefixes};

/// An archive opened for reading together with its decoded manifest.
pub struct OpenedArchive {
    pub reader: ArchiveReader,
    pub manifest: Manifest,
    prefixes: BTreeMap<String, std::result::Result<ArchivePath, ConversionError>>,
}

impl OpenedArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = ArchiveReader::open(path)?;
        let manifest = reader.read_manifest()?;
        let prefixes = entry_prefixes(manifest.dirs.keys().map(String::as_str))
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Ok(Self {
            reader,
            manifest,
            prefixes,
        })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    pub fn is_differential(&self) -> bool {
        self.manifest.diff_backup
    }

    /// Entry prefix the writer used for `root`.
    pub fn prefix(&self, root: &str) -> Result<&ArchivePath> {
        match self.prefixes.get(root) {
            Some(Ok(p)) => Ok(p),
            Some(Err(e)) => Err(e.clone().into()),
            None => Err(BackupError::Validation(format!(
                "{root} is not a root of this archive"
            ))),
        }
    }

    pub fn entry_name(&self, root: &str, filename: &ArchivePath) -> Result<ArchivePath> {
        Ok(self.prefix(root)?.join(filename))
    }
}
