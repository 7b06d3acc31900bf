//! Deflate container: a zip file holding named entries plus `meta.info`.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::container::manifest::{META_ENTRY, Manifest};
use crate::error::{BackupError, Result};
use crate::hash::{CHUNK_SIZE, ContentHash};
use crate::util::hash_forward::HashingForward;

fn zip_io(e: ZipError) -> std::io::Error {
    match e {
        ZipError::Io(e) => e,
        other => std::io::Error::other(other),
    }
}

fn entry_error(archive: &Path, name: &str, e: ZipError) -> BackupError {
    let kind = match e {
        ZipError::FileNotFound => ErrorKind::NotFound,
        _ => ErrorKind::InvalidData,
    };
    BackupError::read(
        format!("{}:{name}", archive.display()),
        std::io::Error::new(kind, e.to_string()),
    )
}

/// Writes a new archive into a temp file beside its final name.
///
/// Nothing appears at the final path until [`ArchiveWriter::commit`], and an
/// existing file there is never replaced.
pub struct ArchiveWriter {
    zip: ZipWriter<NamedTempFile>,
    options: SimpleFileOptions,
    target: PathBuf,
    names: BTreeSet<String>,
}

impl ArchiveWriter {
    pub fn create(target: &Path, level: Option<i64>) -> Result<Self> {
        let dir = target
            .parent()
            .ok_or_else(|| BackupError::Options(format!("{} has no parent", target.display())))?;
        let tmp = tempfile::Builder::new()
            .prefix(".raschel-")
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| BackupError::write(dir.display().to_string(), e))?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(level);
        Ok(Self {
            zip: ZipWriter::new(tmp),
            options,
            target: target.to_path_buf(),
            names: BTreeSet::new(),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn start(&mut self, name: &str, len: u64) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(BackupError::Validation(format!("duplicate entry name {name}")));
        }
        let opts = self.options.large_file(len >= u32::MAX as u64);
        self.zip
            .start_file(name, opts)
            .map_err(|e| BackupError::write(name, zip_io(e)))
    }

    /// Drop the entry being written so a failed file leaves no trace.
    fn abort(&mut self, name: &str) {
        self.names.remove(name);
        if let Err(e) = self.zip.abort_file() {
            debug!(entry = name, error = %e, "abort_file failed");
        }
    }

    pub fn write_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if name == META_ENTRY {
            return Err(BackupError::Validation(format!("{META_ENTRY} is reserved")));
        }
        self.put(name, bytes)
    }

    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.start(name, bytes.len() as u64)?;
        if let Err(e) = self.zip.write_all(bytes) {
            self.abort(name);
            return Err(BackupError::write(name, e));
        }
        Ok(())
    }

    /// Stream `src` into entry `name`, digesting exactly the stored bytes.
    pub fn write_file(&mut self, name: &str, src: &Path) -> Result<(ContentHash, u64)> {
        if name == META_ENTRY {
            return Err(BackupError::Validation(format!("{META_ENTRY} is reserved")));
        }
        let mut f = File::open(src).map_err(|e| BackupError::read(src, e))?;
        let len = f.metadata().map_err(|e| BackupError::read(src, e))?.len();
        self.start(name, len)?;
        match self.copy_hashed(&mut f, src, name) {
            Ok(done) => Ok(done),
            Err(e) => {
                self.abort(name);
                Err(e)
            }
        }
    }

    fn copy_hashed(&mut self, f: &mut File, src: &Path, name: &str) -> Result<(ContentHash, u64)> {
        let mut fw = HashingForward::new(&mut self.zip);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match f.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BackupError::read(src, e)),
            };
            fw.write_all(&buf[..n])
                .map_err(|e| BackupError::write(name, e))?;
        }
        let written = fw.written();
        let (_, hash) = fw.finish();
        Ok((hash, written))
    }

    pub fn write_manifest(&mut self, manifest: &Manifest) -> Result<()> {
        let json = manifest.to_json()?;
        self.put(META_ENTRY, &json)
    }

    /// Finish the container and move it to its final name.
    pub fn commit(self) -> Result<PathBuf> {
        let target = self.target;
        let tmp = self
            .zip
            .finish()
            .map_err(|e| BackupError::write(target.display().to_string(), zip_io(e)))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| BackupError::write(target.display().to_string(), e))?;
        tmp.persist_noclobber(&target)
            .map_err(|e| BackupError::write(target.display().to_string(), e.error))?;
        Ok(target)
    }

    /// Throw the in-progress archive away.
    pub fn discard(self) {
        // the temp file is unlinked on drop
        drop(self.zip);
    }
}

/// Read side of the container.
pub struct ArchiveReader {
    zip: ZipArchive<File>,
    path: PathBuf,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|e| BackupError::read(path, e))?;
        // the file opened, so anything failing here is about its content
        let zip = ZipArchive::new(f).map_err(|e| {
            BackupError::Format(format!("{} is not a valid archive: {e}", path.display()))
        })?;
        Ok(Self {
            zip,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list_entries(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_string).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    pub fn entry_len(&mut self, name: &str) -> Result<u64> {
        match self.zip.by_name(name) {
            Ok(f) => Ok(f.size()),
            Err(e) => Err(entry_error(&self.path, name, e)),
        }
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let label = format!("{}:{name}", self.path.display());
        let mut f = match self.zip.by_name(name) {
            Ok(f) => f,
            Err(e) => return Err(entry_error(&self.path, name, e)),
        };
        let mut out = Vec::with_capacity(f.size() as usize);
        f.read_to_end(&mut out)
            .map_err(|e| BackupError::read(label, e))?;
        Ok(out)
    }

    /// Stream an entry into `w`, returning the digest of the bytes copied.
    pub fn copy_entry<W: Write>(&mut self, name: &str, w: W) -> Result<(ContentHash, u64)> {
        let label = format!("{}:{name}", self.path.display());
        let mut f = match self.zip.by_name(name) {
            Ok(f) => f,
            Err(e) => return Err(entry_error(&self.path, name, e)),
        };
        let mut fw = HashingForward::new(w);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match f.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BackupError::read(label, e)),
            };
            fw.write_all(&buf[..n])
                .map_err(|e| BackupError::write(name, e))?;
        }
        let written = fw.written();
        let (_, hash) = fw.finish();
        Ok((hash, written))
    }

    /// Decode the embedded manifest; absence or unreadable bytes are format errors.
    pub fn read_manifest(&mut self) -> Result<Manifest> {
        let bytes = match self.zip.by_name(META_ENTRY) {
            Ok(mut f) => {
                let mut out = Vec::with_capacity(f.size() as usize);
                f.read_to_end(&mut out).map_err(|e| {
                    BackupError::Format(format!("{META_ENTRY} is corrupt: {e}"))
                })?;
                out
            }
            Err(ZipError::FileNotFound) => {
                return Err(BackupError::Format(format!(
                    "{} has no {META_ENTRY} entry",
                    self.path.display()
                )));
            }
            Err(e) => return Err(BackupError::Format(format!("{META_ENTRY}: {e}"))),
        };
        Manifest::from_json(&bytes)
    }
}

pub fn is_valid_container(path: &Path) -> bool {
    File::open(path)
        .ok()
        .and_then(|f| ZipArchive::new(f).ok())
        .is_some()
}
