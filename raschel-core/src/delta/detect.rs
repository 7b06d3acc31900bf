//! Compare a full archive's records against the live filesystem.
//!
//! Every recorded file that still exists is re-hashed; the recorded mtime is
//! only compared to count "touched but identical" files. Hashing fans out on
//! the context's pool, archive reads and patch building stay on the caller's
//! thread since the reader is a single handle.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::container::archive::ArchiveReader;
use crate::container::manifest::FileRecord;
use crate::context::Context;
use crate::domain::FileFailure;
use crate::error::{BackupError, Result};
use crate::hash::{ContentHash, hash_bytes, hash_file};
use crate::pack::walker::modified_at;
use crate::patch::make_patch_bytes;
use crate::read::opened::OpenedArchive;
use crate::util::archive_path::ArchivePath;

/// What a differential archive will store for a change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeBody {
    /// Patch text turning the archived content into the current content.
    Patch(String),
    /// Too large to diff in memory; the current file is stored whole.
    Full { size: u64 },
}

#[derive(Clone, Debug)]
pub struct DetectedChange {
    pub root: String,
    pub filename: ArchivePath,
    /// Entry name shared by the base and the differential archive.
    pub entry: ArchivePath,
    pub original_path: PathBuf,
    pub body: ChangeBody,
    /// Digest of the current content.
    pub hash: ContentHash,
    pub last_modified: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct ChangeReport {
    pub base_id: String,
    /// Ordered by root, then filename.
    pub changes: Vec<DetectedChange>,
    pub unchanged: Vec<PathBuf>,
    /// Unchanged files whose mtime no longer matches the record.
    pub touched: u64,
    /// Recorded files that were moved or deleted since the backup.
    pub missing: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
}

impl ChangeReport {
    /// `(original_path, patch_text)` for every patched change. Changes stored
    /// whole carry no patch text and are not included.
    pub fn pairs(&self) -> Vec<(&Path, &str)> {
        self.changes
            .iter()
            .filter_map(|c| match &c.body {
                ChangeBody::Patch(text) => Some((c.original_path.as_path(), text.as_str())),
                ChangeBody::Full { .. } => None,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.changes.is_empty() && self.failures.is_empty()
    }
}

struct Job<'a> {
    root: &'a str,
    rec: &'a FileRecord,
    path: PathBuf,
    entry: ArchivePath,
}

enum Probe {
    Missing,
    Unchanged { touched: bool },
    Changed { size: u64, last_modified: OffsetDateTime },
    Failed(BackupError),
}

fn probe(job: &Job<'_>) -> Probe {
    let md = match fs::metadata(&job.path) {
        Ok(md) if md.is_file() => md,
        Ok(_) => return Probe::Missing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Probe::Missing,
        Err(e) => return Probe::Failed(BackupError::read(&job.path, e)),
    };
    let last_modified = modified_at(&md);
    match hash_file(&job.path) {
        Ok(h) if h == job.rec.hash => Probe::Unchanged {
            touched: last_modified != job.rec.last_modified,
        },
        Ok(_) => Probe::Changed {
            size: md.len(),
            last_modified,
        },
        Err(e) => Probe::Failed(e),
    }
}

/// Classify every record of the full backup at `archive`. Writes nothing.
pub fn detect_changes(ctx: &Context, archive: &Path) -> Result<ChangeReport> {
    let _g = ctx.span().enter();
    let mut opened = OpenedArchive::open(archive)?;
    detect_in(ctx, &mut opened, None)
}

pub(crate) fn detect_in(
    ctx: &Context,
    opened: &mut OpenedArchive,
    only_root: Option<&str>,
) -> Result<ChangeReport> {
    if opened.is_differential() {
        return Err(BackupError::Format(format!(
            "{} is a differential archive and cannot serve as a base",
            opened.path().display()
        )));
    }
    if let Some(root) = only_root {
        if !opened.manifest.dirs.contains_key(root) {
            return Err(BackupError::Validation(format!(
                "{root} is not a root of {}",
                opened.path().display()
            )));
        }
    }

    let mut report = ChangeReport {
        base_id: opened.manifest.id.clone(),
        ..Default::default()
    };

    let mut jobs = Vec::new();
    for (root, rec) in opened.manifest.records() {
        if only_root.is_some_and(|r| r != root) {
            continue;
        }
        let path = match rec.filename.to_fs_path(Path::new(root)) {
            Ok(p) => p,
            Err(e) => {
                report
                    .failures
                    .push(FileFailure::new(Path::new(root).join(rec.filename.as_str()), e));
                continue;
            }
        };
        match opened.entry_name(root, &rec.filename) {
            Ok(entry) => jobs.push(Job {
                root,
                rec,
                path,
                entry,
            }),
            Err(e) => report.failures.push(FileFailure::new(path, e)),
        }
    }
    jobs.sort_by(|a, b| (a.root, &a.rec.filename).cmp(&(b.root, &b.rec.filename)));
    info!(archive = %opened.path().display(), files = jobs.len(), "checking recorded files");

    let probes: Vec<Probe> = ctx.install(|| jobs.par_iter().map(probe).collect())?;

    let max = ctx.options().max_diff_bytes;
    let mut changed = Vec::new();
    for (job, p) in jobs.iter().zip(probes) {
        match p {
            Probe::Missing => {
                info!(path = %job.path.display(), "moved or deleted since backup");
                report.missing.push(job.path.clone());
            }
            Probe::Unchanged { touched } => {
                if touched {
                    debug!(path = %job.path.display(), "mtime differs, content identical");
                    report.touched += 1;
                }
                report.unchanged.push(job.path.clone());
            }
            Probe::Changed {
                size,
                last_modified,
            } => changed.push((job, size, last_modified)),
            Probe::Failed(e) => {
                warn!(path = %job.path.display(), error = %e, "cannot check file");
                report.failures.push(FileFailure::new(&job.path, e));
            }
        }
    }

    for (job, size, last_modified) in changed {
        match build_change(&mut opened.reader, job, size, last_modified, max) {
            Ok(Some(change)) => {
                debug!(path = %change.original_path.display(), entry = %change.entry, "changed");
                report.changes.push(change);
            }
            Ok(None) => report.unchanged.push(job.path.clone()),
            Err(e) => {
                warn!(path = %job.path.display(), error = %e, "cannot diff file");
                report.failures.push(FileFailure::new(&job.path, e));
            }
        }
    }

    info!(
        changed = report.changes.len(),
        unchanged = report.unchanged.len(),
        missing = report.missing.len(),
        failed = report.failures.len(),
        "change detection finished"
    );
    Ok(report)
}

/// `None` when the file turned back into its archived content meanwhile.
fn build_change(
    reader: &mut ArchiveReader,
    job: &Job<'_>,
    size: u64,
    last_modified: OffsetDateTime,
    max: u64,
) -> Result<Option<DetectedChange>> {
    let entry = job.entry.as_str();
    let archived_len = reader.entry_len(entry)?;

    let (body, hash) = if size > max || archived_len > max {
        let hash = hash_file(&job.path)?;
        (ChangeBody::Full { size }, hash)
    } else {
        let archived = reader.read_entry(entry)?;
        if hash_bytes(&archived) != job.rec.hash {
            return Err(BackupError::Format(format!(
                "entry {entry} does not match its recorded hash"
            )));
        }
        let current = fs::read(&job.path).map_err(|e| BackupError::read(&job.path, e))?;
        let hash = hash_bytes(&current);
        if hash == job.rec.hash {
            return Ok(None);
        }
        (ChangeBody::Patch(make_patch_bytes(&archived, &current)?), hash)
    };

    Ok(Some(DetectedChange {
        root: job.root.to_string(),
        filename: job.rec.filename.clone(),
        entry: job.entry.clone(),
        original_path: job.path.clone(),
        body,
        hash,
        last_modified,
    }))
}
