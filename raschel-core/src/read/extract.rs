use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::container::manifest::{FileRecord, META_ENTRY, Payload};
use crate::context::Context;
use crate::domain::FileFailure;
use crate::error::{BackupError, Result};
use crate::hash::{ContentHash, hash_bytes};
use crate::patch::{Patch, apply_patch};
use crate::read::opened::OpenedArchive;
use crate::util::archive_path::ArchivePath;

#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub restored: u64,
    /// Files taken from the differential archive (patched or replaced).
    pub patched: u64,
    pub failures: Vec<FileFailure>,
}

impl RestoreOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: u64,
    pub patches: u64,
    pub problems: Vec<FileFailure>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

fn open_base(path: &Path) -> Result<OpenedArchive> {
    let base = OpenedArchive::open(path)?;
    if base.is_differential() {
        return Err(BackupError::Format(format!(
            "{} is a differential archive, not a full backup",
            path.display()
        )));
    }
    Ok(base)
}

fn open_diff(path: &Path, base: &OpenedArchive) -> Result<OpenedArchive> {
    let diff = OpenedArchive::open(path)?;
    if !diff.is_differential() {
        return Err(BackupError::Validation(format!(
            "{} is not a differential archive",
            path.display()
        )));
    }
    if diff.manifest.parent.as_deref() != Some(base.manifest.id.as_str()) {
        return Err(BackupError::Validation(format!(
            "{} was not taken against base {}",
            path.display(),
            base.manifest.id
        )));
    }
    Ok(diff)
}

fn create_output(out: &Path) -> Result<File> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BackupError::write(parent.display().to_string(), e))?;
    }
    File::create_new(out).map_err(|e| BackupError::write(out.display().to_string(), e))
}

fn check(entry: &str, got: ContentHash, want: ContentHash) -> Result<()> {
    if got != want {
        return Err(BackupError::Validation(format!(
            "{entry}: content hash {got} does not match record {want}"
        )));
    }
    Ok(())
}

/// Create `out`, let `fill` write it, then stamp the recorded mtime.
/// A file this function created is removed again if anything fails.
fn write_output<F>(out: &Path, mtime: OffsetDateTime, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let mut f = create_output(out)?;
    let res = fill(&mut f).and_then(|()| {
        f.set_modified(SystemTime::from(mtime))
            .and_then(|()| f.sync_all())
            .map_err(|e| BackupError::write(out.display().to_string(), e))
    });
    if res.is_err() {
        drop(f);
        if let Err(e) = fs::remove_file(out) {
            debug!(path = %out.display(), error = %e, "cleanup failed");
        }
    }
    res
}

fn restore_plain(
    src: &mut OpenedArchive,
    entry: &str,
    rec: &FileRecord,
    out: &Path,
) -> Result<()> {
    write_output(out, rec.last_modified, |f| {
        let (hash, _) = src.reader.copy_entry(entry, f)?;
        check(entry, hash, rec.hash)
    })
}

fn restore_patched(
    base: &mut OpenedArchive,
    diff: &mut OpenedArchive,
    entry: &str,
    base_rec: &FileRecord,
    rec: &FileRecord,
    out: &Path,
) -> Result<()> {
    let archived = base.reader.read_entry(entry)?;
    check(entry, hash_bytes(&archived), base_rec.hash)?;
    let archived = String::from_utf8(archived)
        .map_err(|_| BackupError::Format(format!("{entry}: archived content is not text")))?;
    let text = String::from_utf8(diff.reader.read_entry(entry)?)
        .map_err(|_| BackupError::Format(format!("{entry}: patch is not text")))?;
    let current = apply_patch(&text, &archived)?;
    check(entry, hash_bytes(current.as_bytes()), rec.hash)?;

    write_output(out, rec.last_modified, |f| {
        f.write_all(current.as_bytes())
            .map_err(|e| BackupError::write(out.display().to_string(), e))
    })
}

/// Extract `base` into `dest`, replaying `diff` forward when given.
///
/// Existing files under `dest` are never overwritten; such a file is a
/// per-file failure.
pub fn restore(
    ctx: &Context,
    base: &Path,
    diff: Option<&Path>,
    dest: &Path,
) -> Result<RestoreOutcome> {
    let _g = ctx.span().enter();
    let mut base = open_base(base)?;
    let mut diff = match diff {
        Some(p) => Some(open_diff(p, &base)?),
        None => None,
    };
    fs::create_dir_all(dest).map_err(|e| BackupError::write(dest.display().to_string(), e))?;

    let diff_recs: BTreeMap<(String, ArchivePath), FileRecord> = diff
        .as_ref()
        .map(|d| {
            d.manifest
                .records()
                .map(|(root, rec)| ((root.to_string(), rec.filename.clone()), rec.clone()))
                .collect()
        })
        .unwrap_or_default();

    let base_recs: Vec<(String, FileRecord)> = base
        .manifest
        .records()
        .map(|(root, rec)| (root.to_string(), rec.clone()))
        .collect();

    let mut outcome = RestoreOutcome::default();
    let mut used = BTreeSet::new();
    for (root, rec) in &base_recs {
        let entry = match base.entry_name(root, &rec.filename) {
            Ok(e) => e,
            Err(err) => {
                outcome.failures.push(FileFailure::new(rec.filename.as_str(), err));
                continue;
            }
        };
        let out = match entry.to_fs_path(dest) {
            Ok(p) => p,
            Err(err) => {
                outcome.failures.push(FileFailure::new(entry.as_str(), err));
                continue;
            }
        };

        let key = (root.clone(), rec.filename.clone());
        let res = match (diff_recs.get(&key), diff.as_mut()) {
            (Some(drec), Some(d)) => {
                used.insert(key);
                let res = match drec.payload {
                    Some(Payload::Full) => restore_plain(d, entry.as_str(), drec, &out),
                    _ => restore_patched(&mut base, d, entry.as_str(), rec, drec, &out),
                };
                if res.is_ok() {
                    outcome.patched += 1;
                }
                res
            }
            _ => restore_plain(&mut base, entry.as_str(), rec, &out),
        };

        match res {
            Ok(()) => {
                debug!(entry = %entry, "restored");
                outcome.restored += 1;
            }
            Err(err) => {
                warn!(path = %out.display(), error = %err, "not restored");
                outcome.failures.push(FileFailure::new(out, err));
            }
        }
    }

    for (root, filename) in diff_recs.keys().filter(|k| !used.contains(*k)) {
        outcome.failures.push(FileFailure::new(
            Path::new(root).join(filename.as_str()),
            BackupError::Validation(format!("{filename} has no base record under {root}")),
        ));
    }

    info!(
        dest = %dest.display(),
        restored = outcome.restored,
        patched = outcome.patched,
        failed = outcome.failures.len(),
        "restore finished"
    );
    Ok(outcome)
}

/// Check every record of `archive` against the bytes it stores.
pub fn verify(ctx: &Context, archive: &Path) -> Result<VerifyReport> {
    let _g = ctx.span().enter();
    let mut opened = OpenedArchive::open(archive)?;
    let differential = opened.is_differential();
    let recs: Vec<(String, FileRecord)> = opened
        .manifest
        .records()
        .map(|(root, rec)| (root.to_string(), rec.clone()))
        .collect();

    let mut report = VerifyReport::default();
    let mut recorded = BTreeSet::new();
    for (root, rec) in &recs {
        let entry = match opened.entry_name(root, &rec.filename) {
            Ok(e) => e,
            Err(err) => {
                report.problems.push(FileFailure::new(rec.filename.as_str(), err));
                continue;
            }
        };
        recorded.insert(entry.as_str().to_string());
        report.checked += 1;
        let res = if !opened.reader.contains(entry.as_str()) {
            Err(BackupError::Validation(format!("{entry} is recorded but not stored")))
        } else if differential && rec.payload == Some(Payload::Patch) {
            report.patches += 1;
            verify_patch(&mut opened, entry.as_str(), rec)
        } else {
            opened
                .reader
                .copy_entry(entry.as_str(), std::io::sink())
                .and_then(|(hash, _)| check(entry.as_str(), hash, rec.hash))
        };
        if let Err(err) = res {
            warn!(entry = %entry, error = %err, "verification problem");
            report.problems.push(FileFailure::new(entry.as_str(), err));
        }
    }

    for name in opened.reader.list_entries() {
        if name != META_ENTRY && !recorded.contains(&name) && !name.ends_with('/') {
            report.problems.push(FileFailure::new(
                PathBuf::from(&name),
                BackupError::Validation(format!("{name} is stored but not recorded")),
            ));
        }
    }

    info!(
        archive = %archive.display(),
        checked = report.checked,
        problems = report.problems.len(),
        "verify finished"
    );
    Ok(report)
}

fn verify_patch(opened: &mut OpenedArchive, entry: &str, rec: &FileRecord) -> Result<()> {
    let text = String::from_utf8(opened.reader.read_entry(entry)?)
        .map_err(|_| BackupError::Format(format!("{entry}: patch is not text")))?;
    let patch = Patch::parse(&text)?;
    check(entry, patch.target_hash, rec.hash)
}
