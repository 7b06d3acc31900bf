use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, error, info, warn};

use crate::container::archive::ArchiveWriter;
use crate::container::manifest::{FileRecord, Manifest};
use crate::context::Context;
use crate::domain::{BackupOutcome, FileFailure};
use crate::error::{BackupError, Result};
use crate::options::FailPolicy;
use crate::pack::walker::{
    ResolvedRoot, SourceFile, SourceRoots, modified_at, resolve_roots, walk_root,
};
use crate::stats::Stats;
use crate::util::archive_path::{ArchivePath, ConversionError, entry_prefixes};

/// `{id}_{stamp}.zip`, with a colon-free UTC stamp.
pub fn archive_file_name(id: &str, at: OffsetDateTime) -> Result<String> {
    let fmt = format_description!(
        "[year]_[month]_[day]_[hour]_[minute]_[second]_[subsecond digits:3]"
    );
    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(&fmt)
        .map_err(|e| BackupError::Format(format!("timestamp: {e}")))?;
    Ok(format!("{id}_{stamp}.zip"))
}

/// Create `target_dir` if needed and return it in absolute form.
pub(crate) fn prepare_target(target_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(target_dir)
        .map_err(|e| BackupError::write(target_dir.display().to_string(), e))?;
    std::path::absolute(target_dir).map_err(|e| BackupError::read(target_dir, e))
}

fn capture_file(
    writer: &mut ArchiveWriter,
    file: &SourceFile,
    prefix: &ArchivePath,
    now: OffsetDateTime,
) -> Result<(FileRecord, u64)> {
    let md = fs::metadata(&file.path).map_err(|e| BackupError::read(&file.path, e))?;
    let last_modified = modified_at(&md);
    let entry = prefix.join(&file.rel);
    let (hash, n) = writer.write_file(entry.as_str(), &file.path)?;
    debug!(entry = %entry, %hash, bytes = n, "captured");
    Ok((
        FileRecord {
            filename: file.rel.clone(),
            hash,
            timestamp: now,
            last_modified,
            payload: None,
        },
        n,
    ))
}

/// Pair each root with its entry prefix. Roots that cannot get one become
/// failures and the rest is re-assigned, so the kept set maps to exactly the
/// prefixes a reader derives from the manifest keys.
fn assign_prefixes(
    mut roots: Vec<ResolvedRoot>,
    failures: &mut Vec<FileFailure>,
) -> Vec<(ResolvedRoot, ArchivePath)> {
    loop {
        let mut prefixes: BTreeMap<String, _> =
            entry_prefixes(roots.iter().map(|r| r.key.as_str()))
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        let mut kept = Vec::with_capacity(roots.len());
        let mut dropped = false;
        for root in roots {
            let prefix = prefixes
                .remove(&root.key)
                .ok_or_else(|| ConversionError::Overlap(root.key.clone()))
                .and_then(|p| p);
            match prefix {
                Ok(p) => kept.push((root, p)),
                Err(e) => {
                    warn!(root = %root.key, error = %e, "root cannot be mapped to an entry name");
                    failures.push(FileFailure::new(&root.path, e));
                    dropped = true;
                }
            }
        }
        if !dropped {
            return kept;
        }
        roots = kept.into_iter().map(|(r, _)| r).collect();
    }
}

/// Walk every root and write one full archive into `target_dir`.
///
/// Per-file problems end up in [`BackupOutcome::failures`]; only failures
/// that leave no usable archive at all are returned as `Err`.
pub fn build_full_backup(
    ctx: &Context,
    roots: impl Into<SourceRoots>,
    target_dir: &Path,
) -> Result<BackupOutcome> {
    let _g = ctx.span().enter();
    let target_dir = prepare_target(target_dir)?;
    let roots = roots.into();

    let mut manifest = Manifest::new_full();
    let now = OffsetDateTime::now_utc();
    let target = target_dir.join(archive_file_name(&manifest.id, now)?);
    let mut writer = ArchiveWriter::create(&target, ctx.options().compression_level)?;
    info!(archive = %target.display(), id = %manifest.id, "full backup started");

    let (resolved, mut failures) = resolve_roots(&roots);
    let resolved = assign_prefixes(resolved, &mut failures);
    let mut stats = Stats::default();

    for (root, prefix) in &resolved {
        stats.roots += 1;
        manifest.ensure_root(&root.key);

        let walk = walk_root(&root.path, ctx.exclusions(), Some(&target_dir));
        stats.excluded += walk.excluded;
        failures.extend(walk.failures);
        for file in &walk.files {
            match capture_file(&mut writer, file, prefix, now) {
                Ok((rec, n)) => {
                    stats.files += 1;
                    stats.logical_bytes += n;
                    manifest.push(&root.key, rec);
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "file skipped");
                    failures.push(FileFailure::new(&file.path, e));
                }
            }
        }
    }

    finalize(writer, manifest, stats, failures, ctx.options().fail_policy)
}

/// Embed the manifest and commit, or drop the archive under the discard policy.
pub(crate) fn finalize(
    mut writer: ArchiveWriter,
    mut manifest: Manifest,
    mut stats: Stats,
    failures: Vec<FileFailure>,
    policy: FailPolicy,
) -> Result<BackupOutcome> {
    manifest.seal();
    stats.failed = failures.len() as u64;
    if !failures.is_empty() {
        error!(failed = failures.len(), "some files could not be backed up");
        for f in &failures {
            error!(path = %f.path.display(), error = %f.error, "failed");
        }
    }

    let archive = if !failures.is_empty() && policy == FailPolicy::DiscardOnAnyFailure {
        warn!(archive = %writer.target().display(), "partial archive discarded");
        writer.discard();
        None
    } else {
        writer.write_manifest(&manifest)?;
        let path = writer.commit()?;
        stats.archive_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(
            archive = %path.display(),
            files = stats.files,
            failed = stats.failed,
            bytes = stats.archive_bytes,
            "archive committed"
        );
        Some(path)
    };

    Ok(BackupOutcome {
        archive,
        manifest_id: manifest.id,
        stats,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn file_name_is_id_plus_colon_free_stamp() {
        let at = datetime!(2024-03-05 07:08:09.123456 UTC);
        assert_eq!(
            archive_file_name("abc", at).unwrap(),
            "abc_2024_03_05_07_08_09_123.zip"
        );
        let offset = datetime!(2024-03-05 09:08:09 +02:00);
        assert!(archive_file_name("x", offset).unwrap().contains("07_08_09"));
    }
}
