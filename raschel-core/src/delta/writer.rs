use std::path::Path;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::container::archive::ArchiveWriter;
use crate::container::manifest::{FileRecord, Manifest, Payload};
use crate::context::Context;
use crate::delta::detect::{ChangeBody, DetectedChange, detect_in};
use crate::domain::{BackupOutcome, FileFailure};
use crate::error::{BackupError, Result};
use crate::pack::writer::{archive_file_name, finalize, prepare_target};
use crate::read::opened::OpenedArchive;
use crate::stats::Stats;

/// Store one change under the base's entry name; returns the record to embed.
fn store_change(
    writer: &mut ArchiveWriter,
    change: &DetectedChange,
    now: OffsetDateTime,
) -> Result<(FileRecord, u64)> {
    let entry = change.entry.as_str();
    let (payload, hash, logical) = match &change.body {
        ChangeBody::Patch(text) => {
            writer.write_bytes(entry, text.as_bytes())?;
            (Payload::Patch, change.hash, text.len() as u64)
        }
        ChangeBody::Full { .. } => {
            // the record must describe what was stored, even if the file moved on
            let (hash, n) = writer.write_file(entry, &change.original_path)?;
            (Payload::Full, hash, n)
        }
    };
    Ok((
        FileRecord {
            filename: change.filename.clone(),
            hash,
            timestamp: now,
            last_modified: change.last_modified,
            payload: Some(payload),
        },
        logical,
    ))
}

/// Detect changes against `base_archive` and write them as a differential
/// archive named `{base_id}_{stamp}.zip` inside `target_dir`.
///
/// `source_root` limits the run to one root recorded in the base manifest.
/// The archive is written even when nothing changed, so every run leaves a
/// dated marker chained to its base.
pub fn build_diff_backup(
    ctx: &Context,
    base_archive: &Path,
    source_root: Option<&Path>,
    target_dir: &Path,
) -> Result<BackupOutcome> {
    let _g = ctx.span().enter();
    let mut opened = OpenedArchive::open(base_archive)?;

    let only_root = match source_root {
        Some(p) => Some(resolve_root_key(&opened, p)?),
        None => None,
    };
    let report = detect_in(ctx, &mut opened, only_root.as_deref())?;

    let target_dir = prepare_target(target_dir)?;
    let mut manifest = Manifest::new_differential(&opened.manifest);
    for root in opened.manifest.dirs.keys() {
        manifest.ensure_root(root);
    }
    let now = OffsetDateTime::now_utc();
    let target = target_dir.join(archive_file_name(&report.base_id, now)?);
    let mut writer = ArchiveWriter::create(&target, ctx.options().compression_level)?;
    info!(
        archive = %target.display(),
        parent = %report.base_id,
        changes = report.changes.len(),
        "differential backup started"
    );

    let mut stats = Stats {
        roots: only_root.map_or(opened.manifest.dirs.len() as u64, |_| 1),
        ..Default::default()
    };
    let mut failures: Vec<FileFailure> = report.failures;
    for change in &report.changes {
        match store_change(&mut writer, change, now) {
            Ok((rec, n)) => {
                stats.files += 1;
                stats.logical_bytes += n;
                manifest.push(&change.root, rec);
            }
            Err(e) => {
                warn!(path = %change.original_path.display(), error = %e, "change not stored");
                failures.push(FileFailure::new(&change.original_path, e));
            }
        }
    }

    finalize(writer, manifest, stats, failures, ctx.options().fail_policy)
}

/// Map a caller-supplied root onto the key recorded in the base manifest.
fn resolve_root_key(opened: &OpenedArchive, root: &Path) -> Result<String> {
    let abs = std::path::absolute(root).map_err(|e| BackupError::read(root, e))?;
    let wanted = [root, abs.as_path()];
    opened
        .manifest
        .dirs
        .keys()
        .find(|k| wanted.iter().any(|w| Path::new(k.as_str()) == *w))
        .cloned()
        .ok_or_else(|| {
            BackupError::Validation(format!(
                "{} is not a root of {}",
                root.display(),
                opened.path().display()
            ))
        })
}
