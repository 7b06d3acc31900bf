//! Source-root resolution and the per-root file walk.

use std::collections::BTreeSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use glob::Pattern;
use time::OffsetDateTime;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::domain::FileFailure;
use crate::error::{BackupError, Result};
use crate::util::archive_path::{ArchivePath, ConversionError, to_archive_path};

/// One or many source roots; a single path is a one-element set.
#[derive(Clone, Debug, Default)]
pub struct SourceRoots(Vec<PathBuf>);

impl SourceRoots {
    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }
}

impl From<&Path> for SourceRoots {
    fn from(p: &Path) -> Self {
        Self(vec![p.to_path_buf()])
    }
}

impl From<PathBuf> for SourceRoots {
    fn from(p: PathBuf) -> Self {
        Self(vec![p])
    }
}

impl From<Vec<PathBuf>> for SourceRoots {
    fn from(v: Vec<PathBuf>) -> Self {
        Self(v)
    }
}

impl From<&[PathBuf]> for SourceRoots {
    fn from(v: &[PathBuf]) -> Self {
        Self(v.to_vec())
    }
}

/// Compiled exclusion globs.
#[derive(Clone, Debug, Default)]
pub struct Exclusions(Vec<Pattern>);

impl Exclusions {
    pub fn compile(patterns: &[String]) -> Result<Self> {
        patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| BackupError::Options(format!("exclude pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `rel` is the root-relative `/` path, `name` the last segment.
    pub fn is_excluded(&self, rel: &str, name: &str) -> bool {
        self.0.iter().any(|p| p.matches(rel) || p.matches(name))
    }
}

/// A source root after resolution: its manifest key and absolute path.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedRoot {
    pub key: String,
    pub path: PathBuf,
}

pub(crate) struct SourceFile {
    pub path: PathBuf,
    pub rel: ArchivePath,
}

#[derive(Default)]
pub(crate) struct RootWalk {
    pub files: Vec<SourceFile>,
    pub failures: Vec<FileFailure>,
    pub excluded: u64,
}

/// Make roots absolute and drop duplicates; unusable roots become failures.
///
/// A root lying inside another root is dropped as well, its files are
/// captured once through the outer root.
pub(crate) fn resolve_roots(roots: &SourceRoots) -> (Vec<ResolvedRoot>, Vec<FileFailure>) {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut failures = Vec::new();
    for raw in roots.paths() {
        let path = match std::path::absolute(raw) {
            Ok(p) => p,
            Err(e) => {
                failures.push(FileFailure::new(raw, BackupError::read(raw, e)));
                continue;
            }
        };
        match std::fs::metadata(&path) {
            Ok(md) if md.is_dir() => {}
            Ok(_) => {
                failures.push(FileFailure::new(
                    &path,
                    BackupError::Validation(format!("{} is not a directory", path.display())),
                ));
                continue;
            }
            Err(e) => {
                failures.push(FileFailure::new(&path, BackupError::read(&path, e)));
                continue;
            }
        }
        let Some(key) = path.to_str().map(str::to_string) else {
            failures.push(FileFailure::new(
                &path,
                ConversionError::NonUtf8(path.to_string_lossy().into_owned()),
            ));
            continue;
        };
        if seen.insert(key.clone()) {
            out.push(ResolvedRoot { key, path });
        } else {
            debug!(root = %key, "duplicate source root ignored");
        }
    }
    let outer: Vec<PathBuf> = out.iter().map(|r| r.path.clone()).collect();
    out.retain(|r| match outer.iter().find(|o| **o != r.path && r.path.starts_with(o)) {
        Some(o) => {
            info!(root = %r.key, covered_by = %o.display(), "source root already covered");
            false
        }
        None => true,
    });
    (out, failures)
}

/// Every regular file under `root`, sorted by name; symlinks are not followed.
///
/// `skip` prunes one directory (the backup target) if it lies inside the root.
pub(crate) fn walk_root(root: &Path, exclusions: &Exclusions, skip: Option<&Path>) -> RootWalk {
    let mut walk = RootWalk::default();
    let mut excluded = 0u64;
    let it = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            if skip.is_some_and(|s| e.path() == s) {
                return false;
            }
            if exclusions.is_empty() {
                return true;
            }
            let rel = e
                .path()
                .strip_prefix(root)
                .ok()
                .and_then(Path::to_str)
                .map(|s| s.replace('\\', "/"));
            let name = e.file_name().to_str();
            match (rel, name) {
                (Some(rel), Some(name)) if exclusions.is_excluded(&rel, name) => {
                    excluded += 1;
                    false
                }
                _ => true,
            }
        });

    for entry in it {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                walk.failures
                    .push(FileFailure::new(&path, BackupError::read(&path, e.into())));
                continue;
            }
        };
        let ft = entry.file_type();
        if ft.is_symlink() {
            debug!(path = %entry.path().display(), "symlink skipped");
            continue;
        }
        if !ft.is_file() {
            continue;
        }
        let path = entry.into_path();
        let rel = match path.strip_prefix(root) {
            Ok(r) => to_archive_path(r),
            Err(_) => Err(ConversionError::EscapesRoot(path.display().to_string())),
        };
        match rel {
            Ok(rel) => walk.files.push(SourceFile { path, rel }),
            Err(e) => walk.failures.push(FileFailure::new(path, e)),
        }
    }
    walk.excluded = excluded;
    walk
}

/// Source mtime as an instant; the epoch when the platform cannot say.
pub(crate) fn modified_at(md: &Metadata) -> OffsetDateTime {
    md.modified()
        .map(OffsetDateTime::from)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
