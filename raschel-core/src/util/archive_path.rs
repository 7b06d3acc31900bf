//! Portable, relative entry names derived from host filesystem paths.
//!
//! Parsing is textual so that an archive written on one host family can be
//! read on another: `\` is a separator, a drive letter becomes a lower-cased
//! leading segment (`C:\Users\a` -> `c/Users/a`), UNC shares keep their
//! `server/share` pair, and the POSIX root contributes no segment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8(String),

    #[error("rooted path has no drive qualifier: {0}")]
    MissingQualifier(String),

    #[error("drive-relative path cannot be mapped: {0}")]
    DriveRelative(String),

    #[error("path escapes its root: {0}")]
    EscapesRoot(String),

    #[error("path has no components: {0:?}")]
    Empty(String),

    #[error("expected a relative path: {0}")]
    NotRelative(String),

    #[error("segment {segment:?} of {path} is not a plain file name on this host")]
    HostSegment { path: String, segment: String },

    #[error("entry prefix of root {0} overlaps another root")]
    Overlap(String),
}

/// A normalized, `/`-separated relative path used as an archive entry name.
///
/// Never empty and never contains `.`, `..` or empty segments.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchivePath(String);

impl ArchivePath {
    /// Parse a path that must already be relative (manifest filenames).
    pub fn parse_relative(s: &str) -> Result<Self, ConversionError> {
        let ap = normalize(s)?;
        if ap.absolute {
            return Err(ConversionError::NotRelative(s.to_string()));
        }
        Ok(ap.path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn join(&self, other: &ArchivePath) -> ArchivePath {
        ArchivePath(format!("{}/{}", self.0, other.0))
    }

    /// Re-root this path under `base` on the current host.
    pub fn to_fs_path(&self, base: &Path) -> Result<PathBuf, ConversionError> {
        let mut out = base.to_path_buf();
        for seg in self.segments() {
            let mut comps = Path::new(seg).components();
            match (comps.next(), comps.next()) {
                (Some(Component::Normal(_)), None) => out.push(seg),
                _ => {
                    return Err(ConversionError::HostSegment {
                        path: self.0.clone(),
                        segment: seg.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchivePath({:?})", self.0)
    }
}

impl AsRef<str> for ArchivePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for ArchivePath {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ArchivePath {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        ArchivePath::parse_relative(&s).map_err(serde::de::Error::custom)
    }
}

/// Map a host path (absolute or relative) to its portable archive form.
pub fn to_archive_path(p: &Path) -> Result<ArchivePath, ConversionError> {
    let raw = p
        .to_str()
        .ok_or_else(|| ConversionError::NonUtf8(p.to_string_lossy().into_owned()))?;
    normalize(raw).map(|n| n.path)
}

struct Normalized {
    path: ArchivePath,
    absolute: bool,
}

fn normalize(raw: &str) -> Result<Normalized, ConversionError> {
    // \\?\C:\x and \\?\UNC\server\share\x
    let verbatim = raw.strip_prefix(r"\\?\");
    let unc_owned;
    let s = match verbatim {
        Some(rest) => match rest.strip_prefix(r"UNC\") {
            Some(unc) => {
                unc_owned = format!(r"\\{unc}");
                unc_owned.as_str()
            }
            None => rest,
        },
        None => raw,
    };
    let unified = s.replace('\\', "/");
    let bytes = unified.as_bytes();

    let mut qualifier: Vec<String> = Vec::new();
    let (rest, absolute) = if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
    {
        let rest = &unified[2..];
        if !rest.starts_with('/') {
            return Err(ConversionError::DriveRelative(raw.to_string()));
        }
        qualifier.push(unified[..1].to_ascii_lowercase());
        (rest, true)
    } else if let Some(unc) = unified.strip_prefix("//") {
        let mut parts = unc.splitn(3, '/');
        let server = parts.next().unwrap_or("");
        let share = parts.next().unwrap_or("");
        if server.is_empty() || share.is_empty() {
            return Err(ConversionError::MissingQualifier(raw.to_string()));
        }
        qualifier.push(server.to_lowercase());
        qualifier.push(share.to_lowercase());
        (parts.next().unwrap_or(""), true)
    } else if unified.starts_with('/') {
        if s.starts_with('\\') {
            // `\dir\file`: rooted on the current drive, which is unknown here
            return Err(ConversionError::MissingQualifier(raw.to_string()));
        }
        (unified.as_str(), true)
    } else if unified.starts_with(':') {
        return Err(ConversionError::MissingQualifier(raw.to_string()));
    } else {
        (unified.as_str(), false)
    };

    let floor = qualifier.len();
    let mut segs = qualifier;
    for seg in rest.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segs.len() <= floor {
                    return Err(ConversionError::EscapesRoot(raw.to_string()));
                }
                segs.pop();
            }
            other => segs.push(other.to_string()),
        }
    }
    if segs.is_empty() {
        return Err(ConversionError::Empty(raw.to_string()));
    }
    Ok(Normalized {
        path: ArchivePath(segs.join("/")),
        absolute,
    })
}

/// Entry-name prefix for each source root of one manifest.
///
/// A root is addressed by its basename unless that basename is shared or
/// would overlap another root's prefix, in which case its full archive path
/// is used. Roots that still overlap (nested roots) get a `~N` suffix on their
/// last segment, `N` being the root's rank in sorted order. No prefix is equal
/// to, or a segment-prefix of, another one, so `prefix/file` names never
/// collide across roots; a root where that cannot be achieved gets
/// [`ConversionError::Overlap`].
///
/// The result depends only on the set of roots, so readers recompute exactly
/// the prefixes the writer used.
pub fn entry_prefixes<'a, I>(roots: I) -> BTreeMap<&'a str, Result<ArchivePath, ConversionError>>
where
    I: IntoIterator<Item = &'a str>,
{
    let roots: BTreeSet<&'a str> = roots.into_iter().collect();
    let full: BTreeMap<&'a str, Result<ArchivePath, ConversionError>> = roots
        .iter()
        .map(|r| (*r, to_archive_path(Path::new(r))))
        .collect();
    let full_ok: BTreeMap<&'a str, &ArchivePath> = full
        .iter()
        .filter_map(|(r, res)| res.as_ref().ok().map(|ap| (*r, ap)))
        .collect();

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for ap in full_ok.values() {
        *seen.entry(ap.file_name()).or_default() += 1;
    }

    let mut prefixes: BTreeMap<&'a str, ArchivePath> = full_ok
        .iter()
        .map(|(root, ap)| {
            let p = if seen.get(ap.file_name()).copied().unwrap_or(0) > 1 {
                (*ap).clone()
            } else {
                ArchivePath(ap.file_name().to_string())
            };
            (*root, p)
        })
        .collect();

    // each round moves at least one root to its full path
    loop {
        let promote: Vec<&'a str> = overlapping(&prefixes)
            .into_iter()
            .filter(|r| prefixes.get(r) != full_ok.get(r).copied())
            .collect();
        if promote.is_empty() {
            break;
        }
        for r in promote {
            if let Some(ap) = full_ok.get(r) {
                prefixes.insert(r, (*ap).clone());
            }
        }
    }

    let clash = overlapping(&prefixes);
    for (rank, root) in roots.iter().enumerate() {
        if clash.contains(root) {
            if let Some(p) = prefixes.get_mut(root) {
                p.0.push_str(&format!("~{rank}"));
            }
        }
    }

    let clash = overlapping(&prefixes);
    full.into_iter()
        .map(|(root, res)| {
            let prefix = res.and_then(|_| match prefixes.remove(root) {
                Some(p) if !clash.contains(root) => Ok(p),
                _ => Err(ConversionError::Overlap(root.to_string())),
            });
            (root, prefix)
        })
        .collect()
}

/// `a` equals `b` or is a whole-segment prefix of it.
fn covers(a: &ArchivePath, b: &ArchivePath) -> bool {
    match b.0.strip_prefix(a.0.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn overlapping<'a>(prefixes: &BTreeMap<&'a str, ArchivePath>) -> BTreeSet<&'a str> {
    let mut out = BTreeSet::new();
    for (ra, a) in prefixes {
        for (rb, b) in prefixes {
            if ra != rb && covers(a, b) {
                out.insert(*ra);
                out.insert(*rb);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap(s: &str) -> Result<String, ConversionError> {
        to_archive_path(Path::new(s)).map(|p| p.as_str().to_string())
    }

    #[test]
    fn drive_qualifier_becomes_lowercase_segment() {
        assert_eq!(ap(r"C:\Users\Bob\notes.txt").unwrap(), "c/Users/Bob/notes.txt");
        assert_eq!(ap("E:/CodeRepo/test").unwrap(), "e/CodeRepo/test");
    }

    #[test]
    fn unc_and_verbatim_prefixes() {
        assert_eq!(ap(r"\\Server\Share\dir\f").unwrap(), "server/share/dir/f");
        assert_eq!(ap(r"\\?\D:\data\x.bin").unwrap(), "d/data/x.bin");
        assert_eq!(ap(r"\\?\UNC\Host\Vol\a").unwrap(), "host/vol/a");
    }

    #[test]
    fn posix_absolute_and_relative_paths() {
        assert_eq!(ap("/home/me/docs/a.txt").unwrap(), "home/me/docs/a.txt");
        assert_eq!(ap("docs/./sub/../a.txt").unwrap(), "docs/a.txt");
    }

    #[test]
    fn missing_qualifier_is_rejected() {
        assert!(matches!(
            ap(r"\Windows\system32"),
            Err(ConversionError::MissingQualifier(_))
        ));
        assert!(matches!(
            ap(r"\\server"),
            Err(ConversionError::MissingQualifier(_))
        ));
        assert!(matches!(ap(":/x"), Err(ConversionError::MissingQualifier(_))));
        assert!(matches!(ap("C:relative"), Err(ConversionError::DriveRelative(_))));
    }

    #[test]
    fn escaping_and_empty_paths_are_rejected() {
        assert!(matches!(ap("../outside"), Err(ConversionError::EscapesRoot(_))));
        assert!(matches!(ap(r"C:\.."), Err(ConversionError::EscapesRoot(_))));
        assert!(matches!(ap("/"), Err(ConversionError::Empty(_))));
        assert!(matches!(ap("."), Err(ConversionError::Empty(_))));
    }

    #[test]
    fn parse_relative_refuses_absolute() {
        assert!(ArchivePath::parse_relative("a/b").is_ok());
        assert!(matches!(
            ArchivePath::parse_relative("/a/b"),
            Err(ConversionError::NotRelative(_))
        ));
    }

    #[test]
    fn to_fs_path_stays_under_base() {
        let base = Path::new("/restore");
        let p = ArchivePath::parse_relative("docs/sub/a.txt").unwrap();
        assert_eq!(
            p.to_fs_path(base).unwrap(),
            Path::new("/restore/docs/sub/a.txt")
        );
    }

    #[test]
    fn prefixes_use_basename_unless_shared() {
        let roots = ["/a/docs", "/b/docs", "/c/photos"];
        let m = entry_prefixes(roots.iter().copied());
        assert_eq!(m["/a/docs"].as_ref().unwrap().as_str(), "a/docs");
        assert_eq!(m["/b/docs"].as_ref().unwrap().as_str(), "b/docs");
        assert_eq!(m["/c/photos"].as_ref().unwrap().as_str(), "photos");
        let single = entry_prefixes(["/only/root"]);
        assert_eq!(single["/only/root"].as_ref().unwrap().as_str(), "root");
    }

    #[test]
    fn basename_that_would_cover_another_prefix_is_promoted() {
        // `q` + `docs/f` would equal `q/docs` + `f`
        let m = entry_prefixes(["/m/q", "/q/docs", "/r/docs"]);
        assert_eq!(m["/m/q"].as_ref().unwrap().as_str(), "m/q");
        assert_eq!(m["/q/docs"].as_ref().unwrap().as_str(), "q/docs");
        assert_eq!(m["/r/docs"].as_ref().unwrap().as_str(), "r/docs");
    }

    #[test]
    fn nested_roots_get_distinct_suffixes() {
        let m = entry_prefixes(["/x/docs", "/x/docs/y/docs"]);
        assert_eq!(m["/x/docs"].as_ref().unwrap().as_str(), "x/docs~0");
        assert_eq!(m["/x/docs/y/docs"].as_ref().unwrap().as_str(), "x/docs/y/docs~1");

        let m = entry_prefixes(["/t", "/t/home/me/docs", "/t/other/docs"]);
        let got: Vec<_> = m.values().map(|p| p.as_ref().unwrap().clone()).collect();
        for a in &got {
            for b in &got {
                assert!(a == b || !covers(a, b), "{a} covers {b}");
            }
        }
    }
}
