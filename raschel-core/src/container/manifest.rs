use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BackupError, Result};
use crate::hash::ContentHash;
use crate::util::archive_path::ArchivePath;

/// Reserved entry holding the serialized manifest of an archive.
pub const META_ENTRY: &str = "meta.info";

/// What a differential archive stores for a changed file.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Patch text that turns the base entry into the current content.
    Patch,
    /// The complete current content (file too large to diff in memory).
    Full,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to its source root.
    pub filename: ArchivePath,
    pub hash: ContentHash,
    /// When the record was captured.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Source mtime at capture.
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    pub id: String,
    #[serde(default)]
    pub diff_backup: bool,
    /// Source root (host path) -> records sorted by filename.
    #[serde(alias = "files")]
    pub dirs: BTreeMap<String, Vec<FileRecord>>,
    /// Id of the full backup a differential manifest is based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Manifest {
    pub fn new_full() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            diff_backup: false,
            dirs: BTreeMap::new(),
            parent: None,
        }
    }

    pub fn new_differential(base: &Manifest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            diff_backup: true,
            dirs: BTreeMap::new(),
            parent: Some(base.id.clone()),
        }
    }

    /// Make sure `root` is listed even if it ends up with no records.
    pub fn ensure_root(&mut self, root: &str) {
        self.dirs.entry(root.to_string()).or_default();
    }

    pub fn push(&mut self, root: &str, rec: FileRecord) {
        self.dirs.entry(root.to_string()).or_default().push(rec);
    }

    /// Sort each root's records so listing order does not depend on walk order.
    pub fn seal(&mut self) {
        for recs in self.dirs.values_mut() {
            recs.sort_by(|a, b| a.filename.cmp(&b.filename));
        }
    }

    pub fn file_count(&self) -> usize {
        self.dirs.values().map(Vec::len).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &FileRecord)> + '_ {
        self.dirs
            .iter()
            .flat_map(|(root, recs)| recs.iter().map(move |r| (root.as_str(), r)))
    }

    pub fn find(&self, root: &str, filename: &ArchivePath) -> Option<&FileRecord> {
        self.dirs
            .get(root)?
            .iter()
            .find(|r| &r.filename == filename)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| BackupError::Format(format!("manifest encode: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks serde cannot express: shape rules across fields and records.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BackupError::Validation("manifest id is empty".into()));
        }
        for (root, recs) in &self.dirs {
            if root.is_empty() {
                return Err(BackupError::Validation("empty source root key".into()));
            }
            let mut names = BTreeSet::new();
            for rec in recs {
                if !names.insert(&rec.filename) {
                    return Err(BackupError::Validation(format!(
                        "duplicate record {} under {root}",
                        rec.filename
                    )));
                }
                match (self.diff_backup, rec.payload) {
                    (true, None) => {
                        return Err(BackupError::Validation(format!(
                            "differential record {} has no payload kind",
                            rec.filename
                        )));
                    }
                    (false, Some(_)) => {
                        return Err(BackupError::Validation(format!(
                            "full-backup record {} carries a payload kind",
                            rec.filename
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn record(name: &str) -> FileRecord {
        FileRecord {
            filename: ArchivePath::parse_relative(name).unwrap(),
            hash: hash_bytes(name.as_bytes()),
            timestamp: OffsetDateTime::now_utc(),
            last_modified: OffsetDateTime::UNIX_EPOCH,
            payload: None,
        }
    }

    fn json(diff: &str, dirs: &str) -> String {
        let h = hash_bytes(b"x");
        format!(
            r#"{{"id":"abc",{diff}"{dirs}":{{"/src":[{{"filename":"a/b.txt","hash":"{h}","timestamp":"2024-01-02T03:04:05.123456789Z","last_modified":"2024-01-02T03:04:05Z"}}]}}}}"#
        )
    }

    #[test]
    fn json_round_trip_preserves_everything() {
        let mut m = Manifest::new_full();
        m.push("/src", record("z.txt"));
        m.push("/src", record("a/b.txt"));
        m.seal();
        let back = Manifest::from_json(&m.to_json().unwrap()).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.dirs["/src"][0].filename.as_str(), "a/b.txt");
    }

    #[test]
    fn serialized_keys_follow_schema() {
        let mut m = Manifest::new_full();
        m.push("/src", record("a.txt"));
        let v: serde_json::Value = serde_json::from_slice(&m.to_json().unwrap()).unwrap();
        assert_eq!(v["diff_backup"], false);
        assert!(v["id"].is_string());
        let rec = &v["dirs"]["/src"][0];
        for key in ["filename", "hash", "timestamp", "last_modified"] {
            assert!(rec.get(key).is_some(), "missing {key}");
        }
        assert!(rec.get("payload").is_none());
        assert!(v.get("parent").is_none());
    }

    #[test]
    fn diff_backup_defaults_to_false_and_files_alias_is_accepted() {
        let m = Manifest::from_json(json("", "files").as_bytes()).unwrap();
        assert!(!m.diff_backup);
        assert_eq!(m.file_count(), 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = json(r#""future_field":[1,2],"#, "dirs");
        assert!(Manifest::from_json(text.as_bytes()).is_ok());
    }

    #[test]
    fn missing_or_mistyped_fields_fail_validation() {
        let no_id = json("", "dirs").replace(r#""id":"abc","#, "");
        assert!(matches!(
            Manifest::from_json(no_id.as_bytes()),
            Err(BackupError::Validation(_))
        ));
        let no_dirs = r#"{"id":"abc","diff_backup":false}"#;
        assert!(matches!(
            Manifest::from_json(no_dirs.as_bytes()),
            Err(BackupError::Validation(_))
        ));
        let bad_flag = json(r#""diff_backup":"yes","#, "dirs");
        assert!(matches!(
            Manifest::from_json(bad_flag.as_bytes()),
            Err(BackupError::Validation(_))
        ));
        let bad_hash = json("", "dirs").replace(&hash_bytes(b"x").to_hex(), "beef");
        assert!(Manifest::from_json(bad_hash.as_bytes()).is_err());
        let abs_name = json("", "dirs").replace("a/b.txt", "/etc/passwd");
        assert!(Manifest::from_json(abs_name.as_bytes()).is_err());
    }

    #[test]
    fn shape_rules_are_enforced() {
        let mut dup = Manifest::new_full();
        dup.push("/src", record("a.txt"));
        dup.push("/src", record("a.txt"));
        assert!(dup.validate().is_err());

        let base = Manifest::new_full();
        let mut diff = Manifest::new_differential(&base);
        diff.push("/src", record("a.txt"));
        assert!(diff.validate().is_err());
        diff.dirs.get_mut("/src").unwrap()[0].payload = Some(Payload::Patch);
        assert!(diff.validate().is_ok());
        assert_eq!(diff.parent.as_deref(), Some(base.id.as_str()));
    }
}
