use std::io::Write;
use std::path::Path;

use crate::container::archive::ArchiveReader;
use crate::domain::FileRow;
use crate::error::{BackupError, Result};

/// Manifest records of `archive`, in manifest order.
pub fn list_rows(archive: &Path) -> Result<Vec<FileRow>> {
    let mut reader = ArchiveReader::open(archive)?;
    let manifest = reader.read_manifest()?;
    Ok(manifest
        .records()
        .map(|(root, rec)| FileRow {
            root: root.to_string(),
            filename: rec.filename.clone(),
            hash: rec.hash,
            last_modified: rec.last_modified,
            payload: rec.payload,
        })
        .collect())
}

/// Print one recorded filename per line to stdout.
pub fn list(archive: &Path) -> Result<()> {
    let rows = list_rows(archive)?;
    let mut out = std::io::stdout().lock();
    for row in &rows {
        writeln!(out, "{}", row.display_path()).map_err(|e| BackupError::write("stdout", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::pack::writer::build_full_backup;

    #[test]
    fn rows_follow_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("w");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("b.txt"), "b").unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        let archive = build_full_backup(&Context::default(), src.as_path(), &dir.path().join("o"))
            .unwrap()
            .archive
            .unwrap();
        let rows = list_rows(&archive).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert!(rows[0].display_path().ends_with("/w/a.txt"));
    }

    #[test]
    fn non_archive_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("x.zip");
        std::fs::write(&f, "nope").unwrap();
        assert!(matches!(list_rows(&f), Err(BackupError::Format(_))));
    }
}
