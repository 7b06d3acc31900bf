use std::fs;
use std::path::{Path, PathBuf};

use raschel_core::container::archive::ArchiveReader;
use raschel_core::{
    BackupError, BackupOptions, ChangeBody, Context, FailPolicy, Payload, apply_patch,
    build_diff_backup, build_full_backup, detect_changes, list_rows, restore, verify,
};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    src: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("project");
        fs::create_dir_all(src.join("src/bin")).unwrap();
        fs::create_dir_all(src.join("docs")).unwrap();
        let files = [
            ("README.md", "# project\n"),
            ("src/lib.rs", "pub fn one() -> u32 {\n    1\n}\n"),
            ("src/bin/main.rs", "fn main() {}\n"),
            ("docs/guide.txt", "step 1\nstep 2\n"),
            ("docs/empty.txt", ""),
        ];
        for (name, body) in files {
            fs::write(src.join(name), body).unwrap();
        }
        Self { dir, src }
    }

    fn out(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn full(&self, ctx: &Context) -> PathBuf {
        build_full_backup(ctx, self.src.as_path(), &self.out("full"))
            .unwrap()
            .archive
            .unwrap()
    }
}

fn append(path: &Path, text: &str) {
    let mut body = fs::read_to_string(path).unwrap();
    body.push_str(text);
    fs::write(path, body).unwrap();
}

#[test]
fn full_backup_records_every_file() {
    let fx = Fixture::new();
    let out = build_full_backup(&Context::default(), fx.src.as_path(), &fx.out("full")).unwrap();
    assert!(out.is_complete());
    assert_eq!(out.stats.files, 5);

    let rows = list_rows(out.archive_path().unwrap()).unwrap();
    assert_eq!(rows.len(), 5);
    for row in &rows {
        assert!(Path::new(&row.display_path()).is_file(), "{}", row.display_path());
    }

    let name = out.archive_path().unwrap().file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with(&out.manifest_id));
    assert!(name.ends_with(".zip"));
    assert!(!name.contains(':'));
}

#[test]
fn entries_never_collide_with_manifest() {
    let fx = Fixture::new();
    fs::write(fx.src.join("meta.info"), "user file").unwrap();
    let archive = fx.full(&Context::default());
    let mut r = ArchiveReader::open(&archive).unwrap();
    assert_eq!(r.read_entry("project/meta.info").unwrap(), b"user file");
    assert!(r.read_manifest().is_ok());
}

#[test]
fn target_directory_is_created_and_skipped_when_inside_a_root() {
    let fx = Fixture::new();
    let target = fx.src.join("backups/nested");
    let out = build_full_backup(&Context::default(), fx.src.as_path(), &target).unwrap();
    assert!(target.is_dir());
    assert_eq!(out.stats.files, 5);
}

#[test]
fn nothing_changes_right_after_a_backup() {
    let fx = Fixture::new();
    let ctx = Context::default();
    let archive = fx.full(&ctx);
    let report = detect_changes(&ctx, &archive).unwrap();
    assert!(report.changes.is_empty());
    assert!(report.missing.is_empty());
    assert_eq!(report.unchanged.len(), 5);
}

#[test]
fn one_appended_file_is_one_change() {
    let fx = Fixture::new();
    let ctx = Context::default();
    let archive = fx.full(&ctx);
    let target = fx.src.join("docs/guide.txt");
    append(&target, "step 3\n");

    let report = detect_changes(&ctx, &archive).unwrap();
    let pairs = report.pairs();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, target.as_path());
    let rebuilt = apply_patch(pairs[0].1, "step 1\nstep 2\n").unwrap();
    assert_eq!(rebuilt, fs::read_to_string(&target).unwrap());
}

#[test]
fn k_modified_files_are_exactly_k_changes() {
    let fx = Fixture::new();
    let ctx = Context::new(BackupOptions {
        hash_threads: Some(3),
        ..Default::default()
    })
    .unwrap();
    let archive = fx.full(&ctx);

    let mut reader = ArchiveReader::open(&archive).unwrap();
    let edited = ["README.md", "docs/empty.txt", "src/lib.rs"];
    let mut before = Vec::new();
    for name in edited {
        let entry = format!("project/{name}");
        before.push(String::from_utf8(reader.read_entry(&entry).unwrap()).unwrap());
    }
    fs::write(fx.src.join("README.md"), "# renamed project\n").unwrap();
    append(&fx.src.join("src/lib.rs"), "pub fn two() -> u32 {\n    2\n}\n");
    fs::write(fx.src.join("docs/empty.txt"), "no longer empty").unwrap();

    let report = detect_changes(&ctx, &archive).unwrap();
    assert_eq!(report.changes.len(), 3);
    for (change, old) in report.changes.iter().zip(&before) {
        let ChangeBody::Patch(text) = &change.body else {
            panic!("expected a patch for {}", change.filename);
        };
        let now = fs::read_to_string(&change.original_path).unwrap();
        assert_eq!(apply_patch(text, old).unwrap(), now);
    }
    let names: Vec<_> = report.changes.iter().map(|c| c.filename.as_str()).collect();
    assert_eq!(names, ["README.md", "docs/empty.txt", "src/lib.rs"]);
}

#[test]
fn diff_backup_then_restore_round_trips() {
    let fx = Fixture::new();
    let ctx = Context::default();
    let base = fx.full(&ctx);
    append(&fx.src.join("src/bin/main.rs"), "// touched\n");
    fs::remove_file(fx.src.join("README.md")).unwrap();

    let out = build_diff_backup(&ctx, &base, None, &fx.out("diff")).unwrap();
    assert!(out.is_complete());
    let diff = out.archive.unwrap();
    assert!(verify(&ctx, &diff).unwrap().is_ok());
    assert!(verify(&ctx, &base).unwrap().is_ok());

    let dest = fx.out("restored");
    let restored = restore(&ctx, &base, Some(&diff), &dest).unwrap();
    assert!(restored.is_complete());
    assert_eq!(
        fs::read_to_string(dest.join("project/src/bin/main.rs")).unwrap(),
        "fn main() {}\n// touched\n"
    );
    // deleted files are restored from the base, the differential only carries changes
    assert_eq!(
        fs::read_to_string(dest.join("project/README.md")).unwrap(),
        "# project\n"
    );
}

#[test]
fn large_changes_are_stored_whole() {
    let fx = Fixture::new();
    let ctx = Context::new(BackupOptions {
        max_diff_bytes: 16,
        ..Default::default()
    })
    .unwrap();
    let base = fx.full(&ctx);
    append(&fx.src.join("src/lib.rs"), "// a comment long enough\n");

    let diff = build_diff_backup(&ctx, &base, None, &fx.out("diff"))
        .unwrap()
        .archive
        .unwrap();
    let rows = list_rows(&diff).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, Some(Payload::Full));

    let dest = fx.out("r");
    assert!(restore(&ctx, &base, Some(&diff), &dest).unwrap().is_complete());
    assert_eq!(
        fs::read(dest.join("project/src/lib.rs")).unwrap(),
        fs::read(fx.src.join("src/lib.rs")).unwrap()
    );
}

#[test]
fn exclusions_keep_files_out() {
    let fx = Fixture::new();
    let ctx = Context::new(BackupOptions {
        exclude: vec!["docs".into(), "*.md".into()],
        ..Default::default()
    })
    .unwrap();
    let out = build_full_backup(&ctx, fx.src.as_path(), &fx.out("full")).unwrap();
    assert_eq!(out.stats.files, 2);
    assert_eq!(out.stats.excluded, 2);
}

#[test]
fn bad_roots_fail_the_run_but_keep_the_archive() {
    let fx = Fixture::new();
    let roots = vec![fx.src.clone(), fx.out("does-not-exist")];
    let out = build_full_backup(&Context::default(), roots, &fx.out("full")).unwrap();
    assert!(!out.is_complete());
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.stats.files, 5);
    assert!(out.archive.unwrap().is_file());
}

#[test]
fn discard_policy_removes_partial_archives() {
    let fx = Fixture::new();
    let ctx = Context::new(BackupOptions {
        fail_policy: FailPolicy::DiscardOnAnyFailure,
        ..Default::default()
    })
    .unwrap();
    let roots = vec![fx.src.clone(), fx.out("does-not-exist")];
    let out = build_full_backup(&ctx, roots, &fx.out("full")).unwrap();
    assert!(out.archive.is_none());
    assert_eq!(fs::read_dir(fx.out("full")).unwrap().count(), 0);
}

#[test]
fn same_basename_roots_get_distinct_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a/data");
    let b = dir.path().join("b/data");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fs::write(a.join("f.txt"), "from a").unwrap();
    fs::write(b.join("f.txt"), "from b").unwrap();
    let ctx = Context::default();
    let out = build_full_backup(&ctx, vec![a.clone(), b.clone()], &dir.path().join("o")).unwrap();
    assert!(out.is_complete());
    assert_eq!(out.stats.files, 2);

    fs::write(b.join("f.txt"), "from b, edited").unwrap();
    let report = detect_changes(&ctx, out.archive_path().unwrap()).unwrap();
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].original_path, b.join("f.txt"));
}

#[test]
fn nested_roots_capture_each_file_once() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("home/me/docs")).unwrap();
    fs::create_dir_all(tree.join("other/docs")).unwrap();
    fs::write(tree.join("top.txt"), "top").unwrap();
    fs::write(tree.join("home/me/docs/f.txt"), "f").unwrap();
    fs::write(tree.join("other/docs/g.txt"), "g").unwrap();

    let ctx = Context::new(BackupOptions {
        fail_policy: FailPolicy::DiscardOnAnyFailure,
        ..Default::default()
    })
    .unwrap();
    let roots = vec![
        tree.clone(),
        tree.join("home/me/docs"),
        tree.join("other/docs"),
    ];
    let out = build_full_backup(&ctx, roots, &dir.path().join("o")).unwrap();
    assert!(out.is_complete(), "{:?}", out.failures);
    assert_eq!(out.stats.files, 3);
    let archive = out.archive.unwrap();

    let rows = list_rows(&archive).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| Path::new(&r.root) == tree));

    let dest = dir.path().join("restored");
    let restored = restore(&ctx, &archive, None, &dest).unwrap();
    assert!(restored.is_complete());
    assert_eq!(fs::read_to_string(dest.join("tree/home/me/docs/f.txt")).unwrap(), "f");
    assert_eq!(fs::read_to_string(dest.join("tree/other/docs/g.txt")).unwrap(), "g");
}

#[cfg(unix)]
#[test]
fn unconvertible_file_name_is_skipped_and_reported() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let fx = Fixture::new();
    let bad = fx.src.join(OsStr::from_bytes(b"bad\xff.txt"));
    fs::write(&bad, "latin-1 name").unwrap();

    let out = build_full_backup(&Context::default(), fx.src.as_path(), &fx.out("full")).unwrap();
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].path, bad);
    assert!(matches!(out.failures[0].error, BackupError::Conversion(_)));
    assert_eq!(out.stats.files, 5);

    let archive = out.archive.unwrap();
    assert!(archive.is_file());
    let rows = list_rows(&archive).unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().any(|r| r.filename.as_str() == "README.md"));
}

#[test]
fn non_archives_are_rejected_with_format_errors() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("notes.zip");
    fs::write(&bogus, "just some text").unwrap();
    let ctx = Context::default();
    assert!(matches!(detect_changes(&ctx, &bogus), Err(BackupError::Format(_))));
    assert!(matches!(list_rows(&bogus), Err(BackupError::Format(_))));
    assert!(matches!(
        build_diff_backup(&ctx, &bogus, None, dir.path()),
        Err(BackupError::Format(_))
    ));
}
