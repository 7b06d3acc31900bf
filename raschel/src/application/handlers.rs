use std::path::PathBuf;

use raschel_core::error::{BackupError, Result};
use raschel_core::{
    BackupOutcome, Context, build_diff_backup, build_full_backup, list, restore, verify,
};

use crate::application::Status;
use crate::config::CliConfig;
use crate::presentation::cli::OptionArgs;

fn report(outcome: &BackupOutcome) -> Status {
    if let Some(path) = outcome.archive_path() {
        println!("{}", path.display());
    }
    for f in &outcome.failures {
        eprintln!("failed: {}: {}", f.path.display(), f.error);
    }
    eprintln!(
        "{} files, {} failed, {} bytes (ratio {:.2})",
        outcome.stats.files,
        outcome.stats.failed,
        outcome.stats.archive_bytes,
        outcome.stats.compression_ratio()
    );
    if outcome.is_complete() {
        Status::Clean
    } else {
        Status::Partial
    }
}

pub fn handle_backup(
    config: &CliConfig,
    target: Option<PathBuf>,
    sources: Vec<PathBuf>,
    opts: &OptionArgs,
) -> Result<Status> {
    let target = config.target(target)?;
    let sources = if sources.is_empty() {
        config.sources.clone()
    } else {
        sources
    };
    if sources.is_empty() {
        return Err(BackupError::Options("no source directories given".into()));
    }
    let ctx = Context::new(config.options(opts))?;
    let outcome = build_full_backup(&ctx, sources, &target)?;
    Ok(report(&outcome))
}

pub fn handle_diff(
    config: &CliConfig,
    base: PathBuf,
    target: Option<PathBuf>,
    root: Option<PathBuf>,
    opts: &OptionArgs,
) -> Result<Status> {
    let target = config.target(target)?;
    let ctx = Context::new(config.options(opts))?;
    let outcome = build_diff_backup(&ctx, &base, root.as_deref(), &target)?;
    Ok(report(&outcome))
}

pub fn handle_list(archive: PathBuf) -> Result<Status> {
    list(&archive)?;
    Ok(Status::Clean)
}

pub fn handle_restore(
    config: &CliConfig,
    base: PathBuf,
    dest: PathBuf,
    diff: Option<PathBuf>,
) -> Result<Status> {
    let ctx = Context::new(config.options(&OptionArgs::default()))?;
    let outcome = restore(&ctx, &base, diff.as_deref(), &dest)?;
    for f in &outcome.failures {
        eprintln!("failed: {}: {}", f.path.display(), f.error);
    }
    println!(
        "restored {} files ({} from differential) into {}",
        outcome.restored,
        outcome.patched,
        dest.display()
    );
    Ok(if outcome.is_complete() {
        Status::Clean
    } else {
        Status::Partial
    })
}

pub fn handle_verify(config: &CliConfig, archive: PathBuf) -> Result<Status> {
    let ctx = Context::new(config.options(&OptionArgs::default()))?;
    let rep = verify(&ctx, &archive)?;
    for p in &rep.problems {
        eprintln!("problem: {}: {}", p.path.display(), p.error);
    }
    if rep.is_ok() {
        println!("verify: OK ({} records, {} patches)", rep.checked, rep.patches);
        Ok(Status::Clean)
    } else {
        Ok(Status::Partial)
    }
}
