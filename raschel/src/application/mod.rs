pub mod handlers;

use crate::config::CliConfig;
use crate::presentation::cli::{Cli, Commands};
use raschel_core::error::Result;
use tracing::debug;

/// How a command that did not fail outright went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Clean,
    /// Some files failed or verification found problems.
    Partial,
}

pub fn run(cli: Cli) -> Result<Status> {
    let config = CliConfig::load_opt(cli.config.as_deref())?;
    if let Some(path) = &cli.config {
        debug!(config = %path.display(), "configuration loaded");
    }
    match cli.command {
        Commands::Backup {
            target,
            sources,
            opts,
        } => handlers::handle_backup(&config, target, sources, &opts),
        Commands::Diff {
            base,
            target,
            root,
            opts,
        } => handlers::handle_diff(&config, base, target, root, &opts),
        Commands::List { archive } => handlers::handle_list(archive),
        Commands::Restore { base, dest, diff } => handlers::handle_restore(&config, base, dest, diff),
        Commands::Verify { archive } => handlers::handle_verify(&config, archive),
    }
}
