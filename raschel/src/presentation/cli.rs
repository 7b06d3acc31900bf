use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogLevel;

#[derive(Parser)]
#[command(author, version, about = "raschel incremental backup CLI", long_about = None)]
pub struct Cli {
    /// JSON config file (vault_path, sources, exclude, fail_policy, ...)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log verbosity on stderr; RUST_LOG overrides it
    #[arg(long = "log-level", global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

/// Knobs shared by the commands that write archives.
#[derive(Args, Debug, Default)]
pub struct OptionArgs {
    /// Glob to skip (matched against the root-relative path and the file name)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Remove the output archive if any file fails
    #[arg(long)]
    pub discard_partial: bool,

    /// Hashing threads for change detection
    #[arg(long)]
    pub threads: Option<usize>,

    /// Files above this size are stored whole instead of patched
    #[arg(long)]
    pub max_diff_bytes: Option<u64>,

    /// Deflate level for new archives
    #[arg(long)]
    pub compression_level: Option<i64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Full backup of one or more source directories
    Backup {
        /// Target directory (defaults to vault_path from --config)
        #[arg(long, short = 't')]
        target: Option<PathBuf>,
        /// Source directories (default to sources from --config)
        sources: Vec<PathBuf>,
        #[command(flatten)]
        opts: OptionArgs,
    },

    /// Differential backup against a full archive
    Diff {
        base: PathBuf,
        /// Target directory (defaults to vault_path from --config)
        #[arg(long, short = 't')]
        target: Option<PathBuf>,
        /// Only check this recorded source root
        #[arg(long)]
        root: Option<PathBuf>,
        #[command(flatten)]
        opts: OptionArgs,
    },

    /// Print every recorded file of an archive
    List { archive: PathBuf },

    /// Extract a full archive, optionally replaying a differential one
    Restore {
        base: PathBuf,
        dest: PathBuf,
        #[arg(long)]
        diff: Option<PathBuf>,
    },

    /// Re-check stored bytes against the manifest
    Verify { archive: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn backup_parses_repeated_excludes() {
        let cli = Cli::try_parse_from([
            "raschel", "backup", "-t", "/out", "/a", "/b", "--exclude", "*.tmp", "--exclude",
            "target", "--log-level", "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Commands::Backup {
                target,
                sources,
                opts,
            } => {
                assert_eq!(target, Some(PathBuf::from("/out")));
                assert_eq!(sources.len(), 2);
                assert_eq!(opts.exclude, ["*.tmp", "target"]);
            }
            _ => panic!("expected backup"),
        }
    }

    #[test]
    fn lone_positional_is_a_source_not_the_target() {
        let cli = Cli::try_parse_from(["raschel", "backup", "/src"]).unwrap();
        match cli.command {
            Commands::Backup {
                target, sources, ..
            } => {
                assert_eq!(target, None);
                assert_eq!(sources, [PathBuf::from("/src")]);
            }
            _ => panic!("expected backup"),
        }
    }
}
