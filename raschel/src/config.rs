//! Optional JSON config file; command-line flags take precedence.

use std::path::{Path, PathBuf};

use raschel_core::error::{BackupError, Result};
use raschel_core::{BackupOptions, FailPolicy};
use serde::Deserialize;

use crate::presentation::cli::OptionArgs;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Directory new archives are written to.
    pub vault_path: Option<PathBuf>,
    pub sources: Vec<PathBuf>,
    pub exclude: Vec<String>,
    pub fail_policy: Option<FailPolicy>,
    pub max_diff_bytes: Option<u64>,
    pub hash_threads: Option<usize>,
    pub compression_level: Option<i64>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BackupError::read(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| BackupError::Options(format!("{}: {e}", path.display())))
    }

    pub fn load_opt(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Merge file values with flags; flags add exclusions and override scalars.
    pub fn options(&self, args: &OptionArgs) -> BackupOptions {
        let defaults = BackupOptions::default();
        let mut exclude = self.exclude.clone();
        exclude.extend(args.exclude.iter().cloned());
        let fail_policy = if args.discard_partial {
            FailPolicy::DiscardOnAnyFailure
        } else {
            self.fail_policy.unwrap_or(defaults.fail_policy)
        };
        BackupOptions {
            exclude,
            fail_policy,
            max_diff_bytes: args
                .max_diff_bytes
                .or(self.max_diff_bytes)
                .unwrap_or(defaults.max_diff_bytes),
            hash_threads: args.threads.or(self.hash_threads),
            compression_level: args
                .compression_level
                .or(self.compression_level)
                .or(defaults.compression_level),
        }
    }

    /// Explicit target first, then `vault_path`.
    pub fn target(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        explicit
            .or_else(|| self.vault_path.clone())
            .ok_or_else(|| BackupError::Options("no target directory given".into()))
    }
}
