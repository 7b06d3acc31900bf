//! Per-run state handed to every operation: options plus the run's log span.

use tracing::Span;
use uuid::Uuid;

use crate::error::{BackupError, Result};
use crate::options::BackupOptions;
use crate::pack::walker::Exclusions;

pub struct Context {
    options: BackupOptions,
    exclusions: Exclusions,
    span: Span,
}

impl Context {
    pub fn new(options: BackupOptions) -> Result<Self> {
        options.validate()?;
        let exclusions = Exclusions::compile(&options.exclude)?;
        let span = tracing::info_span!("raschel", run = %Uuid::new_v4());
        Ok(Self {
            options,
            exclusions,
            span,
        })
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `f` on the configured hashing pool (rayon's global pool when unset).
    pub fn install<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self.options.hash_threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("raschel-hash-{i}"))
                    .build()
                    .map_err(|e| BackupError::Options(format!("hash pool: {e}")))?;
                Ok(pool.install(f))
            }
            None => Ok(f()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self {
            options: BackupOptions::default(),
            exclusions: Exclusions::default(),
            span: tracing::info_span!("raschel", run = %Uuid::new_v4()),
        }
    }
}
