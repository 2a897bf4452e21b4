//! Knobs of an [`autotune`](crate::autotune) run.

use crate::error::{Result, TuneError};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "einforge.db";
pub const DEFAULT_LONG_DIM_LENGTH: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuneOptions {
    /// SQLite database holding the result cache.
    pub db_path: PathBuf,
    /// Extent substituted for unbounded indices when sizing problems.
    pub long_dim_length: u64,
    /// Cap on the number of trials; `None` runs until the backend gives up.
    pub stop_after: Option<usize>,
    /// Directory of bundled transform spaces. Modules inside it are cached
    /// under their file name rather than their full path.
    pub impls_dir: Option<PathBuf>,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            long_dim_length: DEFAULT_LONG_DIM_LENGTH,
            stop_after: None,
            impls_dir: None,
        }
    }
}

impl TuneOptions {
    /// Defaults overridden by `EINFORGE_DB`, `EINFORGE_LONG_DIM_LENGTH`,
    /// `EINFORGE_STOP_AFTER` and `EINFORGE_IMPLS_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(path) = lookup("EINFORGE_DB") {
            options.db_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("EINFORGE_LONG_DIM_LENGTH") {
            options.long_dim_length = parse_number("EINFORGE_LONG_DIM_LENGTH", &raw)?;
        }
        if let Some(raw) = lookup("EINFORGE_STOP_AFTER") {
            options.stop_after = Some(parse_number("EINFORGE_STOP_AFTER", &raw)?);
        }
        if let Some(dir) = lookup("EINFORGE_IMPLS_DIR") {
            options.impls_dir = Some(PathBuf::from(dir));
        }
        Ok(options)
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_long_dim_length(mut self, long_dim_length: u64) -> Self {
        self.long_dim_length = long_dim_length;
        self
    }

    pub fn with_stop_after(mut self, stop_after: usize) -> Self {
        self.stop_after = Some(stop_after);
        self
    }

    pub fn with_impls_dir(mut self, impls_dir: impl Into<PathBuf>) -> Self {
        self.impls_dir = Some(impls_dir.into());
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| TuneError::Validation(format!("{key} must be a non-negative integer, got '{raw}'")))
}
