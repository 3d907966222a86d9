//! Explicit run configuration.
//!
//! Everything a command needs beyond its own arguments (worker count, field
//! filter, progress mode) is collected once in `main` into a [`Settings`]
//! value and handed down. Nothing here is process-global.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use thiserror::Error;

use crate::coord::ProgressMode;
use crate::filter::FieldFilter;

/// Default worker count when neither `--threads` nor `INTELQ_THREADS` is set.
pub const DEFAULT_THREADS: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("thread count must be at least 1")]
    ZeroThreads,

    #[error("invalid thread count '{0}'")]
    InvalidThreads(String),
}

/// Validated worker count (always >= 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threads(NonZeroUsize);

impl Threads {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        NonZeroUsize::new(n).map(Self).ok_or(ConfigError::ZeroThreads)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self(NonZeroUsize::MIN.saturating_add(DEFAULT_THREADS - 1))
    }
}

impl FromStr for Threads {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = s
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidThreads(s.to_string()))?;
        Self::new(n)
    }
}

impl fmt::Display for Threads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Settings {
    pub threads: Threads,
    pub filter: FieldFilter,
    pub progress: ProgressMode,
    pub identifiers_only: bool,
}
