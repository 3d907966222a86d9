//! Utilities: logging setup and transfer progress accounting.
//!
//! Key items:
//!   init_logging / derive_level
//!   TransferProgress / TransferSnapshot

use std::time::{Duration, Instant};

/// Logging helpers.
pub mod logging {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    /// `-q` wins over `-v`. Without either flag only warnings and errors show.
    pub fn derive_level(verbose: u8, quiet: bool) -> LevelFilter {
        if quiet {
            return LevelFilter::ERROR;
        }
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Install the global subscriber. Logs go to stderr so stdout carries
    /// results only; `RUST_LOG`, when set, replaces the flag-derived level.
    pub fn init_logging(level: LevelFilter) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

        // A second init (tests) is harmless; keep the first subscriber.
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .try_init();
    }
}

pub use logging::{derive_level, init_logging};

/// Byte counter for an upload-like transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    total: u64,
    done: u64,
    started: Instant,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.done = self.done.saturating_add(bytes);
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            done: self.done,
            total: self.total,
            elapsed: self.started.elapsed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSnapshot {
    pub done: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl TransferSnapshot {
    /// Completed share in percent. An empty transfer counts as done.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.done as f64 / self.total as f64 * 100.0).min(100.0)
    }

    pub fn kib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.done as f64 / 1024.0 / secs
    }

    /// Progress line published to a worker slot.
    pub fn line(&self, label: &str) -> String {
        format!(
            "{label} {:4.1}% {:6.1} KiB/s",
            self.percent(),
            self.kib_per_sec()
        )
    }
}
