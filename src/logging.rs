// src/logging.rs

//! Logging configuration
//!
//! Two channels exist: structured `tracing` events, filtered by the debug
//! level (or `RUST_LOG`), and short human-readable notices on stderr such
//! as `added 5 events`, which `--quiet` suppresses. A [`LogConfig`] is
//! handed to each component when it is constructed.

use std::fmt::Display;
use tracing_subscriber::EnvFilter;

/// Debug level used when none is given
pub const DEFAULT_DEBUG_LEVEL: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// `<0` silent, 0 warnings, 1 info, 2 debug, 3+ trace
    pub level: i32,
    /// Suppress human-readable notices
    pub quiet: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_DEBUG_LEVEL,
            quiet: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: i32, quiet: bool) -> Self {
        Self { level, quiet }
    }

    /// `tracing` filter directive for the debug level
    pub fn filter_directive(&self) -> &'static str {
        match self.level {
            i32::MIN..=-1 => "off",
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Install the global tracing subscriber
    ///
    /// `RUST_LOG` takes precedence over the debug level. Calling this more
    /// than once is harmless.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter_directive()));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Print a one-line diagnostic for the operator unless quiet
    pub fn notice(&self, message: impl Display) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }
}
