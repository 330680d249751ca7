//! Logging setup for camdeck.
//!
//! Everything logs through `tracing`. The binary installs one fmt subscriber
//! whose filter comes from `RUST_LOG` when set, and from the `-q`/`-v` flags
//! otherwise. Per-request spans from `tower-http` are only shown from `-v`
//! up; at the default level the HTTP layer reports warnings only.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`-q`).
    Quiet,
    /// Lifecycle events: listening, camera started and stopped.
    #[default]
    Normal,
    /// Commands, transitions and request spans (`-v`).
    Verbose,
    /// Every admission decision (`-vv`).
    Trace,
}

impl Verbosity {
    /// Resolve the command-line flags. `quiet` wins over any `-v`.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Level for camdeck's own events.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Level for the HTTP layer's request spans.
    fn http_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose | Self::Trace => Level::DEBUG,
        }
    }
}

/// Filter directives used when `RUST_LOG` is unset.
#[must_use]
pub fn default_filter(verbosity: Verbosity) -> String {
    format!(
        "camdeck={},tower_http={}",
        verbosity.level(),
        verbosity.http_level()
    )
}

/// Install the global subscriber. `RUST_LOG` overrides `verbosity`.
///
/// Calling it again is harmless; only the first call takes effect.
///
/// ```no_run
/// use camdeck::{init_logging, logging::Verbosity};
///
/// // `camdeck -v serve`
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Warnings and errors only, routed through the test harness's capture.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
