//! Logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber. `RUST_LOG` overrides the
//! configured level when set.

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Debug and above.
    Debug,
    /// Info and above.
    #[default]
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
    /// Nothing.
    Silent,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "chatsync_client=trace,chatsync_core=trace,warn",
            Self::Debug => "chatsync_client=debug,chatsync_core=debug,warn",
            Self::Info => "chatsync_client=info,chatsync_core=info,warn",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Silent => "off",
        }
    }
}

/// Install the global subscriber.
///
/// Returns false if a subscriber was already installed (by the host
/// application or an earlier call).
pub fn init(level: LogLevel) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}
