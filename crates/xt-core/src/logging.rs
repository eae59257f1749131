//! Logging setup

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is
/// harmless; only the first subscriber is kept.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
