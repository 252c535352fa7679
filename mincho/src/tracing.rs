//! Logging setup.
//!
//! Modules pull the macros in with `use crate::tracing::prelude::*`.

use std::env;

use ::tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::LocalTime},
    prelude::*,
};
use time::macros::format_description;

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Crate-specific filter variable, consulted before `RUST_LOG`.
const LOG_ENV: &str = "MINCHO_LOG";

const DEFAULT_FILTER: &str = "info";

const SYSLOG_IDENTIFIER: &str = "mincho";

fn env_filter() -> EnvFilter {
    env::var(LOG_ENV)
        .or_else(|_| env::var(EnvFilter::DEFAULT_ENV))
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Under systemd (`JOURNAL_STREAM` set) records go to the journal;
/// otherwise, or if the journal socket is unavailable, they are written to
/// stdout with a local wall-clock timestamp.
pub fn init() {
    let journald = env::var_os("JOURNAL_STREAM")
        .and_then(|_| tracing_journald::layer().ok())
        .map(|layer| layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string()));

    let stdout = journald.is_none().then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(LocalTime::new(format_description!(
                "[hour]:[minute]:[second]"
            )))
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(journald)
        .with(stdout)
        .init();
}
