//! Logging initialization and configuration.
//!
//! Log lines go to stderr; stdout carries command output only.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither the config nor the environment sets one.
pub const DEFAULT_FILTER: &str = "shell_keeper=warn";

fn build_filter(level: Option<&str>) -> EnvFilter {
    match level {
        // A bare level applies to this crate only; anything else is a full directive.
        Some(level) if is_bare_level(level) => EnvFilter::new(format!("shell_keeper={level}")),
        Some(directive) => {
            EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        None => EnvFilter::new(DEFAULT_FILTER),
    }
}

fn is_bare_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "error" | "warn" | "info" | "debug" | "trace" | "off"
    )
}

/// Initialize the logging system.
///
/// `level` is either a bare level (`debug`) or a full `EnvFilter` directive.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init(level: Option<&str>) {
    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Err` if logging has already been initialized.
pub fn try_init(level: Option<&str>) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
}
