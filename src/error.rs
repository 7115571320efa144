//! Error types for shell-keeper.

use thiserror::Error;

/// Main error type for shell-keeper operations.
#[derive(Error, Debug)]
pub enum KeeperError {
    /// No socket handle exists for the session.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// A socket handle already exists under the requested name.
    #[error("session '{0}' already exists")]
    SessionExists(String),

    /// The session has a handle but no metadata record.
    #[error("no metadata for session '{0}'")]
    NoMetadata(String),

    /// The handle exists but nothing listens on it any more. The handle and
    /// its metadata have already been reclaimed when this is returned.
    #[error("session '{0}' is dead")]
    DeadSession(String),

    /// The session name cannot be used as a socket handle name.
    #[error("invalid session name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A kill pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The requested session template is not configured.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// No session was named and the caller is not inside one.
    #[error("no session specified and not in a session")]
    NotInSession,

    /// The dtach binary could not be found on PATH.
    #[error("dtach is not installed")]
    MultiplexerMissing,

    /// The multiplexer could not be started.
    #[error("multiplexer error: {0}")]
    Multiplexer(String),

    /// The terminal emulator could not be launched.
    #[error("terminal launch failed: {0}")]
    Terminal(String),

    /// The terminal profile backend cannot be queried.
    #[error("GNOME Terminal profiles not available")]
    ProfilesUnavailable,

    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// The home directory could not be determined.
    #[error("could not determine home directory")]
    HomeDirUnavailable,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KeeperError {
    /// Whether the error means "there is no usable session by that name".
    ///
    /// Dead sessions are reclaimed on detection, so they report the same
    /// way as sessions that never existed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::DeadSession(_))
    }
}

/// Convenience Result type for shell-keeper operations.
pub type Result<T> = std::result::Result<T, KeeperError>;
