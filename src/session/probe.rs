//! Socket handle liveness probing.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::runtime::{Builder, Runtime};

/// Default bound on a single connection attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of probing one socket handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// A listener accepted the connection.
    Alive,
    /// The handle is missing, is not a socket, or refused the connection.
    Dead,
    /// The probe could not tell (permission denied, full backlog, timeout).
    ProbeError(String),
}

impl Liveness {
    /// Only a successful connect counts as alive.
    ///
    /// Callers treat [`Liveness::ProbeError`] like [`Liveness::Dead`] so a
    /// session that cannot be confirmed is reaped rather than kept stale.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// Point-in-time liveness probe for socket handles.
///
/// Holds a current-thread runtime so that each connection attempt is
/// non-blocking and bounded by a timeout. There is no retry.
pub struct Prober {
    runtime: Runtime,
    timeout: Duration,
}

impl Prober {
    pub fn new() -> io::Result<Self> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_io().enable_time().build()?;
        Ok(Self { runtime, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe the handle at `path`.
    pub fn probe(&self, path: &Path) -> Liveness {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {}
            Ok(_) => return Liveness::Dead,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Liveness::Dead,
            Err(e) => return Liveness::ProbeError(e.to_string()),
        }

        let attempt = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, UnixStream::connect(path)).await });

        match attempt {
            Ok(Ok(_stream)) => Liveness::Alive,
            Ok(Err(e)) => classify_connect_error(&e),
            Err(_) => Liveness::ProbeError(format!("no answer within {:?}", self.timeout)),
        }
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn classify_connect_error(e: &io::Error) -> Liveness {
    match e.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => Liveness::Dead,
        _ => Liveness::ProbeError(e.to_string()),
    }
}
