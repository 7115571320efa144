//! Terminal multiplexer adapter.
//!
//! The multiplexer owns the socket handle: it creates it when a session
//! starts, listens on it while the session lives, and attaches terminals
//! to it. Both operations run in the foreground and return when the user
//! detaches or the session ends.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::KeeperError;
use crate::Result;

/// Detach key handed to dtach. Kept distinct from Ctrl+C so interrupting
/// a program inside the session never detaches by accident.
pub const DETACH_KEY: &str = "^\\";

/// What to start inside a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub socket: PathBuf,
    /// Program and arguments of the inner shell.
    pub command: Vec<String>,
    /// Extra environment for the inner shell.
    pub env: Vec<(String, String)>,
}

/// A multiplexer that can create and attach sessions by socket handle.
pub trait Multiplexer {
    /// Create the session and stay attached to it until detach or exit.
    ///
    /// Returns the foreground process's exit code when it has one.
    fn create(&self, spec: &CreateSpec) -> Result<Option<i32>>;

    /// Attach to the session at `socket` until detach or exit.
    fn attach(&self, socket: &Path, env: &[(String, String)]) -> Result<Option<i32>>;
}

/// `dtach` invoked as a child process.
#[derive(Debug, Clone)]
pub struct Dtach {
    program: PathBuf,
}

impl Dtach {
    /// Locate `dtach` on `PATH`.
    pub fn locate() -> Result<Self> {
        which::which("dtach")
            .map(Self::with_program)
            .map_err(|_| KeeperError::MultiplexerMissing)
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn is_available() -> bool {
        which::which("dtach").is_ok()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list for `dtach -c`.
    pub fn create_args(spec: &CreateSpec) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            spec.socket.display().to_string(),
            "-e".to_string(),
            DETACH_KEY.to_string(),
            "-r".to_string(),
            "winch".to_string(),
        ];
        args.extend(spec.command.iter().cloned());
        args
    }

    /// Full argument list for `dtach -a`.
    pub fn attach_args(socket: &Path) -> Vec<String> {
        vec![
            "-a".to_string(),
            socket.display().to_string(),
            "-e".to_string(),
            DETACH_KEY.to_string(),
            "-r".to_string(),
            "winch".to_string(),
        ]
    }

    fn run(&self, args: &[String], env: &[(String, String)]) -> Result<Option<i32>> {
        debug!(program = %self.program.display(), ?args, "running multiplexer");
        let status = Command::new(&self.program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()
            .map_err(|e| KeeperError::Multiplexer(format!("{}: {}", self.program.display(), e)))?;
        debug!(%status, "multiplexer exited");
        Ok(status.code())
    }
}

impl Multiplexer for Dtach {
    fn create(&self, spec: &CreateSpec) -> Result<Option<i32>> {
        self.run(&Self::create_args(spec), &spec.env)
    }

    fn attach(&self, socket: &Path, env: &[(String, String)]) -> Result<Option<i32>> {
        self.run(&Self::attach_args(socket), env)
    }
}
