//! Terminal emulator launching for restore and new windows.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::KeeperError;
use crate::Result;

/// A new terminal window to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub title: String,
    /// Profile the window should use. Left out when the profile backend
    /// is unavailable.
    pub profile_uuid: Option<String>,
    /// Command to run inside the window.
    pub argv: Vec<String>,
}

impl LaunchRequest {
    /// Window title used for a session.
    pub fn title_for(session: &str) -> String {
        format!("SK: {session}")
    }
}

/// Opens terminal windows without waiting for them.
pub trait TerminalLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<()>;
}

/// GNOME Terminal.
#[derive(Debug, Clone)]
pub struct GnomeTerminal {
    program: PathBuf,
}

impl Default for GnomeTerminal {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gnome-terminal"),
        }
    }
}

impl GnomeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(uuid) = &request.profile_uuid {
            args.push(format!("--profile={uuid}"));
        }
        args.push("--title".to_string());
        args.push(request.title.clone());
        args.push("--".to_string());
        args.extend(request.argv.iter().cloned());
        args
    }
}

impl TerminalLauncher for GnomeTerminal {
    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        let args = self.args(request);
        debug!(program = %self.program.display(), ?args, "launching terminal");

        // New process group so the window outlives this invocation.
        Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| KeeperError::Terminal(format!("{}: {}", self.program.display(), e)))?;
        Ok(())
    }
}
