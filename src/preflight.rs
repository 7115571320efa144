//! Startup checks run before any command.

use std::process::Command;

use tracing::debug;

use crate::multiplexer::Dtach;
use crate::Result;

/// Printed when `dtach` is missing.
pub const DTACH_INSTALL_HINT: &str = "\
Install it:
  Ubuntu/Debian: sudo apt-get install dtach
  Fedora/RHEL:   sudo dnf install dtach
  macOS:         brew install dtach
  From source:   https://github.com/crigler/dtach";

/// Whether systemd keeps this user's processes after logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linger {
    Enabled,
    Disabled,
    /// Not Linux, no `loginctl`, or no answer.
    Unknown,
}

/// What the checks found.
#[derive(Debug)]
pub struct Preflight {
    pub dtach: Dtach,
    pub linger: Linger,
}

impl Preflight {
    /// Sessions are killed on logout when lingering is off.
    pub fn linger_warning(&self) -> Option<&'static str> {
        (self.linger == Linger::Disabled).then_some(
            "WARNING: Sessions may not survive logout!\nRun: loginctl enable-linger $USER",
        )
    }
}

/// Locate `dtach` (fatal when missing) and query lingering.
pub fn run() -> Result<Preflight> {
    let dtach = Dtach::locate()?;
    Ok(Preflight {
        dtach,
        linger: linger_status(),
    })
}

/// Ask `loginctl` whether lingering is enabled for `$USER`.
pub fn linger_status() -> Linger {
    if !cfg!(target_os = "linux") {
        return Linger::Unknown;
    }
    let Some(user) = std::env::var("USER").ok().filter(|u| !u.is_empty()) else {
        return Linger::Unknown;
    };

    match Command::new("loginctl")
        .args(["show-user", &user, "--property=Linger"])
        .output()
    {
        Ok(output) => parse_linger(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            debug!(error = %e, "loginctl unavailable, skipping linger check");
            Linger::Unknown
        }
    }
}

fn parse_linger(stdout: &str) -> Linger {
    match stdout.lines().find_map(|line| line.trim().strip_prefix("Linger=")) {
        Some("yes") => Linger::Enabled,
        Some("no") => Linger::Disabled,
        _ => Linger::Unknown,
    }
}
