//! Login autostart entry that restores surviving sessions.

use std::path::{Path, PathBuf};

use crate::error::KeeperError;
use crate::Result;

/// File name of the desktop entry.
pub const DESKTOP_FILE: &str = "shellkeeper.desktop";

/// `~/.config/autostart`.
pub fn autostart_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("autostart"))
        .ok_or(KeeperError::HomeDirUnavailable)
}

/// Desktop entry running `<program> restore-all` at login.
pub fn desktop_entry(program: &str) -> String {
    let exec = if program.contains(char::is_whitespace) {
        format!("\"{program}\"")
    } else {
        program.to_string()
    };
    format!(
        "[Desktop Entry]
Type=Application
Name=ShellKeeper Session Restore
Comment=Reopen surviving ShellKeeper sessions on login
Exec={exec} restore-all
Hidden=false
NoDisplay=false
X-GNOME-Autostart-enabled=true
"
    )
}

/// Write the desktop entry into `dir`, creating it. Returns the file path.
pub fn install(dir: &Path, program: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(DESKTOP_FILE);
    std::fs::write(&path, desktop_entry(program))?;
    Ok(path)
}
