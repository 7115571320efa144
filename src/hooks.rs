//! User hooks run on session lifecycle events.

use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::config::HooksSection;

/// Lifecycle event a hook can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// Record written, multiplexer not yet started.
    Create,
    /// About to attach.
    Attach,
    /// Foreground multiplexer returned.
    Detach,
}

impl HookEvent {
    /// Config key and `SK_HOOK` value for this event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "on_create",
            Self::Attach => "on_attach",
            Self::Detach => "on_detach",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs configured hooks without waiting for them.
///
/// A hook receives `SK_SESSION` and `SK_HOOK` in its environment. Hooks
/// that are unset, missing or not executable are skipped; a hook can never
/// fail the operation that fired it. Each started hook is reaped by a
/// detached thread so none lingers as a zombie while the session runs in
/// the foreground.
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    hooks: HooksSection,
}

impl HookRunner {
    pub fn new(hooks: HooksSection) -> Self {
        Self { hooks }
    }

    /// Fire `event` for `session`. Returns the pid of the started hook.
    pub fn fire(&self, event: HookEvent, session: &str) -> Option<u32> {
        let path = self.hooks.path_for(event)?;
        if !is_executable(path) {
            debug!(hook = %event, path = %path.display(), "hook missing or not executable, skipped");
            return None;
        }

        let spawned = Command::new(path)
            .env("SK_SESSION", session)
            .env("SK_HOOK", event.as_str())
            .stdin(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                let pid = child.id();
                debug!(hook = %event, session, pid, "hook started");
                let reaper = std::thread::Builder::new()
                    .name(format!("hook-{pid}"))
                    .spawn(move || match child.wait() {
                        Ok(status) => debug!(pid, %status, "hook finished"),
                        Err(e) => warn!(pid, error = %e, "failed to wait for hook"),
                    });
                if let Err(e) = reaper {
                    warn!(pid, error = %e, "failed to start hook reaper");
                }
                Some(pid)
            }
            Err(e) => {
                warn!(hook = %event, session, error = %e, "failed to start hook");
                None
            }
        }
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
