//! CLI command dispatch and presentation.
//!
//! Everything user-facing is written to `out`; diagnostics go through
//! `tracing` to stderr.

use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::autostart;
use crate::cli::{self, Command, KillTarget, MetadataCommand, NewArgs, ProfilesCommand};
use crate::error::KeeperError;
use crate::keeper::{CreateRequest, Foreground, Keeper};
use crate::session::{MetadataSnapshot, SessionView};
use crate::Result;

/// Environment variable naming the session a shell runs in.
pub const SESSION_ENV: &str = "SHELLKEEPER_SESSION";

const DETACH_BANNER: &str = "*** DETACH WITH Ctrl+\\ (NOT Ctrl+C) ***";

/// Session this process runs inside, if any.
pub fn current_session() -> Option<String> {
    std::env::var(SESSION_ENV).ok().filter(|s| !s.is_empty())
}

/// Run one command. `None` attaches to the most recent session, or prints
/// help when there is none.
pub fn dispatch(command: Option<Command>, keeper: &mut Keeper, out: &mut dyn Write) -> Result<()> {
    let Some(command) = command else {
        return match keeper.last()? {
            Some(view) => {
                writeln!(
                    out,
                    "No command specified. Attaching to most recent session: {}",
                    view.name
                )?;
                attach(keeper, &view.name, out)
            }
            None => {
                write!(out, "{}", cli::help_text())?;
                Ok(())
            }
        };
    };

    match command {
        Command::New(args) => new(keeper, args, out),
        Command::Attach { name } => attach(keeper, &name, out),
        Command::List => list(keeper, out),
        Command::Kill(target) => kill(keeper, target, out),
        Command::Rename { old, new } => {
            keeper.rename(&old, &new)?;
            writeln!(out, "Session renamed: {old} -> {new}")?;
            Ok(())
        }
        Command::Clean => clean(keeper, out),
        Command::Last => match keeper.last()? {
            Some(view) => {
                writeln!(out, "Attaching to most recent session: {}", view.name)?;
                attach(keeper, &view.name, out)
            }
            None => {
                writeln!(out, "No active sessions found")?;
                Ok(())
            }
        },
        Command::Info { name } => {
            let name = name.or_else(current_session).ok_or(KeeperError::NotInSession)?;
            let view = keeper.info(&name)?;
            write_info(out, &view)
        }
        Command::Note { name, text } => {
            keeper.set_note(&name, text.as_deref())?;
            match text {
                Some(_) => writeln!(out, "Note set for '{name}'")?,
                None => writeln!(out, "Note cleared for '{name}'")?,
            }
            Ok(())
        }
        Command::Cleanup { days } => {
            let removed = keeper.cleanup_idle(days)?;
            if removed.is_empty() {
                writeln!(out, "No sessions idle for more than {days} day(s)")?;
            } else {
                writeln!(
                    out,
                    "Removed {} idle session(s): {}",
                    removed.len(),
                    removed.join(", ")
                )?;
            }
            Ok(())
        }
        Command::Restore { name: Some(name) } => {
            keeper.restore(&name)?;
            writeln!(out, "Restoring session: {name}")?;
            Ok(())
        }
        Command::Restore { name: None } => {
            match keeper.restore_latest()? {
                Some(name) => writeln!(out, "Restoring session: {name}")?,
                None => writeln!(out, "No sessions to restore")?,
            }
            Ok(())
        }
        Command::RestoreAll => {
            let restored = keeper.restore_all()?;
            if restored.is_empty() {
                writeln!(out, "No active sessions to restore")?;
            } else {
                for name in &restored {
                    writeln!(out, "Restoring session: {name}")?;
                }
                writeln!(out, "Done!")?;
            }
            Ok(())
        }
        Command::Terminal {
            profile,
            match_current,
        } => {
            let current = match_current.then(current_session).flatten();
            let opened = keeper.open_terminal(profile.as_deref(), current.as_deref())?;
            writeln!(out, "Opening terminal with session: {}", opened.name)?;
            if let Some(profile) = opened.profile_name {
                writeln!(out, "Profile: {profile}")?;
            }
            Ok(())
        }
        Command::Profiles(command) => profiles(keeper, command, out),
        Command::Metadata(command) => metadata(keeper, command, out),
        Command::SetupAutostart => {
            let path = autostart::install(&autostart::autostart_dir()?, &program_path())?;
            writeln!(out, "Created autostart entry: {}", path.display())?;
            writeln!(out, "Surviving sessions will be restored on login.")?;
            Ok(())
        }
    }
}

/// Absolute path of this executable, for commands run by other programs.
pub fn program_path() -> String {
    std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| "sk".to_string())
}

fn new(keeper: &mut Keeper, args: NewArgs, out: &mut dyn Write) -> Result<()> {
    let request = CreateRequest {
        name: args.name,
        profile: args.profile,
        template: args.template,
        working_dir: args.working_dir,
        command: args.command,
        match_session: args.match_current.then(current_session).flatten(),
    };
    let foreground = keeper.prepare_create(&request)?;
    foreground_banner(&foreground, out)?;
    keeper.run_foreground(&foreground)?;
    Ok(())
}

fn attach(keeper: &mut Keeper, name: &str, out: &mut dyn Write) -> Result<()> {
    let foreground = keeper.prepare_attach(name)?;
    foreground_banner(&foreground, out)?;
    keeper.run_foreground(&foreground)?;
    Ok(())
}

fn foreground_banner(foreground: &Foreground, out: &mut dyn Write) -> Result<()> {
    if foreground.is_create() {
        writeln!(out, "Creating session: {}", foreground.name())?;
        if let Some(profile) = foreground.profile_name() {
            writeln!(out, "Profile: {profile}")?;
        }
    } else {
        writeln!(out, "Attaching to session: {}", foreground.name())?;
    }
    writeln!(out, "{DETACH_BANNER}")?;
    // The multiplexer takes the terminal next.
    out.flush()?;
    Ok(())
}

fn list(keeper: &mut Keeper, out: &mut dyn Write) -> Result<()> {
    let sessions = keeper.list()?;
    if sessions.is_empty() {
        writeln!(out, "No active sessions")?;
        return Ok(());
    }

    writeln!(out, "Active sessions:")?;
    for view in &sessions {
        let profile = view
            .profile_name()
            .map(|p| format!(" [{p}]"))
            .unwrap_or_default();
        let note = view.note().map(|n| format!("  # {n}")).unwrap_or_default();
        writeln!(
            out,
            "  {:<30}{:<20} (last: {}){}",
            view.name,
            profile,
            format_time(view.modified),
            note
        )?;
    }
    Ok(())
}

fn kill(keeper: &mut Keeper, target: KillTarget, out: &mut dyn Write) -> Result<()> {
    let killed = match target {
        KillTarget::Name(name) => {
            keeper.kill(&name)?;
            writeln!(out, "Session '{name}' killed")?;
            return Ok(());
        }
        KillTarget::Pattern(pattern) => keeper.kill_matching(&pattern)?,
        KillTarget::All => keeper.kill_all()?,
    };

    if killed.is_empty() {
        writeln!(out, "No sessions killed")?;
    } else {
        writeln!(out, "Killed {} session(s): {}", killed.len(), killed.join(", "))?;
    }
    Ok(())
}

fn clean(keeper: &mut Keeper, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Cleaning up dead sessions...")?;
    let report = keeper.clean()?;
    if !report.reaped.is_empty() {
        writeln!(out, "Removed dead session(s): {}", report.reaped.join(", "))?;
    }
    if !report.orphaned.is_empty() {
        writeln!(out, "Removed orphaned metadata: {}", report.orphaned.join(", "))?;
    }
    writeln!(out, "Done.")?;
    Ok(())
}

fn write_info(out: &mut dyn Write, view: &SessionView) -> Result<()> {
    writeln!(out, "Session: {}", view.name)?;
    writeln!(out, "  Socket: {}", view.socket.display())?;
    writeln!(out, "  Status: {}", if view.alive { "alive" } else { "dead" })?;
    writeln!(out, "  Profile: {}", view.profile_name().unwrap_or("none"))?;
    writeln!(out, "  Profile UUID: {}", view.profile_uuid().unwrap_or("none"))?;
    writeln!(out, "  Created: {}", format_time(view.record.created))?;
    writeln!(out, "  Last attached: {}", format_time(view.record.last_attached))?;
    if let Some(note) = view.note() {
        writeln!(out, "  Note: {note}")?;
    }
    Ok(())
}

fn profiles(keeper: &Keeper, command: ProfilesCommand, out: &mut dyn Write) -> Result<()> {
    let profiles = keeper.profiles();
    if !profiles.is_available() {
        return Err(KeeperError::ProfilesUnavailable);
    }

    match command {
        ProfilesCommand::List => {
            let list = profiles.list();
            if list.is_empty() {
                writeln!(out, "No profiles found")?;
            } else {
                writeln!(out, "GNOME Terminal profiles:")?;
                for profile in list {
                    writeln!(out, "  {:<30} {}", profile.name, profile.uuid)?;
                }
            }
        }
        ProfilesCommand::Default => match profiles.default_profile() {
            Some(profile) => writeln!(out, "Default profile: {} ({})", profile.name, profile.uuid)?,
            None => writeln!(out, "Could not determine default profile")?,
        },
    }
    Ok(())
}

fn metadata(keeper: &mut Keeper, command: MetadataCommand, out: &mut dyn Write) -> Result<()> {
    match command {
        MetadataCommand::List => {
            let records = keeper.metadata();
            if records.is_empty() {
                writeln!(out, "No metadata stored")?;
                return Ok(());
            }
            writeln!(out, "Session metadata:")?;
            for (name, record) in records {
                writeln!(
                    out,
                    "  {}: profile={}, created={}",
                    name,
                    record.profile_name.as_deref().unwrap_or("none"),
                    format_time(record.created)
                )?;
            }
        }
        MetadataCommand::Clean => {
            let removed = keeper.clean_metadata()?;
            if removed.is_empty() {
                writeln!(out, "No orphaned metadata to clean")?;
            } else {
                writeln!(
                    out,
                    "Removed metadata for {} dead session(s): {}",
                    removed.len(),
                    removed.join(", ")
                )?;
            }
        }
        MetadataCommand::Export { output } => {
            let json = serde_json::to_string_pretty(&keeper.export_metadata())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json + "\n")?;
                    writeln!(out, "Exported metadata to {}", path.display())?;
                }
                None => writeln!(out, "{json}")?,
            }
        }
        MetadataCommand::Import { input, force } => {
            let snapshot = read_snapshot(&input)?;
            let report = keeper.import_metadata(snapshot, force)?;
            writeln!(
                out,
                "Imported {} session(s), skipped {} existing",
                report.imported, report.skipped
            )?;
        }
    }
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<MetadataSnapshot> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn format_time(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
