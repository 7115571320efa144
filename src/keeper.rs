//! Session lifecycle operations.
//!
//! [`Keeper`] is built once per invocation and owns the configuration, the
//! registry (and through it the metadata store) and every external
//! collaborator. All lifecycle operations go through it.
//!
//! Create and attach are split in two phases. `prepare_*` validates, writes
//! metadata and fires the entry hook; [`Keeper::run_foreground`] then hands
//! the terminal to the multiplexer and blocks until the user detaches.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::{Config, SessionTemplate};
use crate::error::KeeperError;
use crate::hooks::{HookEvent, HookRunner};
use crate::multiplexer::{CreateSpec, Multiplexer};
use crate::paths::KeeperPaths;
use crate::profiles::{GSettingsProfiles, ProfileLookup};
use crate::session::{
    GlobPattern, ImportReport, MetadataSnapshot, MetadataStore, NameTemplate, Prober, Registry,
    SessionName, SessionRecord, SessionView, SortOrder,
};
use crate::terminal::{GnomeTerminal, LaunchRequest, TerminalLauncher};
use crate::Result;

/// Pause between windows opened by [`Keeper::restore_all`].
pub const RESTORE_STAGGER: Duration = Duration::from_millis(500);

/// Inputs of [`Keeper::prepare_create`]. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// Session name; generated from `session_name_format` when absent.
    pub name: Option<String>,
    /// Profile name or UUID.
    pub profile: Option<String>,
    /// Name of a configured template supplying defaults.
    pub template: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// Command run before the interactive shell takes over.
    pub command: Option<String>,
    /// Session whose profile is reused when no profile is given.
    pub match_session: Option<String>,
}

/// Profile identity after resolution. Either half may stay unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub name: Option<String>,
    pub uuid: Option<String>,
}

/// A create or attach that is ready to take over the terminal.
#[derive(Debug)]
pub struct Foreground {
    name: SessionName,
    profile_name: Option<String>,
    action: ForegroundAction,
}

#[derive(Debug)]
enum ForegroundAction {
    Create(CreateSpec),
    Attach {
        socket: PathBuf,
        env: Vec<(String, String)>,
    },
}

impl Foreground {
    pub fn name(&self) -> &SessionName {
        &self.name
    }

    pub fn profile_name(&self) -> Option<&str> {
        self.profile_name.as_deref()
    }

    /// Whether this starts a new session rather than attaching.
    pub fn is_create(&self) -> bool {
        matches!(self.action, ForegroundAction::Create(_))
    }
}

/// Outcome of [`Keeper::clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Dead sessions whose handle and record were removed.
    pub reaped: Vec<String>,
    /// Records dropped because no handle backs them.
    pub orphaned: Vec<String>,
}

/// A session opened in a new terminal window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSession {
    pub name: SessionName,
    pub profile_name: Option<String>,
}

/// Per-invocation context for session lifecycle operations.
pub struct Keeper {
    config: Config,
    registry: Registry,
    multiplexer: Box<dyn Multiplexer>,
    profiles: Box<dyn ProfileLookup>,
    launcher: Box<dyn TerminalLauncher>,
    hooks: HookRunner,
    /// Program launched windows run, normally this executable.
    program: String,
    restore_stagger: Duration,
}

impl Keeper {
    /// Build a keeper with the GNOME profile backend and terminal.
    pub fn new(config: Config, registry: Registry, multiplexer: Box<dyn Multiplexer>) -> Self {
        let hooks = HookRunner::new(config.hooks.clone());
        Self {
            config,
            registry,
            multiplexer,
            profiles: Box::new(GSettingsProfiles::new()),
            launcher: Box::new(GnomeTerminal::new()),
            hooks,
            program: "sk".to_string(),
            restore_stagger: RESTORE_STAGGER,
        }
    }

    /// Open the store and registry at their configured locations.
    pub fn open(config: Config, paths: &KeeperPaths, multiplexer: Box<dyn Multiplexer>) -> Result<Self> {
        let store = MetadataStore::open(paths.metadata_file());
        let registry = Registry::new(config.socket_dir(paths), store, Prober::new()?)?;
        Ok(Self::new(config, registry, multiplexer))
    }

    pub fn with_profiles(mut self, profiles: impl ProfileLookup + 'static) -> Self {
        self.profiles = Box::new(profiles);
        self
    }

    pub fn with_launcher(mut self, launcher: impl TerminalLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_restore_stagger(mut self, stagger: Duration) -> Self {
        self.restore_stagger = stagger;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn profiles(&self) -> &dyn ProfileLookup {
        self.profiles.as_ref()
    }

    /// Validate a new session and write its record.
    ///
    /// Fails with [`KeeperError::SessionExists`] before touching metadata
    /// when the handle already exists. Fires `on_create`.
    pub fn prepare_create(&mut self, request: &CreateRequest) -> Result<Foreground> {
        let template = self.template(request.template.as_deref())?;
        let profile = self.resolve_profile(
            request.profile.as_deref().or(template.profile.as_deref()),
            request.match_session.as_deref(),
        );

        let name = match request.name.as_deref() {
            Some(name) => SessionName::new(name)?,
            None => NameTemplate::new(self.config.session_name_format.as_str())
                .generate(profile.name.as_deref())?,
        };

        if self.registry.handle_exists(&name) {
            return Err(KeeperError::SessionExists(name.into_string()));
        }

        self.registry.store_mut().set(
            name.as_str(),
            profile.name.as_deref(),
            profile.uuid.as_deref(),
        )?;
        info!(session = %name, profile = ?profile.name, "creating session");
        self.hooks.fire(HookEvent::Create, name.as_str());

        let socket = self.registry.socket_path(&name);
        let working_dir = request.working_dir.clone().or(template.working_dir);
        let startup = request.command.as_deref().or(template.command.as_deref());
        let spec = CreateSpec {
            command: shell_command(&self.config.default_shell, working_dir.as_deref(), startup),
            env: self.session_env(&name, &socket, &profile),
            socket,
        };

        Ok(Foreground {
            name,
            profile_name: profile.name,
            action: ForegroundAction::Create(spec),
        })
    }

    /// Validate an attach and refresh `last_attached`. Fires `on_attach`.
    ///
    /// A dead session is reclaimed and reported as
    /// [`KeeperError::DeadSession`].
    pub fn prepare_attach(&mut self, name: &str) -> Result<Foreground> {
        let name = SessionName::new(name)?;
        self.require_alive(&name)?;

        self.registry.store_mut().set(name.as_str(), None, None)?;
        let profile_name = self.registry.store().get(name.as_str()).profile_name;
        info!(session = %name, "attaching to session");
        self.hooks.fire(HookEvent::Attach, name.as_str());

        let socket = self.registry.socket_path(&name);
        let env = vec![
            ("SHELLKEEPER_SESSION".to_string(), name.to_string()),
            ("SHELLKEEPER_SOCKET".to_string(), socket.display().to_string()),
        ];
        Ok(Foreground {
            name,
            profile_name,
            action: ForegroundAction::Attach { socket, env },
        })
    }

    /// Hand the terminal to the multiplexer until detach or exit.
    ///
    /// `on_detach` fires however the multiplexer returned. A create whose
    /// multiplexer exits non-zero while a handle sits under the name lost
    /// a race for it and reports [`KeeperError::SessionExists`].
    pub fn run_foreground(&self, foreground: &Foreground) -> Result<Option<i32>> {
        let outcome = match &foreground.action {
            ForegroundAction::Create(spec) => self.multiplexer.create(spec),
            ForegroundAction::Attach { socket, env } => self.multiplexer.attach(socket, env),
        };
        debug!(session = %foreground.name, ?outcome, "foreground returned");
        self.hooks.fire(HookEvent::Detach, foreground.name.as_str());

        let status = outcome?;
        match status {
            Some(code) if code != 0 && foreground.is_create() => {
                if self.registry.handle_exists(&foreground.name) {
                    Err(KeeperError::SessionExists(foreground.name.to_string()))
                } else {
                    Err(KeeperError::Multiplexer(format!("dtach exited with status {code}")))
                }
            }
            _ => Ok(status),
        }
    }

    /// [`Keeper::prepare_create`] followed by [`Keeper::run_foreground`].
    pub fn create(&mut self, request: &CreateRequest) -> Result<SessionName> {
        let foreground = self.prepare_create(request)?;
        self.run_foreground(&foreground)?;
        Ok(foreground.name)
    }

    /// [`Keeper::prepare_attach`] followed by [`Keeper::run_foreground`].
    pub fn attach(&mut self, name: &str) -> Result<()> {
        let foreground = self.prepare_attach(name)?;
        self.run_foreground(&foreground)?;
        Ok(())
    }

    /// Remove a session's handle and record. Dead sessions can be killed.
    pub fn kill(&mut self, name: &str) -> Result<()> {
        let name = SessionName::new(name)?;
        if !self.registry.handle_exists(&name) {
            return Err(KeeperError::SessionNotFound(name.into_string()));
        }
        self.registry.reclaim(&name)?;
        info!(session = %name, "session killed");
        Ok(())
    }

    /// Kill every live session whose name matches the glob `pattern`.
    ///
    /// Returns the names actually killed.
    pub fn kill_matching(&mut self, pattern: &str) -> Result<Vec<String>> {
        let glob = GlobPattern::new(pattern)?;
        let targets = self
            .list()?
            .into_iter()
            .map(|view| view.name)
            .filter(|name| glob.matches(name))
            .collect();
        Ok(self.kill_each(targets))
    }

    /// Kill every live session. Returns the names actually killed.
    pub fn kill_all(&mut self) -> Result<Vec<String>> {
        let targets = self.list()?.into_iter().map(|view| view.name).collect();
        Ok(self.kill_each(targets))
    }

    fn kill_each(&mut self, targets: Vec<String>) -> Vec<String> {
        let mut killed = Vec::with_capacity(targets.len());
        for name in targets {
            match self.kill(&name) {
                Ok(()) => killed.push(name),
                Err(e) => warn!(session = %name, error = %e, "failed to kill session"),
            }
        }
        killed
    }

    /// Rename a session's handle, then move its record.
    ///
    /// Every field is kept and `last_attached` is refreshed. When `new`
    /// already exists nothing changes.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let old = SessionName::new(old)?;
        let new = SessionName::new(new)?;
        if !self.registry.handle_exists(&old) {
            return Err(KeeperError::SessionNotFound(old.into_string()));
        }
        if self.registry.handle_exists(&new) {
            return Err(KeeperError::SessionExists(new.into_string()));
        }

        match move_handle(&self.registry.socket_path(&old), &self.registry.socket_path(&new)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(KeeperError::SessionExists(new.into_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let store = self.registry.store_mut();
        if let Some(mut record) = store.remove(old.as_str())? {
            record.last_attached = Some(now());
            store.insert(new.as_str(), record)?;
        }
        info!(from = %old, to = %new, "session renamed");
        Ok(())
    }

    /// Kill sessions idle for more than `max_idle_days`.
    pub fn cleanup_idle(&mut self, max_idle_days: i64) -> Result<Vec<String>> {
        self.cleanup_idle_at(max_idle_days, now())
    }

    /// [`Keeper::cleanup_idle`] against an explicit clock reading.
    ///
    /// A session is idle when its `last_attached` is strictly before
    /// `now - max_idle_days`. Sessions never attached are left alone.
    pub fn cleanup_idle_at(&mut self, max_idle_days: i64, now: NaiveDateTime) -> Result<Vec<String>> {
        let cutoff = match chrono::Duration::try_days(max_idle_days)
            .and_then(|days| now.checked_sub_signed(days))
        {
            Some(cutoff) => cutoff,
            None if max_idle_days > 0 => return Ok(Vec::new()),
            None => NaiveDateTime::MAX,
        };

        let targets = self
            .registry
            .enumerate(false, SortOrder::LastAttached)?
            .into_iter()
            .filter(|view| view.record.last_attached.is_some_and(|t| t < cutoff))
            .map(|view| view.name)
            .collect();
        Ok(self.kill_each(targets))
    }

    /// Reap dead handles, then drop records with no handle behind them.
    pub fn clean(&mut self) -> Result<CleanReport> {
        let scan = self.registry.scan()?;

        let mut report = CleanReport::default();
        for name in scan.dead {
            match self.registry.reclaim(&name) {
                Ok(()) => report.reaped.push(name.into_string()),
                Err(e) => warn!(session = %name, error = %e, "failed to remove dead session"),
            }
        }

        let active: HashSet<String> = scan.alive.into_iter().map(|view| view.name).collect();
        report.orphaned = self.registry.store_mut().clean(&active)?;
        Ok(report)
    }

    /// Live sessions, most recently active first. Dead ones are reaped.
    pub fn list(&mut self) -> Result<Vec<SessionView>> {
        self.registry.enumerate(true, SortOrder::Activity)
    }

    /// The most recently active live session.
    pub fn last(&mut self) -> Result<Option<SessionView>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Details of one session, dead or alive. Changes nothing on disk.
    pub fn info(&self, name: &str) -> Result<SessionView> {
        let name = SessionName::new(name)?;
        self.registry.view(&name)
    }

    /// Set or clear the note of an existing session.
    ///
    /// A session without a record, such as one started by running `dtach`
    /// directly, fails with [`KeeperError::NoMetadata`].
    pub fn set_note(&mut self, name: &str, note: Option<&str>) -> Result<()> {
        let name = SessionName::new(name)?;
        if !self.registry.handle_exists(&name) {
            return Err(KeeperError::SessionNotFound(name.into_string()));
        }

        if !self.registry.store_mut().set_note(name.as_str(), note)? {
            return Err(KeeperError::NoMetadata(name.into_string()));
        }
        Ok(())
    }

    /// Open a terminal window attached to `name`, with its profile.
    pub fn restore(&mut self, name: &str) -> Result<()> {
        let name = SessionName::new(name)?;
        self.require_alive(&name)?;

        let record = self.registry.store().get(name.as_str());
        let argv = vec![self.program.clone(), "attach".to_string(), name.to_string()];
        self.launch_window(&name, record.profile_uuid, argv)?;
        info!(session = %name, "session restored");
        Ok(())
    }

    /// Restore the most recently active session, if any.
    pub fn restore_latest(&mut self) -> Result<Option<String>> {
        let Some(view) = self.last()? else {
            return Ok(None);
        };
        self.restore(&view.name)?;
        Ok(Some(view.name))
    }

    /// Restore every live session, pausing between windows.
    ///
    /// Returns the names restored; single failures are logged and skipped.
    pub fn restore_all(&mut self) -> Result<Vec<String>> {
        let sessions = self.list()?;
        let mut restored = Vec::with_capacity(sessions.len());
        for (i, view) in sessions.into_iter().enumerate() {
            if i > 0 && !self.restore_stagger.is_zero() {
                std::thread::sleep(self.restore_stagger);
            }
            match self.restore(&view.name) {
                Ok(()) => restored.push(view.name),
                Err(e) => warn!(session = %view.name, error = %e, "failed to restore session"),
            }
        }
        Ok(restored)
    }

    /// Open a new window running a new session.
    ///
    /// The record is written first so the window's `sk new` finds the
    /// profile already in place.
    pub fn open_terminal(
        &mut self,
        profile: Option<&str>,
        match_session: Option<&str>,
    ) -> Result<TerminalSession> {
        let profile = self.resolve_profile(profile, match_session);
        let name = NameTemplate::new(self.config.session_name_format.as_str())
            .generate(profile.name.as_deref())?;
        if self.registry.handle_exists(&name) {
            return Err(KeeperError::SessionExists(name.into_string()));
        }

        self.registry.store_mut().set(
            name.as_str(),
            profile.name.as_deref(),
            profile.uuid.as_deref(),
        )?;

        let mut argv = vec![self.program.clone(), "new".to_string(), name.to_string()];
        if let Some(ident) = profile.name.as_ref().or(profile.uuid.as_ref()) {
            argv.push("--profile".to_string());
            argv.push(ident.clone());
        }
        self.launch_window(&name, profile.uuid, argv)?;

        Ok(TerminalSession {
            name,
            profile_name: profile.name,
        })
    }

    fn launch_window(
        &self,
        name: &SessionName,
        profile_uuid: Option<String>,
        argv: Vec<String>,
    ) -> Result<()> {
        let profile_uuid = profile_uuid.filter(|_| self.profiles.is_available());
        self.launcher.launch(&LaunchRequest {
            title: LaunchRequest::title_for(name.as_str()),
            profile_uuid,
            argv,
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, SessionRecord> {
        self.registry.store().records()
    }

    /// Drop records of sessions that are not alive. Dead handles stay.
    pub fn clean_metadata(&mut self) -> Result<Vec<String>> {
        let active: HashSet<String> = self
            .registry
            .enumerate(false, SortOrder::Activity)?
            .into_iter()
            .map(|view| view.name)
            .collect();
        self.registry.store_mut().clean(&active)
    }

    pub fn export_metadata(&self) -> MetadataSnapshot {
        self.registry.store().export()
    }

    pub fn import_metadata(&mut self, snapshot: MetadataSnapshot, force: bool) -> Result<ImportReport> {
        self.registry.store_mut().import(snapshot, force)
    }

    /// Fail unless `name` has a live handle. A dead one is reclaimed.
    fn require_alive(&mut self, name: &SessionName) -> Result<()> {
        if !self.registry.handle_exists(name) {
            return Err(KeeperError::SessionNotFound(name.to_string()));
        }
        if !self.registry.probe(name).is_alive() {
            if let Err(e) = self.registry.reclaim(name) {
                warn!(session = %name, error = %e, "failed to remove dead session");
            }
            return Err(KeeperError::DeadSession(name.to_string()));
        }
        Ok(())
    }

    fn template(&self, name: Option<&str>) -> Result<SessionTemplate> {
        match name {
            Some(name) => self
                .config
                .templates
                .get(name)
                .cloned()
                .ok_or_else(|| KeeperError::UnknownTemplate(name.to_string())),
            None => Ok(SessionTemplate::default()),
        }
    }

    /// Fill in the profile identity.
    ///
    /// Order: the requested profile (name, then UUID), else the profile of
    /// `match_session`, else the configured default UUID, else the
    /// configured default name. Whichever half is known fills the other
    /// through the profile backend.
    pub fn resolve_profile(
        &self,
        requested: Option<&str>,
        match_session: Option<&str>,
    ) -> ResolvedProfile {
        let mut profile = ResolvedProfile {
            name: requested.map(str::to_string),
            uuid: None,
        };

        if requested.is_none() {
            if let Some(current) = match_session {
                let record = self.registry.store().get(current);
                profile.name = record.profile_name;
                profile.uuid = record.profile_uuid;
            }
        }

        match (&profile.name, &profile.uuid) {
            (Some(ident), None) => {
                if let Some(found) = self.profiles.resolve(ident) {
                    profile.name = Some(found.name);
                    profile.uuid = Some(found.uuid);
                }
            }
            (None, Some(uuid)) => {
                if let Some(found) = self.profiles.find_by_uuid(uuid) {
                    profile.name = Some(found.name);
                }
            }
            (None, None) => {
                if let Some(uuid) = &self.config.default_profile_uuid {
                    profile.name = self.profiles.find_by_uuid(uuid).map(|p| p.name);
                    profile.uuid = Some(uuid.clone());
                } else if let Some(name) = &self.config.default_profile {
                    if let Some(found) = self.profiles.find_by_name(name) {
                        profile.name = Some(found.name);
                        profile.uuid = Some(found.uuid);
                    }
                }
            }
            (Some(_), Some(_)) => {}
        }
        profile
    }

    /// Environment of the inner shell of a new session.
    fn session_env(
        &self,
        name: &SessionName,
        socket: &Path,
        profile: &ResolvedProfile,
    ) -> Vec<(String, String)> {
        let keepalive = &self.config.keepalive;
        vec![
            ("SHELLKEEPER_SESSION".to_string(), name.to_string()),
            ("SHELLKEEPER_SOCKET".to_string(), socket.display().to_string()),
            ("SK_KEEPALIVE_ENABLED".to_string(), keepalive.enabled.to_string()),
            ("SK_KEEPALIVE_INTERVAL".to_string(), keepalive.interval.to_string()),
            (
                "SK_PROFILE_NAME".to_string(),
                profile.name.clone().unwrap_or_default(),
            ),
            (
                "SK_PROFILE_UUID".to_string(),
                profile.uuid.clone().unwrap_or_default(),
            ),
        ]
    }
}

/// Argument vector of a session's inner shell.
///
/// With neither a working directory nor a startup command this is just the
/// shell. Otherwise the shell runs `cd <dir> && <command>; exec <shell>` so
/// the session always ends in an interactive shell.
pub fn shell_command(shell: &str, working_dir: Option<&Path>, startup: Option<&str>) -> Vec<String> {
    if working_dir.is_none() && startup.is_none() {
        return vec![shell.to_string()];
    }

    let mut script = String::new();
    if let Some(dir) = working_dir {
        let dir = expand_home(dir);
        script.push_str("cd ");
        script.push_str(&shell_words::quote(&dir.to_string_lossy()));
        script.push_str(" && ");
    }
    if let Some(startup) = startup {
        script.push_str(startup);
        script.push_str("; ");
    } else if working_dir.is_some() {
        // `cd x && ; exec` is a syntax error.
        script.truncate(script.len() - " && ".len());
        script.push_str("; ");
    }
    script.push_str("exec ");
    script.push_str(&shell_words::quote(shell));

    vec![shell.to_string(), "-c".to_string(), script]
}

/// Move a socket handle without replacing an existing one at `to`.
fn move_handle(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::hard_link(from, to)?;
    std::fs::remove_file(from)
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
