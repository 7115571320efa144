//! Session registry: socket handles on disk joined with stored metadata.
//!
//! The socket directory is the authority on which sessions exist; the
//! metadata store only decorates them. [`Registry::enumerate`] is where the
//! two are reconciled.

use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::name::SessionName;
use super::probe::{Liveness, Prober};
use super::record::SessionRecord;
use super::store::MetadataStore;
use crate::error::KeeperError;
use crate::Result;

/// Activity key used to order sessions, most recent first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Modification time of the socket handle.
    #[default]
    Activity,
    /// `last_attached` from metadata, falling back to the handle's
    /// modification time when there is none.
    LastAttached,
}

/// Public view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub name: String,
    pub socket: PathBuf,
    pub alive: bool,
    /// Modification time of the socket handle.
    pub modified: Option<NaiveDateTime>,
    /// Stored metadata; empty when the session was created out of band.
    pub record: SessionRecord,
}

impl SessionView {
    pub fn profile_name(&self) -> Option<&str> {
        self.record.profile_name.as_deref()
    }

    pub fn profile_uuid(&self) -> Option<&str> {
        self.record.profile_uuid.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.record.note.as_deref()
    }

    fn activity(&self, order: SortOrder) -> Option<NaiveDateTime> {
        match order {
            SortOrder::Activity => self.modified,
            SortOrder::LastAttached => self.record.last_attached.or(self.modified),
        }
    }
}

/// Result of one pass over the socket directory.
#[derive(Debug, Default)]
pub struct Scan {
    /// Sessions whose handle accepted a connection, unordered.
    pub alive: Vec<SessionView>,
    /// Handles that failed the probe, ordered by name.
    pub dead: Vec<SessionName>,
}

/// Registry of sessions in one socket directory.
#[derive(Debug)]
pub struct Registry {
    socket_dir: PathBuf,
    prober: Prober,
    store: MetadataStore,
}

impl Registry {
    /// Open the registry, creating the socket directory (mode 0700) if needed.
    pub fn new(socket_dir: impl Into<PathBuf>, store: MetadataStore, prober: Prober) -> Result<Self> {
        let socket_dir = socket_dir.into();
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&socket_dir)?;

        Ok(Self {
            socket_dir,
            prober,
            store,
        })
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MetadataStore {
        &mut self.store
    }

    /// Path of the socket handle for `name`.
    pub fn socket_path(&self, name: &SessionName) -> PathBuf {
        self.socket_dir.join(name.socket_file_name())
    }

    /// Whether a handle file exists, without probing it.
    pub fn handle_exists(&self, name: &SessionName) -> bool {
        std::fs::symlink_metadata(self.socket_path(name)).is_ok()
    }

    /// Probe the handle for `name`.
    pub fn probe(&self, name: &SessionName) -> Liveness {
        let liveness = self.prober.probe(&self.socket_path(name));
        if let Liveness::ProbeError(ref reason) = liveness {
            warn!(session = %name, %reason, "could not confirm session is alive, treating as dead");
        }
        liveness
    }

    /// Build the view of `name` without changing anything on disk.
    pub fn view(&self, name: &SessionName) -> Result<SessionView> {
        if !self.handle_exists(name) {
            return Err(KeeperError::SessionNotFound(name.to_string()));
        }
        let alive = self.probe(name).is_alive();
        Ok(self.build_view(name, alive))
    }

    fn build_view(&self, name: &SessionName, alive: bool) -> SessionView {
        let socket = self.socket_path(name);
        let modified = std::fs::symlink_metadata(&socket)
            .and_then(|meta| meta.modified())
            .ok()
            .map(|t| chrono::DateTime::<chrono::Local>::from(t).naive_local());

        SessionView {
            name: name.to_string(),
            socket,
            alive,
            modified,
            record: self.store.get(name.as_str()),
        }
    }

    /// Probe every handle in the socket directory.
    pub fn scan(&self) -> Result<Scan> {
        let entries = match std::fs::read_dir(&self.socket_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Scan::default()),
            Err(e) => return Err(e.into()),
        };

        let mut scan = Scan::default();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(SessionName::from_socket_file_name)
            else {
                continue;
            };

            if self.probe(&name).is_alive() {
                scan.alive.push(self.build_view(&name, true));
            } else {
                debug!(session = %name, "dead socket handle");
                scan.dead.push(name);
            }
        }

        scan.dead.sort();
        Ok(scan)
    }

    /// List live sessions, most recent first by `order` (ties by name).
    ///
    /// With `clean_dead`, every dead handle found in the pass is deleted
    /// together with its metadata. A dead handle that cannot be deleted is
    /// logged and left for the next pass.
    pub fn enumerate(&mut self, clean_dead: bool, order: SortOrder) -> Result<Vec<SessionView>> {
        let Scan { mut alive, dead } = self.scan()?;

        if clean_dead {
            for name in &dead {
                match self.reclaim(name) {
                    Ok(()) => info!(session = %name, "removed dead session socket"),
                    Err(e) => warn!(session = %name, error = %e, "failed to remove dead session"),
                }
            }
        }

        alive.sort_by(|a, b| {
            b.activity(order)
                .cmp(&a.activity(order))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(alive)
    }

    /// Delete the handle of `name` and then its metadata.
    ///
    /// A handle that is already gone is fine. If the handle cannot be
    /// deleted the metadata is kept, so the two stay consistent.
    pub fn reclaim(&mut self, name: &SessionName) -> Result<()> {
        match std::fs::remove_file(self.socket_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.store.remove(name.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: Registry,
        listeners: Vec<UnixListener>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = MetadataStore::open(dir.path().join("metadata.json"));
            let registry =
                Registry::new(dir.path().join("sessions"), store, Prober::new().unwrap()).unwrap();
            Self {
                _dir: dir,
                registry,
                listeners: Vec::new(),
            }
        }

        fn live(&mut self, name: &str) -> SessionName {
            let name = SessionName::new(name).unwrap();
            let listener = UnixListener::bind(self.registry.socket_path(&name)).unwrap();
            self.listeners.push(listener);
            name
        }

        fn dead(&self, name: &str) -> SessionName {
            let name = SessionName::new(name).unwrap();
            drop(UnixListener::bind(self.registry.socket_path(&name)).unwrap());
            name
        }
    }

    fn names(views: &[SessionView]) -> Vec<&str> {
        views.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn test_empty_directory() {
        let mut fx = Fixture::new();
        assert!(fx.registry.enumerate(true, SortOrder::Activity).unwrap().is_empty());
    }

    #[test]
    fn test_live_session_without_metadata_is_listed() {
        let mut fx = Fixture::new();
        fx.live("orphan");

        let sessions = fx.registry.enumerate(true, SortOrder::Activity).unwrap();
        assert_eq!(names(&sessions), vec!["orphan"]);
        assert!(sessions[0].alive);
        assert!(sessions[0].record.is_empty());
        assert!(sessions[0].modified.is_some());
    }

    #[test]
    fn test_metadata_is_joined() {
        let mut fx = Fixture::new();
        fx.live("work");
        fx.registry
            .store_mut()
            .set("work", Some("Dark"), Some("u1"))
            .unwrap();

        let sessions = fx.registry.enumerate(false, SortOrder::Activity).unwrap();
        assert_eq!(sessions[0].profile_name(), Some("Dark"));
        assert_eq!(sessions[0].profile_uuid(), Some("u1"));
    }

    #[test]
    fn test_dead_handles_reaped_with_metadata() {
        let mut fx = Fixture::new();
        fx.live("alive");
        let dead = fx.dead("stale");
        fx.registry.store_mut().set("stale", None, None).unwrap();

        let sessions = fx.registry.enumerate(true, SortOrder::Activity).unwrap();

        assert_eq!(names(&sessions), vec!["alive"]);
        assert!(!fx.registry.handle_exists(&dead));
        assert!(!fx.registry.store().contains("stale"));
    }

    #[test]
    fn test_dead_handles_kept_without_clean() {
        let mut fx = Fixture::new();
        let dead = fx.dead("stale");
        fx.registry.store_mut().set("stale", None, None).unwrap();

        let sessions = fx.registry.enumerate(false, SortOrder::Activity).unwrap();

        assert!(sessions.is_empty());
        assert!(fx.registry.handle_exists(&dead));
        assert!(fx.registry.store().contains("stale"));

        let scan = fx.registry.scan().unwrap();
        assert_eq!(scan.dead, vec![dead]);
    }

    #[test]
    fn test_non_socket_files_are_dead_and_other_files_ignored() {
        let mut fx = Fixture::new();
        let sessions_dir = fx.registry.socket_dir().to_path_buf();
        std::fs::write(sessions_dir.join("plain.sock"), b"").unwrap();
        std::fs::write(sessions_dir.join("README"), b"").unwrap();

        fx.registry.enumerate(true, SortOrder::Activity).unwrap();

        assert!(!sessions_dir.join("plain.sock").exists());
        assert!(sessions_dir.join("README").exists());
    }

    #[test]
    fn test_order_by_last_attached_with_name_ties() {
        let mut fx = Fixture::new();
        for name in ["b", "a", "c", "d"] {
            fx.live(name);
        }
        let t0 = chrono::Local::now().naive_local();
        let store = fx.registry.store_mut();
        store.set_at("a", None, None, t0).unwrap();
        store.set_at("b", None, None, t0).unwrap();
        store.set_at("c", None, None, t0 + Duration::hours(1)).unwrap();
        store.set_at("d", None, None, t0 - Duration::days(400)).unwrap();

        let sessions = fx.registry.enumerate(false, SortOrder::LastAttached).unwrap();
        assert_eq!(names(&sessions), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_view_reports_dead_without_reaping() {
        let mut fx = Fixture::new();
        let dead = fx.dead("stale");
        fx.live("work");

        let view = fx.registry.view(&dead).unwrap();
        assert!(!view.alive);
        assert!(fx.registry.handle_exists(&dead));

        let work = SessionName::new("work").unwrap();
        assert!(fx.registry.view(&work).unwrap().alive);

        let ghost = SessionName::new("ghost").unwrap();
        assert!(matches!(
            fx.registry.view(&ghost),
            Err(KeeperError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_reclaim_missing_handle_still_drops_metadata() {
        let mut fx = Fixture::new();
        fx.registry.store_mut().set("ghost", None, None).unwrap();

        let ghost = SessionName::new("ghost").unwrap();
        fx.registry.reclaim(&ghost).unwrap();
        assert!(!fx.registry.store().contains("ghost"));
    }
}
