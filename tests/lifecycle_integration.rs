//! Session lifecycle integration tests.
//!
//! A fake multiplexer binds real Unix listeners on the session sockets, so
//! liveness probing, reaping and the metadata store all run for real.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tempfile::TempDir;

use shell_keeper::config::Config;
use shell_keeper::multiplexer::{CreateSpec, Multiplexer};
use shell_keeper::profiles::{Profile, StaticProfiles};
use shell_keeper::session::{MetadataSnapshot, Prober, SNAPSHOT_VERSION};
use shell_keeper::terminal::{LaunchRequest, TerminalLauncher};
use shell_keeper::{
    CreateRequest, Keeper, KeeperError, MetadataStore, Registry, SessionName, SessionRecord,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct MuxState {
    listeners: HashMap<PathBuf, UnixListener>,
    created: Vec<CreateSpec>,
    attached: Vec<(PathBuf, Vec<(String, String)>)>,
}

/// Binds a listener per created session and keeps it until `stop`.
#[derive(Clone, Default)]
struct FakeMux(Rc<RefCell<MuxState>>);

impl FakeMux {
    /// Simulate the session process exiting; its socket file stays behind.
    fn stop(&self, socket: &Path) {
        self.0.borrow_mut().listeners.remove(socket);
    }

    fn last_created(&self) -> CreateSpec {
        self.0.borrow().created.last().cloned().unwrap()
    }

    fn attach_count(&self) -> usize {
        self.0.borrow().attached.len()
    }
}

impl Multiplexer for FakeMux {
    fn create(&self, spec: &CreateSpec) -> shell_keeper::Result<Option<i32>> {
        let listener = match UnixListener::bind(&spec.socket) {
            Ok(listener) => listener,
            // dtach reports a taken socket through its exit status.
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => return Ok(Some(1)),
            Err(e) => return Err(KeeperError::Multiplexer(e.to_string())),
        };
        let mut state = self.0.borrow_mut();
        state.listeners.insert(spec.socket.clone(), listener);
        state.created.push(spec.clone());
        Ok(Some(0))
    }

    fn attach(&self, socket: &Path, env: &[(String, String)]) -> shell_keeper::Result<Option<i32>> {
        self.0
            .borrow_mut()
            .attached
            .push((socket.to_path_buf(), env.to_vec()));
        Ok(Some(0))
    }
}

#[derive(Clone, Default)]
struct FakeLauncher(Rc<RefCell<Vec<LaunchRequest>>>);

impl FakeLauncher {
    fn launched(&self) -> Vec<LaunchRequest> {
        self.0.borrow().clone()
    }
}

impl TerminalLauncher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest) -> shell_keeper::Result<()> {
        self.0.borrow_mut().push(request.clone());
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    mux: FakeMux,
    launcher: FakeLauncher,
    keeper: Keeper,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.default_shell = "/bin/sh".into();
        Self::build(
            config,
            StaticProfiles::new(vec![
                Profile::new("Dark", "u1"),
                Profile::new("Light", "u2"),
            ]),
        )
    }

    fn build(config: Config, profiles: StaticProfiles) -> Self {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path().join("metadata.json"));
        let registry =
            Registry::new(dir.path().join("sessions"), store, Prober::new().unwrap()).unwrap();
        let mux = FakeMux::default();
        let launcher = FakeLauncher::default();

        let keeper = Keeper::new(config, registry, Box::new(mux.clone()))
            .with_profiles(profiles)
            .with_launcher(launcher.clone())
            .with_program("/usr/bin/sk")
            .with_restore_stagger(Duration::ZERO);

        Self {
            dir,
            mux,
            launcher,
            keeper,
        }
    }

    fn create(&mut self, name: &str, profile: Option<&str>) -> SessionName {
        self.keeper
            .create(&CreateRequest {
                name: Some(name.into()),
                profile: profile.map(String::from),
                ..CreateRequest::default()
            })
            .unwrap()
    }

    fn socket(&self, name: &str) -> PathBuf {
        self.dir.path().join("sessions").join(format!("{name}.sock"))
    }

    fn stop(&self, name: &str) {
        self.mux.stop(&self.socket(name));
    }

    fn record(&self, name: &str) -> SessionRecord {
        self.keeper.registry().store().get(name)
    }

    /// Overwrite records with fixed values through the public import path.
    fn seed(&mut self, records: &[(&str, SessionRecord)]) {
        let snapshot = MetadataSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: now(),
            sessions: records
                .iter()
                .map(|(name, record)| (name.to_string(), record.clone()))
                .collect::<BTreeMap<_, _>>(),
        };
        self.keeper.import_metadata(snapshot, true).unwrap();
    }

    fn names(&mut self) -> Vec<String> {
        self.keeper
            .list()
            .unwrap()
            .into_iter()
            .map(|view| view.name)
            .collect()
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn attached_at(at: NaiveDateTime) -> SessionRecord {
    SessionRecord {
        created: Some(at),
        last_attached: Some(at),
        ..SessionRecord::default()
    }
}

// ============================================================================
// Create / Attach
// ============================================================================

#[test]
fn test_create_lists_exactly_one_alive_session() {
    let mut h = Harness::new();
    h.create("foo", None);

    let sessions = h.keeper.list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "foo");
    assert!(sessions[0].alive);
}

#[test]
fn test_create_twice_conflicts_and_keeps_created() {
    let mut h = Harness::new();
    h.create("foo", None);
    let created = h.record("foo").created;

    let err = h
        .keeper
        .create(&CreateRequest {
            name: Some("foo".into()),
            profile: Some("Light".into()),
            ..CreateRequest::default()
        })
        .unwrap_err();

    assert!(matches!(err, KeeperError::SessionExists(ref n) if n == "foo"));
    assert_eq!(h.record("foo").created, created);
    assert!(h.record("foo").profile_name.is_none());
}

#[test]
fn test_create_losing_socket_race_conflicts() {
    let mut h = Harness::new();
    let foreground = h
        .keeper
        .prepare_create(&CreateRequest {
            name: Some("race".into()),
            ..CreateRequest::default()
        })
        .unwrap();

    // Another invocation binds the socket between the check and dtach.
    let _winner = UnixListener::bind(h.socket("race")).unwrap();

    let err = h.keeper.run_foreground(&foreground).unwrap_err();
    assert!(matches!(err, KeeperError::SessionExists(ref n) if n == "race"));
    assert_eq!(h.names(), vec!["race"]);
}

#[test]
fn test_create_passes_session_environment() {
    let mut h = Harness::new();
    h.create("work", Some("dark"));

    let spec = h.mux.last_created();
    let env: HashMap<_, _> = spec.env.into_iter().collect();
    assert_eq!(spec.socket, h.socket("work"));
    assert_eq!(spec.command, vec!["/bin/sh"]);
    assert_eq!(env["SHELLKEEPER_SESSION"], "work");
    assert_eq!(env["SHELLKEEPER_SOCKET"], h.socket("work").display().to_string());
    assert_eq!(env["SK_PROFILE_NAME"], "Dark");
    assert_eq!(env["SK_PROFILE_UUID"], "u1");

    let record = h.record("work");
    assert_eq!(record.profile_name.as_deref(), Some("Dark"));
    assert_eq!(record.profile_uuid.as_deref(), Some("u1"));
    assert!(record.created.is_some());
    assert_eq!(record.created, record.last_attached);
}

#[test]
fn test_create_generates_name_from_profile() {
    let mut h = Harness::new();
    let name = h
        .keeper
        .create(&CreateRequest {
            profile: Some("Dark".into()),
            ..CreateRequest::default()
        })
        .unwrap();

    assert!(name.as_str().starts_with("dark-"), "got {name}");
    assert_eq!(h.names(), vec![name.to_string()]);
}

#[test]
fn test_create_rejects_invalid_name() {
    let mut h = Harness::new();
    let err = h
        .keeper
        .create(&CreateRequest {
            name: Some("../escape".into()),
            ..CreateRequest::default()
        })
        .unwrap_err();

    assert!(matches!(err, KeeperError::InvalidName { .. }));
    assert!(h.keeper.metadata().is_empty());
}

#[test]
fn test_create_matches_current_session_profile() {
    let mut h = Harness::new();
    h.create("parent", Some("Light"));

    h.keeper
        .create(&CreateRequest {
            name: Some("child".into()),
            match_session: Some("parent".into()),
            ..CreateRequest::default()
        })
        .unwrap();

    assert_eq!(h.record("child").profile_uuid.as_deref(), Some("u2"));
}

#[test]
fn test_attach_refreshes_last_attached() {
    let mut h = Harness::new();
    h.create("foo", None);
    let long_ago = now() - chrono::Duration::days(3);
    h.seed(&[("foo", attached_at(long_ago))]);

    h.keeper.attach("foo").unwrap();

    let record = h.record("foo");
    assert_eq!(record.created, Some(long_ago));
    assert!(record.last_attached.unwrap() > long_ago);
    assert_eq!(h.mux.attach_count(), 1);
}

#[test]
fn test_attach_missing_session_is_not_found() {
    let mut h = Harness::new();
    let err = h.keeper.attach("ghost").unwrap_err();
    assert!(matches!(err, KeeperError::SessionNotFound(_)));
    assert_eq!(h.mux.attach_count(), 0);
}

#[test]
fn test_attach_dead_session_reclaims_it() {
    let mut h = Harness::new();
    h.create("foo", None);
    h.stop("foo");

    let err = h.keeper.attach("foo").unwrap_err();

    assert!(matches!(err, KeeperError::DeadSession(_)));
    assert!(err.is_not_found());
    assert!(!h.socket("foo").exists());
    assert!(!h.keeper.registry().store().contains("foo"));
    assert_eq!(h.mux.attach_count(), 0);
}

// ============================================================================
// Reaping
// ============================================================================

#[test]
fn test_dead_session_reaped_by_list_then_not_found() {
    let mut h = Harness::new();
    h.create("foo", None);
    h.create("bar", None);
    h.stop("foo");

    assert_eq!(h.names(), vec!["bar"]);
    assert!(!h.socket("foo").exists());
    assert!(!h.keeper.registry().store().contains("foo"));

    let err = h.keeper.attach("foo").unwrap_err();
    assert!(matches!(err, KeeperError::SessionNotFound(_)));
}

#[test]
fn test_clean_reaps_dead_and_drops_orphans() {
    let mut h = Harness::new();
    h.create("alive", None);
    h.create("dead", None);
    h.stop("dead");
    h.seed(&[("orphan", attached_at(now()))]);

    let report = h.keeper.clean().unwrap();

    assert_eq!(report.reaped, vec!["dead"]);
    assert_eq!(report.orphaned, vec!["orphan"]);
    let remaining: Vec<_> = h.keeper.metadata().keys().cloned().collect();
    assert_eq!(remaining, vec!["alive"]);
}

#[test]
fn test_clean_metadata_keeps_dead_handles() {
    let mut h = Harness::new();
    h.create("alive", None);
    h.create("dead", None);
    h.stop("dead");

    let removed = h.keeper.clean_metadata().unwrap();

    assert_eq!(removed, vec!["dead"]);
    assert!(h.socket("dead").exists());
}

#[test]
fn test_info_is_read_only_for_dead_session() {
    let mut h = Harness::new();
    h.create("foo", None);
    h.stop("foo");

    let view = h.keeper.info("foo").unwrap();

    assert!(!view.alive);
    assert!(h.socket("foo").exists());
    assert!(h.keeper.registry().store().contains("foo"));
}

// ============================================================================
// Kill
// ============================================================================

#[test]
fn test_kill_removes_handle_and_record() {
    let mut h = Harness::new();
    h.create("foo", None);

    h.keeper.kill("foo").unwrap();

    assert!(!h.socket("foo").exists());
    assert!(!h.keeper.registry().store().contains("foo"));
    assert!(matches!(
        h.keeper.kill("foo"),
        Err(KeeperError::SessionNotFound(_))
    ));
}

#[test]
fn test_kill_dead_session() {
    let mut h = Harness::new();
    h.create("foo", None);
    h.stop("foo");

    h.keeper.kill("foo").unwrap();
    assert!(!h.socket("foo").exists());
}

#[test]
fn test_kill_matching_reports_only_matches() {
    let mut h = Harness::new();
    for name in ["dev-api", "dev-web", "prod-api"] {
        h.create(name, None);
    }

    let mut killed = h.keeper.kill_matching("dev-*").unwrap();
    killed.sort();

    assert_eq!(killed, vec!["dev-api", "dev-web"]);
    assert_eq!(h.names(), vec!["prod-api"]);
}

#[test]
fn test_kill_matching_invalid_pattern() {
    let mut h = Harness::new();
    assert!(matches!(
        h.keeper.kill_matching("dev-[z-a]"),
        Err(KeeperError::InvalidPattern { .. })
    ));
}

#[test]
fn test_kill_all() {
    let mut h = Harness::new();
    h.create("a", None);
    h.create("b", None);

    let mut killed = h.keeper.kill_all().unwrap();
    killed.sort();

    assert_eq!(killed, vec!["a", "b"]);
    assert!(h.names().is_empty());
    assert!(h.keeper.metadata().is_empty());
}

// ============================================================================
// Rename
// ============================================================================

#[test]
fn test_rename_moves_every_field() {
    let mut h = Harness::new();
    h.create("a", Some("Dark"));
    h.keeper.set_note("a", Some("keep me")).unwrap();
    let before = h.record("a");

    h.keeper.rename("a", "b").unwrap();

    assert!(!h.socket("a").exists());
    assert!(h.socket("b").exists());
    assert!(!h.keeper.registry().store().contains("a"));

    let after = h.record("b");
    assert_eq!(after.created, before.created);
    assert_eq!(after.profile_name.as_deref(), Some("Dark"));
    assert_eq!(after.profile_uuid.as_deref(), Some("u1"));
    assert_eq!(after.note.as_deref(), Some("keep me"));
    assert!(after.last_attached >= before.last_attached);

    // The listener followed the renamed socket file.
    assert_eq!(h.names(), vec!["b"]);
}

#[test]
fn test_rename_onto_existing_session_conflicts() {
    let mut h = Harness::new();
    h.create("a", Some("Dark"));
    h.create("b", Some("Light"));

    let err = h.keeper.rename("a", "b").unwrap_err();

    assert!(matches!(err, KeeperError::SessionExists(ref n) if n == "b"));
    assert_eq!(h.record("a").profile_name.as_deref(), Some("Dark"));
    assert_eq!(h.record("b").profile_name.as_deref(), Some("Light"));
    let mut names = h.names();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_rename_missing_session() {
    let mut h = Harness::new();
    assert!(matches!(
        h.keeper.rename("nope", "b"),
        Err(KeeperError::SessionNotFound(_))
    ));
}

// ============================================================================
// Cleanup of idle sessions
// ============================================================================

#[test]
fn test_cleanup_zero_days_with_fresh_sessions_removes_nothing() {
    let mut h = Harness::new();
    h.create("a", None);
    h.create("b", None);
    let t = now();
    h.seed(&[("a", attached_at(t)), ("b", attached_at(t))]);

    let removed = h.keeper.cleanup_idle_at(0, t).unwrap();

    assert!(removed.is_empty());
    assert_eq!(h.names().len(), 2);
}

#[test]
fn test_cleanup_cutoff_is_strict() {
    let mut h = Harness::new();
    for name in ["at-cutoff", "older", "fresh", "never"] {
        h.create(name, None);
    }
    let t = now();
    let cutoff = t - chrono::Duration::days(7);
    h.seed(&[
        ("at-cutoff", attached_at(cutoff)),
        ("older", attached_at(cutoff - chrono::Duration::seconds(1))),
        ("fresh", attached_at(t)),
        (
            "never",
            SessionRecord {
                created: Some(cutoff - chrono::Duration::days(30)),
                ..SessionRecord::default()
            },
        ),
    ]);

    let removed = h.keeper.cleanup_idle_at(7, t).unwrap();

    assert_eq!(removed, vec!["older"]);
    let mut names = h.names();
    names.sort();
    assert_eq!(names, vec!["at-cutoff", "fresh", "never"]);
}

// ============================================================================
// Metadata export / import
// ============================================================================

#[test]
fn test_import_of_own_export() {
    let mut h = Harness::new();
    h.create("a", None);
    h.create("b", Some("Dark"));
    let snapshot = h.keeper.export_metadata();
    assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    assert_eq!(snapshot.sessions.len(), 2);

    let report = h.keeper.import_metadata(snapshot.clone(), false).unwrap();
    assert_eq!((report.imported, report.skipped), (0, 2));

    let report = h.keeper.import_metadata(snapshot, true).unwrap();
    assert_eq!((report.imported, report.skipped), (2, 0));
}

#[test]
fn test_metadata_persists_across_invocations() {
    let mut h = Harness::new();
    h.create("foo", Some("Dark"));
    h.keeper.set_note("foo", Some("persisted")).unwrap();

    let reopened = MetadataStore::open(h.dir.path().join("metadata.json"));
    let record = reopened.get("foo");
    assert_eq!(record.profile_uuid.as_deref(), Some("u1"));
    assert_eq!(record.note.as_deref(), Some("persisted"));
}

// ============================================================================
// Notes and info
// ============================================================================

#[test]
fn test_info_note_kill_scenario() {
    let mut h = Harness::new();
    h.create("foo", Some("Dark"));

    let view = h.keeper.info("foo").unwrap();
    assert!(view.alive);
    assert_eq!(view.profile_name(), Some("Dark"));
    assert_eq!(view.profile_uuid(), Some("u1"));
    assert!(view.note().is_none());

    h.keeper.set_note("foo", Some("testing")).unwrap();
    assert_eq!(h.keeper.info("foo").unwrap().note(), Some("testing"));

    h.keeper.set_note("foo", None).unwrap();
    assert!(h.keeper.info("foo").unwrap().note().is_none());

    h.keeper.kill("foo").unwrap();
    assert!(h.keeper.info("foo").unwrap_err().is_not_found());
}

#[test]
fn test_note_on_missing_session() {
    let mut h = Harness::new();
    assert!(matches!(
        h.keeper.set_note("ghost", Some("x")),
        Err(KeeperError::SessionNotFound(_))
    ));
    assert!(h.keeper.metadata().is_empty());
}

#[test]
fn test_live_session_without_record_is_listed() {
    let mut h = Harness::new();
    // Socket made outside the keeper, e.g. by running dtach directly.
    let _listener = UnixListener::bind(h.socket("manual")).unwrap();

    let sessions = h.keeper.list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].record.is_empty());
}

#[test]
fn test_note_on_session_without_record_fails() {
    let mut h = Harness::new();
    let _listener = UnixListener::bind(h.socket("manual")).unwrap();

    assert!(matches!(
        h.keeper.set_note("manual", Some("adopted")),
        Err(KeeperError::NoMetadata(ref n)) if n == "manual"
    ));
    assert!(matches!(
        h.keeper.set_note("manual", None),
        Err(KeeperError::NoMetadata(_))
    ));
    assert!(h.keeper.metadata().is_empty());
}

// ============================================================================
// Windows
// ============================================================================

#[test]
fn test_restore_opens_window_with_profile() {
    let mut h = Harness::new();
    h.create("foo", Some("Dark"));

    h.keeper.restore("foo").unwrap();

    let launched = h.launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].title, "SK: foo");
    assert_eq!(launched[0].profile_uuid.as_deref(), Some("u1"));
    assert_eq!(launched[0].argv, vec!["/usr/bin/sk", "attach", "foo"]);
}

#[test]
fn test_restore_dead_session_reclaims_it() {
    let mut h = Harness::new();
    h.create("foo", None);
    h.stop("foo");

    let err = h.keeper.restore("foo").unwrap_err();

    assert!(matches!(err, KeeperError::DeadSession(_)));
    assert!(!h.socket("foo").exists());
    assert!(h.launcher.launched().is_empty());
}

#[test]
fn test_restore_all_and_latest() {
    let mut h = Harness::new();
    assert!(h.keeper.restore_latest().unwrap().is_none());
    assert!(h.keeper.restore_all().unwrap().is_empty());

    h.create("a", None);
    h.create("b", None);
    h.create("c", None);
    h.stop("c");

    let mut restored = h.keeper.restore_all().unwrap();
    restored.sort();
    assert_eq!(restored, vec!["a", "b"]);
    assert_eq!(h.launcher.launched().len(), 2);

    let latest = h.keeper.restore_latest().unwrap().unwrap();
    assert!(latest == "a" || latest == "b");
}

#[test]
fn test_open_terminal_precreates_record() {
    let mut h = Harness::new();

    let opened = h.keeper.open_terminal(Some("light"), None).unwrap();

    assert_eq!(opened.profile_name.as_deref(), Some("Light"));
    let record = h.record(opened.name.as_str());
    assert_eq!(record.profile_uuid.as_deref(), Some("u2"));

    let launched = h.launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].profile_uuid.as_deref(), Some("u2"));
    assert_eq!(
        launched[0].argv,
        vec![
            "/usr/bin/sk".to_string(),
            "new".to_string(),
            opened.name.to_string(),
            "--profile".to_string(),
            "Light".to_string(),
        ]
    );
}

#[test]
fn test_open_terminal_name_collision_keeps_existing_session() {
    let mut config = Config::default();
    config.default_shell = "/bin/sh".into();
    config.session_name_format = "fixed".into();
    let mut h = Harness::build(
        config,
        StaticProfiles::new(vec![
            Profile::new("Dark", "u1"),
            Profile::new("Light", "u2"),
        ]),
    );
    h.create("fixed", Some("Dark"));
    let before = h.record("fixed");

    let err = h.keeper.open_terminal(Some("Light"), None).unwrap_err();

    assert!(matches!(err, KeeperError::SessionExists(ref n) if n == "fixed"));
    assert_eq!(h.record("fixed"), before);
    assert!(h.launcher.launched().is_empty());
}

#[test]
fn test_profile_uuid_dropped_without_profile_backend() {
    let mut config = Config::default();
    config.default_shell = "/bin/sh".into();
    let mut h = Harness::build(config, StaticProfiles::default());
    h.create("foo", None);
    h.seed(&[(
        "foo",
        SessionRecord {
            profile_uuid: Some("u9".into()),
            ..attached_at(now())
        },
    )]);

    h.keeper.restore("foo").unwrap();

    assert!(h.launcher.launched()[0].profile_uuid.is_none());
}
