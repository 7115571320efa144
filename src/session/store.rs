//! File-backed session metadata store.
//!
//! The whole mapping lives in one JSON file that is rewritten after every
//! mutation. There is no locking: two invocations that load, mutate and
//! save concurrently race, and the later save wins.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use super::record::{MetadataSnapshot, SessionRecord, SNAPSHOT_VERSION};
use crate::Result;

/// Outcome of [`MetadataStore::import`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Durable mapping from session name to [`SessionRecord`].
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    records: BTreeMap<String, SessionRecord>,
}

impl MetadataStore {
    /// Load the store at `path`.
    ///
    /// Never fails: a missing file is an empty store, and an unreadable or
    /// malformed file is logged and replaced by an empty store on the next
    /// save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "metadata file is malformed, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata file is unreadable, starting empty");
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), sessions = records.len(), "metadata loaded");
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record for `name`, or an empty record.
    pub fn get(&self, name: &str) -> SessionRecord {
        self.records.get(name).cloned().unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// All records, ordered by name.
    pub fn records(&self) -> &BTreeMap<String, SessionRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Create or touch the record for `name`.
    ///
    /// `created` is only written for a new record, `last_attached` is always
    /// refreshed, and profile fields change only when given.
    pub fn set(
        &mut self,
        name: &str,
        profile_name: Option<&str>,
        profile_uuid: Option<&str>,
    ) -> Result<()> {
        self.set_at(name, profile_name, profile_uuid, now())
    }

    /// [`MetadataStore::set`] with an explicit clock reading.
    pub fn set_at(
        &mut self,
        name: &str,
        profile_name: Option<&str>,
        profile_uuid: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<()> {
        let record = self.records.entry(name.to_string()).or_default();
        record.created.get_or_insert(at);
        record.last_attached = Some(at);
        if let Some(profile_name) = profile_name {
            record.profile_name = Some(profile_name.to_string());
        }
        if let Some(profile_uuid) = profile_uuid {
            record.profile_uuid = Some(profile_uuid.to_string());
        }
        self.save()
    }

    /// Set or clear the note of an existing record.
    ///
    /// Returns `false` without saving if there is no record for `name`.
    pub fn set_note(&mut self, name: &str, note: Option<&str>) -> Result<bool> {
        let Some(record) = self.records.get_mut(name) else {
            return Ok(false);
        };
        record.note = note.map(str::to_string);
        self.save()?;
        Ok(true)
    }

    /// Store `record` under `name`, replacing any existing record.
    pub fn insert(&mut self, name: &str, record: SessionRecord) -> Result<()> {
        self.records.insert(name.to_string(), record);
        self.save()
    }

    /// Remove the record for `name`. Removing an absent record is a no-op.
    pub fn remove(&mut self, name: &str) -> Result<Option<SessionRecord>> {
        let removed = self.records.remove(name);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Drop every record whose name is not in `active`.
    ///
    /// Returns the removed names in order.
    pub fn clean(&mut self, active: &HashSet<String>) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .records
            .keys()
            .filter(|name| !active.contains(*name))
            .cloned()
            .collect();

        if !stale.is_empty() {
            for name in &stale {
                self.records.remove(name);
            }
            self.save()?;
        }
        Ok(stale)
    }

    /// Snapshot of every record.
    pub fn export(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: now(),
            sessions: self.records.clone(),
        }
    }

    /// Merge `snapshot` into the store.
    ///
    /// Existing names are skipped unless `force` is set, in which case they
    /// are overwritten.
    pub fn import(&mut self, snapshot: MetadataSnapshot, force: bool) -> Result<ImportReport> {
        if snapshot.version > SNAPSHOT_VERSION {
            warn!(version = snapshot.version, "importing snapshot from a newer version");
        }

        let mut report = ImportReport::default();
        for (name, record) in snapshot.sessions {
            if !force && self.records.contains_key(&name) {
                report.skipped += 1;
                continue;
            }
            self.records.insert(name, record);
            report.imported += 1;
        }

        if report.imported > 0 {
            self.save()?;
        }
        Ok(report)
    }

    /// Rewrite the file: write a sibling temp file, then rename it over.
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.records)?;
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));

        std::fs::write(&temp_path, content)?;
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
