//! Session metadata records and the export snapshot format.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Version written into export snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Metadata kept for one session.
///
/// Timestamps are local wall-clock times without offset. Every field is
/// optional: a record may be partially filled, and an absent record reads
/// as [`SessionRecord::default`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Set once when the record is first written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<NaiveDateTime>,
    /// Refreshed on every create and attach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attached: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SessionRecord {
    /// Whether nothing at all is known about the session.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Portable export of the whole metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub version: u32,
    #[serde(alias = "exported")]
    pub exported_at: NaiveDateTime,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionRecord>,
}
