//! Session naming, metadata, liveness and the registry that joins them.
//!
//! A session is identified by its name; the socket handle
//! `<socket_dir>/<name>.sock` is the source of truth for its existence.

mod name;
mod pattern;
mod probe;
mod record;
mod registry;
mod store;

pub use name::{slugify, NameTemplate, SessionName, SOCKET_EXTENSION};
pub use pattern::GlobPattern;
pub use probe::{Liveness, Prober, DEFAULT_PROBE_TIMEOUT};
pub use record::{MetadataSnapshot, SessionRecord, SNAPSHOT_VERSION};
pub use registry::{Registry, Scan, SessionView, SortOrder};
pub use store::{ImportReport, MetadataStore};
