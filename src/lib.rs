//! # shell-keeper
//!
//! Named, detachable terminal sessions on top of `dtach`.
//!
//! Each session is a `dtach` socket handle `<name>.sock` in the socket
//! directory, plus an optional metadata record (timestamps, terminal
//! profile, note) in `~/.shellkeeper/metadata.json`. The handle decides
//! whether a session exists; a handle that no longer accepts connections
//! is dead and is removed together with its record.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_keeper::config::Config;
//! use shell_keeper::multiplexer::Dtach;
//! use shell_keeper::paths::KeeperPaths;
//! use shell_keeper::Keeper;
//!
//! fn main() -> shell_keeper::Result<()> {
//!     let paths = KeeperPaths::resolve()?;
//!     let mut keeper = Keeper::open(Config::default(), &paths, Box::new(Dtach::locate()?))?;
//!
//!     for session in keeper.list()? {
//!         println!("{} [{}]", session.name, session.profile_name().unwrap_or("none"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod autostart;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod hooks;
pub mod keeper;
pub mod logging;
pub mod multiplexer;
pub mod paths;
pub mod preflight;
pub mod profiles;
pub mod session;
pub mod terminal;

// Re-export commonly used types
pub use error::{KeeperError, Result};
pub use keeper::{CleanReport, CreateRequest, Keeper};
pub use session::{Liveness, MetadataStore, Registry, SessionName, SessionRecord, SessionView};
