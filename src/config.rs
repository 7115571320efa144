//! Configuration management for shell-keeper.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cli::GlobalArgs;
use crate::hooks::HookEvent;
use crate::paths::KeeperPaths;

/// Default template for generated session names.
pub const DEFAULT_NAME_FORMAT: &str = "{profile}-{date}-{time}-{random}";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell started inside new sessions.
    pub default_shell: String,
    /// Directory holding socket handles. Defaults to `<root>/sessions`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,
    /// Keepalive settings exported to the session environment.
    pub keepalive: KeepaliveSection,
    /// Profile name used when a new session names none.
    pub default_profile: Option<String>,
    /// Profile UUID used when a new session names none. Wins over `default_profile`.
    pub default_profile_uuid: Option<String>,
    /// Template for generated names; see [`crate::session::NameTemplate`].
    pub session_name_format: String,
    /// External executables run on lifecycle events.
    pub hooks: HooksSection,
    /// Named presets for `sk new --template`.
    pub templates: BTreeMap<String, SessionTemplate>,
    /// Logging configuration.
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            socket_dir: None,
            keepalive: KeepaliveSection::default(),
            default_profile: None,
            default_profile_uuid: None,
            session_name_format: DEFAULT_NAME_FORMAT.to_string(),
            hooks: HooksSection::default(),
            templates: BTreeMap::new(),
            logging: LoggingSection::default(),
        }
    }
}

/// Keepalive configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveSection {
    pub enabled: bool,
    /// Interval in seconds.
    pub interval: u64,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
        }
    }
}

/// Hook executables, each optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksSection {
    pub on_create: Option<PathBuf>,
    pub on_attach: Option<PathBuf>,
    pub on_detach: Option<PathBuf>,
}

impl HooksSection {
    /// Executable configured for `event`, if any.
    pub fn path_for(&self, event: HookEvent) -> Option<&Path> {
        match event {
            HookEvent::Create => self.on_create.as_deref(),
            HookEvent::Attach => self.on_attach.as_deref(),
            HookEvent::Detach => self.on_detach.as_deref(),
        }
    }
}

/// A named preset for new sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTemplate {
    /// Profile name or UUID.
    pub profile: Option<String>,
    /// Command run before the interactive shell.
    pub command: Option<String>,
    /// Directory the shell starts in.
    pub working_dir: Option<PathBuf>,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Json)?;
        std::fs::write(path, json).map_err(ConfigError::Io)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("SK_SOCKET_DIR") {
            if !dir.is_empty() {
                self.socket_dir = Some(PathBuf::from(dir));
            }
        }

        if std::env::var("SK_DEBUG").is_ok_and(|v| !v.is_empty() && v != "0") {
            self.logging.level = "debug".to_string();
        } else if let Ok(level) = std::env::var("SK_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &GlobalArgs) {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// An explicit `--config` file must exist and parse. The default file is
    /// created with default values when missing.
    pub fn load(args: &GlobalArgs, paths: &KeeperPaths) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => {
                let path = paths.config_file();
                if path.exists() {
                    Config::from_file(&path)?
                } else {
                    let config = Config::default();
                    // Best effort: a read-only home must not block the tool.
                    let _ = config.save(&path);
                    config
                }
            }
        };

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Like [`Config::load`], but a broken default config file falls back to
    /// defaults. The error is handed back so it can be logged once logging
    /// is up.
    pub fn load_or_default(
        args: &GlobalArgs,
        paths: &KeeperPaths,
    ) -> Result<(Self, Option<ConfigError>), ConfigError> {
        match Config::load(args, paths) {
            Ok(config) => Ok((config, None)),
            Err(err) if args.config.is_none() => {
                let mut config = Config::default();
                config.apply_env();
                config.apply_args(args);
                Ok((config, Some(err)))
            }
            Err(err) => Err(err),
        }
    }

    /// Socket handle directory after applying the default.
    pub fn socket_dir(&self, paths: &KeeperPaths) -> PathBuf {
        self.socket_dir
            .clone()
            .unwrap_or_else(|| paths.sessions_dir())
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to access config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
