//! Terminal profile lookup.
//!
//! A profile is the terminal emulator's configuration identity. Sessions
//! remember the profile they were created with so a restored window looks
//! the same.

use std::process::Command;

use tracing::debug;

/// A terminal profile identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub uuid: String,
}

impl Profile {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }
}

/// Source of terminal profiles.
///
/// Lookups never fail: an unavailable backend yields no profiles.
pub trait ProfileLookup {
    /// Whether the backend can be queried at all.
    fn is_available(&self) -> bool;

    fn list(&self) -> Vec<Profile>;

    fn find_by_uuid(&self, uuid: &str) -> Option<Profile>;

    fn default_profile(&self) -> Option<Profile>;

    /// Case-insensitive lookup by visible name.
    fn find_by_name(&self, name: &str) -> Option<Profile> {
        let wanted = name.to_lowercase();
        self.list()
            .into_iter()
            .find(|p| p.name.to_lowercase() == wanted)
    }

    /// Look up a profile given either its name or its UUID.
    fn resolve(&self, ident: &str) -> Option<Profile> {
        self.find_by_name(ident).or_else(|| self.find_by_uuid(ident))
    }
}

const PROFILES_LIST_SCHEMA: &str = "org.gnome.Terminal.ProfilesList";
const PROFILE_SCHEMA: &str = "org.gnome.Terminal.Legacy.Profile";
const PROFILES_PATH: &str = "/org/gnome/terminal/legacy/profiles:/";

/// GNOME Terminal profiles read through `gsettings`.
#[derive(Debug, Clone)]
pub struct GSettingsProfiles {
    program: String,
}

impl Default for GSettingsProfiles {
    fn default() -> Self {
        Self {
            program: "gsettings".to_string(),
        }
    }
}

impl GSettingsProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// `gsettings get <schema> <key>`, trimmed. `None` if the tool is
    /// missing or the key cannot be read.
    fn get(&self, schema: &str, key: &str) -> Option<String> {
        let output = match Command::new(&self.program)
            .args(["get", schema, key])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                debug!(program = %self.program, error = %e, "profile backend unavailable");
                return None;
            }
        };
        if !output.status.success() {
            debug!(schema, key, status = %output.status, "gsettings lookup failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn visible_name(&self, uuid: &str) -> Option<String> {
        let schema = format!("{PROFILE_SCHEMA}:{PROFILES_PATH}:{uuid}/");
        self.get(&schema, "visible-name")
            .map(|raw| unquote(&raw).to_string())
            .filter(|name| !name.is_empty())
    }
}

impl ProfileLookup for GSettingsProfiles {
    fn is_available(&self) -> bool {
        self.get(PROFILES_LIST_SCHEMA, "list").is_some()
    }

    fn list(&self) -> Vec<Profile> {
        let Some(raw) = self.get(PROFILES_LIST_SCHEMA, "list") else {
            return Vec::new();
        };
        parse_string_array(&raw)
            .into_iter()
            .map(|uuid| {
                let name = self.visible_name(&uuid).unwrap_or_else(|| uuid.clone());
                Profile { name, uuid }
            })
            .collect()
    }

    fn find_by_uuid(&self, uuid: &str) -> Option<Profile> {
        self.visible_name(uuid).map(|name| Profile::new(name, uuid))
    }

    fn default_profile(&self) -> Option<Profile> {
        let raw = self.get(PROFILES_LIST_SCHEMA, "default")?;
        let uuid = unquote(&raw);
        if uuid.is_empty() {
            return None;
        }
        let name = self.visible_name(uuid).unwrap_or_else(|| uuid.to_string());
        Some(Profile::new(name, uuid))
    }
}

/// Fixed in-memory profile set.
///
/// Used where no GNOME Terminal is present, and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticProfiles {
    profiles: Vec<Profile>,
    default: Option<usize>,
}

impl StaticProfiles {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self {
            profiles,
            default: None,
        }
    }

    /// Mark the profile with `uuid` as the default.
    pub fn with_default(mut self, uuid: &str) -> Self {
        self.default = self.profiles.iter().position(|p| p.uuid == uuid);
        self
    }
}

impl ProfileLookup for StaticProfiles {
    fn is_available(&self) -> bool {
        !self.profiles.is_empty()
    }

    fn list(&self) -> Vec<Profile> {
        self.profiles.clone()
    }

    fn find_by_uuid(&self, uuid: &str) -> Option<Profile> {
        self.profiles.iter().find(|p| p.uuid == uuid).cloned()
    }

    fn default_profile(&self) -> Option<Profile> {
        self.default.and_then(|i| self.profiles.get(i)).cloned()
    }
}

/// Strip one layer of GVariant string quotes.
fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw)
}

/// Parse a GVariant string array such as `['a', 'b']` or `@as []`.
fn parse_string_array(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("@as").unwrap_or(raw).trim();
    let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
        return Vec::new();
    };
    inner
        .split(',')
        .map(|item| unquote(item).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
