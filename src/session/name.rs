//! Session names and name generation.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rand::Rng;

use crate::error::KeeperError;

/// Extension of socket handle files.
pub const SOCKET_EXTENSION: &str = "sock";

const SLUG_MAX_LEN: usize = 20;
const RANDOM_SUFFIX_LEN: usize = 4;
const RANDOM_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Validated name of a session.
///
/// A name maps one-to-one onto a socket handle file `<name>.sock`, so it
/// must be a plain file name: non-empty, no `/`, no control characters and
/// no leading `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionName(String);

impl SessionName {
    /// Validate and wrap a session name.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.contains('/') {
            Some("contains '/'")
        } else if name.starts_with('.') {
            Some("starts with '.'")
        } else if name.chars().any(char::is_control) {
            Some("contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(KeeperError::InvalidName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this session's socket handle.
    pub fn socket_file_name(&self) -> String {
        format!("{}.{}", self.0, SOCKET_EXTENSION)
    }

    /// Recover a session name from a socket handle file name.
    ///
    /// Returns `None` for files that are not handles.
    pub fn from_socket_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(SOCKET_EXTENSION)?.strip_suffix('.')?;
        Self::new(stem).ok()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionName {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lowercase `text`, collapse runs of other characters into `-`, trim
/// dashes and cap the length. Empty input gives `default`.
pub fn slugify(text: Option<&str>) -> String {
    let mut slug = String::new();
    for c in text.unwrap_or_default().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug: String = slug.trim_matches('-').chars().take(SLUG_MAX_LEN).collect();
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

/// Template for generated session names.
///
/// Placeholders: `{profile}` (slugified profile name), `{date}`
/// (`YYYYMMDD`), `{time}` (`HHMMSS`) and `{random}` (four lowercase
/// alphanumerics). Anything else is copied literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    format: String,
}

impl NameTemplate {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Render the template for `profile` at `now`.
    pub fn render<R: Rng + ?Sized>(
        &self,
        profile: Option<&str>,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> String {
        let suffix: String = (0..RANDOM_SUFFIX_LEN)
            .map(|_| RANDOM_ALPHABET[rng.gen_range(0..RANDOM_ALPHABET.len())] as char)
            .collect();

        self.format
            .replace("{profile}", &slugify(profile))
            .replace("{date}", &now.format("%Y%m%d").to_string())
            .replace("{time}", &now.format("%H%M%S").to_string())
            .replace("{random}", &suffix)
    }

    /// Render with the local clock and thread RNG, then validate.
    pub fn generate(&self, profile: Option<&str>) -> crate::Result<SessionName> {
        let now = chrono::Local::now().naive_local();
        SessionName::new(self.render(profile, now, &mut rand::thread_rng()))
    }
}
