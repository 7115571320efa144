//! Shell-style glob patterns for bulk kills.

use std::iter::Peekable;
use std::str::Chars;

use regex::Regex;

use crate::error::KeeperError;

/// A compiled shell-style glob matched against whole session names.
///
/// Supports `*`, `?`, and bracket classes (`[abc]`, `[a-z]`, `[!x]`).
/// Everything else matches literally.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> crate::Result<Self> {
        let invalid = |reason: &str| KeeperError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut re = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                '[' => {
                    let mut rest = chars.clone();
                    match bracket_class(&mut rest) {
                        Some(class) => {
                            re.push('[');
                            re.push_str(&class);
                            re.push(']');
                            chars = rest;
                        }
                        // No closing ']': the '[' is an ordinary character.
                        None => re.push_str("\\["),
                    }
                }
                _ => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Translate a bracket class body into regex syntax, consuming the
/// closing `]`. `None` when the class is never closed.
fn bracket_class(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut class = String::new();
    if chars.peek() == Some(&'!') {
        chars.next();
        class.push('^');
    }
    // A leading ']' is part of the class.
    if chars.peek() == Some(&']') {
        chars.next();
        class.push_str("\\]");
    }
    for c in chars.by_ref() {
        match c {
            ']' => return Some(class),
            '\\' | '[' | '^' | '&' | '~' => {
                class.push('\\');
                class.push(c);
            }
            _ => class.push(c),
        }
    }
    None
}
