//! Identifier types used throughout the Maibuk plugin subsystem.
//!
//! Plugin ids are reverse-domain strings fixed at install time; RPC call
//! ids are random UUID v4 values that only need to stay unique within one
//! sandbox instance's pending-call set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an installed plugin.
///
/// Must match the reverse-domain pattern: at least two dot-separated
/// segments of lowercase alphanumerics and hyphens, with no segment
/// starting or ending in a hyphen (`com.example.word-count`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    /// Parses and validates a plugin id.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if is_reverse_domain(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(crate::Error::InvalidPluginId(s.to_string()))
        }
    }

    /// Wraps a string without validation. Callers must have validated the
    /// id previously (e.g. when reading back records written by the host).
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PluginId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_reverse_domain(s: &str) -> bool {
    if s.is_empty() || s.len() > 128 {
        return false;
    }
    let segments: Vec<&str> = s.split('.').collect();
    if segments.len() < 2 {
        return false;
    }
    segments.iter().all(|seg| {
        !seg.is_empty()
            && !seg.starts_with('-')
            && !seg.ends_with('-')
            && seg
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    })
}

/// Correlation id for one in-flight RPC call across the sandbox boundary.
///
/// Random v4 UUIDs are collision-resistant well beyond the lifetime of a
/// single sandbox's pending-call table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Creates a fresh random call id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a call id from its string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
