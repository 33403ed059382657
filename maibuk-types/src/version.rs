//! Host version helpers.
//!
//! Manifest compatibility checks compare a declared range against the
//! version of the running host. The version is stamped at compile time
//! from the workspace package version.

use semver::Version;

/// The version of the running Maibuk host.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the parsed host version.
///
/// The workspace version is a compile-time constant and always valid
/// semver, so this cannot fail at runtime.
#[must_use]
pub fn host_version() -> Version {
    Version::parse(HOST_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// Parses a strict semver version string.
pub fn parse_version(input: &str) -> crate::Result<Version> {
    Version::parse(input).map_err(|e| crate::Error::InvalidVersion {
        input: input.to_string(),
        reason: e.to_string(),
    })
}
