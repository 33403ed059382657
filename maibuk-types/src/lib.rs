//! Core type definitions for Maibuk.
//!
//! This crate defines the fundamental, plugin-agnostic types shared between
//! the editor application and the plugin host:
//! - Plugin identifiers (reverse-domain strings)
//! - RPC call identifiers (UUID v4)
//! - Host version helpers
//!
//! Everything plugin-host-specific (permissions, manifests, sandbox state)
//! belongs in `maibuk-plugin-host`, not here.

mod ids;
mod version;

pub use ids::{CallId, PluginId};
pub use version::{HOST_VERSION, host_version, parse_version};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid plugin id '{0}': expected reverse-domain form like 'com.example.plugin'")]
    InvalidPluginId(String),

    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
