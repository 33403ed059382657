//! Error types for the plugin host.

use maibuk_types::PluginId;
use thiserror::Error;

use crate::catalog::Permission;

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("plugin not installed: {0}")]
    NotInstalled(PluginId),

    #[error("plugin already loaded: {0}")]
    AlreadyLoaded(PluginId),

    #[error("plugin not loaded: {0}")]
    NotLoaded(PluginId),

    #[error("plugin '{0}' is disabled")]
    Disabled(PluginId),

    #[error("permission denied: plugin '{plugin_id}' lacks {names}", names = format_permissions(.missing))]
    PermissionDenied {
        plugin_id: PluginId,
        missing: Vec<Permission>,
    },

    #[error("manifest validation failed: {joined}", joined = .errors.join("; "))]
    InvalidManifest { errors: Vec<String> },

    #[error("plugin '{plugin_id}' requires host {required}, running {current}")]
    IncompatibleHostVersion {
        plugin_id: PluginId,
        required: String,
        current: String,
    },

    #[error("source scan blocked load of '{plugin_id}': {joined}", joined = .violations.join("; "))]
    ScanBlocked {
        plugin_id: PluginId,
        violations: Vec<String>,
    },

    #[error("sandbox handshake timed out after {timeout_ms}ms for '{plugin_id}'")]
    HandshakeTimeout { plugin_id: PluginId, timeout_ms: u64 },

    #[error("sandbox call '{method}' timed out after {timeout_ms}ms")]
    CallTimeout { method: String, timeout_ms: u64 },

    #[error("sandbox destroyed")]
    SandboxDestroyed,

    #[error("sandbox handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("api call failed: {0}")]
    ApiCall(String),

    #[error("boundary transport error: {0}")]
    Transport(String),

    #[error("plugin code unavailable for '{plugin_id}': {reason}")]
    CodeUnavailable { plugin_id: PluginId, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_permissions(missing: &[Permission]) -> String {
    let names: Vec<&str> = missing.iter().map(|p| p.identifier()).collect();
    match names.as_slice() {
        [one] => format!("'{one}'"),
        many => format!("permissions [{}]", many.join(", ")),
    }
}
