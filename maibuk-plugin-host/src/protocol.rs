//! Sandbox protocol types.
//!
//! Defines the JSON wire format spoken across the isolation boundary in
//! both directions. Only primitive/structured, serializable values cross
//! the boundary; behavior never does.

use maibuk_types::CallId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialized description of what a plugin exports, sent with `ready`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSurface {
    pub has_extension: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_name: Option<String>,
    pub has_on_load: bool,
    pub has_on_unload: bool,
    pub has_settings_panel: bool,
    pub has_sidebar_panel: bool,
}

/// One protocol message, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SandboxMessage {
    /// Host → boundary: transfers the channel endpoint, no body fields.
    Init,
    /// Boundary → host: handshake success with the plugin's exports.
    Ready { exports: ExportSurface },
    /// Boundary → host: handshake failure.
    Error { error: String },
    /// A request for a `namespace.method` invocation (either direction).
    #[serde(rename_all = "camelCase")]
    ApiCall {
        call_id: CallId,
        method: String,
        args: Vec<Value>,
    },
    /// Successful response correlated by call id.
    #[serde(rename_all = "camelCase")]
    ApiResponse { call_id: CallId, result: Value },
    /// Failed response correlated by call id.
    #[serde(rename_all = "camelCase")]
    ApiError { call_id: CallId, error: String },
}

/// Splits a `namespace.method` name into its two parts.
///
/// Malformed names (not exactly two non-empty segments) are call errors
/// for the requester, never protocol-level faults.
pub fn split_method(method: &str) -> Result<(&str, &str), String> {
    match method.split_once('.') {
        Some((ns, m)) if !ns.is_empty() && !m.is_empty() && !m.contains('.') => Ok((ns, m)),
        _ => Err(format!(
            "malformed method name '{method}': expected 'namespace.method'"
        )),
    }
}
