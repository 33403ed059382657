//! Host configuration.
//!
//! Loaded from a TOML file when present; any missing or malformed file
//! falls back to defaults so a broken config can never keep the host from
//! starting.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::boundary::ExecutionMode;

/// Tunables for the plugin host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Handshake deadline for a freshly created sandbox.
    pub handshake_timeout_ms: u64,
    /// Deadline for one host → boundary call.
    pub call_timeout_ms: u64,
    /// Faults within the window that trigger auto-disable.
    pub fault_threshold: usize,
    /// Rolling window for the fault counter.
    pub fault_window_secs: u64,
    /// Retained fault records per plugin.
    pub fault_retention: usize,
    /// Whether scanner findings block a load. Off by default: the scan is
    /// advisory and the sandbox is the boundary.
    pub block_on_scan: bool,
    pub execution_mode: ExecutionMode,
    /// Domains blocked for outbound requests in addition to the built-in
    /// loopback/private-network list. `*` wildcards allowed.
    pub extra_blocked_domains: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            call_timeout_ms: 30_000,
            fault_threshold: 3,
            fault_window_secs: 300,
            fault_retention: 50,
            block_on_scan: false,
            execution_mode: ExecutionMode::Sandboxed,
            extra_blocked_domains: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Loads configuration from a TOML file, falling back to defaults on
    /// a missing or unparseable file.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "no host config file, using defaults");
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded host config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid host config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable host config, using defaults");
                Self::default()
            }
        }
    }
}
