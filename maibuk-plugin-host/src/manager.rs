//! Central plugin lifecycle manager.
//!
//! The top-level state machine: verifies permissions, obtains plugin code
//! from the storage collaborator, selects sandboxed or trusted execution,
//! drives load/unload/reload, and isolates faults. Repeated faults inside
//! the rolling window auto-disable the plugin; nothing here ever
//! re-enables one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use maibuk_types::{PluginId, host_version};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::boundary::BoundaryFactory;
use crate::bridge::{ApiBridge, ApiNamespace};
use crate::config::HostConfig;
use crate::error::PluginHostError;
use crate::faults::{FaultRecord, FaultTracker};
use crate::manifest::{self, PluginManifest};
use crate::permissions::PermissionManager;
use crate::policy::SecurityPolicy;
use crate::protocol::ExportSurface;
use crate::registry::{InstalledPlugin, PluginRegistry};
use crate::sandbox::{PluginSandbox, SandboxTimeouts};

/// Storage collaborator that hands out installed plugin source.
#[async_trait]
pub trait PluginCodeStore: Send + Sync {
    async fn load_code(&self, plugin_id: &PluginId) -> Result<String, PluginHostError>;
}

/// Collaborator declaring the host API namespaces a plugin may see.
/// The bridge filters them against the plugin's granted permissions.
pub trait HostApiProvider: Send + Sync {
    fn namespaces(&self, plugin_id: &PluginId) -> Vec<ApiNamespace>;
}

type Cleanup = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// Runtime-only record pairing an installed plugin with its live sandbox.
/// Never persisted; rebuilt on every host restart.
pub struct LoadedPlugin {
    pub sandbox: PluginSandbox,
    pub exports: ExportSurface,
    cleanups: Vec<Cleanup>,
}

/// Per-plugin load state. `Loading` and `Unloading` exist so operations on
/// the same id are never parallelized against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Loading,
    Loaded,
    Unloading,
}

pub struct PluginHostManager {
    config: HostConfig,
    registry: Arc<PluginRegistry>,
    permissions: PermissionManager,
    policy: SecurityPolicy,
    faults: Mutex<FaultTracker>,
    code_store: Arc<dyn PluginCodeStore>,
    boundary_factory: Arc<dyn BoundaryFactory>,
    api_provider: Arc<dyn HostApiProvider>,
    loaded: RwLock<HashMap<PluginId, LoadedPlugin>>,
    states: Mutex<HashMap<PluginId, LoadState>>,
}

impl PluginHostManager {
    pub fn new(
        config: HostConfig,
        registry: Arc<PluginRegistry>,
        code_store: Arc<dyn PluginCodeStore>,
        boundary_factory: Arc<dyn BoundaryFactory>,
        api_provider: Arc<dyn HostApiProvider>,
    ) -> Self {
        let permissions = PermissionManager::new(Arc::clone(&registry));
        let policy = SecurityPolicy::new(config.extra_blocked_domains.clone());
        let faults = Mutex::new(FaultTracker::new(config.fault_retention));
        Self {
            config,
            registry,
            permissions,
            policy,
            faults,
            code_store,
            boundary_factory,
            api_provider,
            loaded: RwLock::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    // ================================================================
    // Installation
    // ================================================================

    /// Validates and installs a manifest. Nothing is mutated when
    /// validation fails; the new record starts disabled with no grants.
    pub fn install(&self, manifest: PluginManifest) -> Result<InstalledPlugin, PluginHostError> {
        let report = manifest::validate(&manifest);
        if !report.is_valid() {
            return Err(PluginHostError::InvalidManifest {
                errors: report.errors,
            });
        }
        for warning in &report.warnings {
            warn!(plugin_id = %manifest.id, warning = %warning, "manifest warning");
        }

        let plugin_id = PluginId::new_unchecked(manifest.id.clone());

        let current = host_version();
        if !manifest::is_compatible_version(&manifest.maibuk_version, &current) {
            return Err(PluginHostError::IncompatibleHostVersion {
                plugin_id,
                required: manifest.maibuk_version.clone(),
                current: current.to_string(),
            });
        }

        let record = self.registry.insert(plugin_id.clone(), manifest);
        info!(plugin_id = %plugin_id, version = %record.manifest.version, "plugin installed");
        Ok(record)
    }

    /// Uninstalls a plugin: unloads it if loaded, revokes every grant,
    /// drops fault history and the installed record.
    pub async fn uninstall(&self, plugin_id: &PluginId) -> Result<(), PluginHostError> {
        if !self.registry.contains(plugin_id) {
            return Err(PluginHostError::NotInstalled(plugin_id.clone()));
        }
        if self.is_loaded(plugin_id).await {
            self.unload(plugin_id).await?;
        }
        self.permissions.revoke_all(plugin_id);
        self.faults.lock().clear(plugin_id);
        self.registry.remove(plugin_id);
        info!(plugin_id = %plugin_id, "plugin uninstalled");
        Ok(())
    }

    /// Enables a plugin. Fails with a denial naming the missing
    /// permissions when the granted set does not cover the required set.
    pub fn enable(&self, plugin_id: &PluginId) -> Result<(), PluginHostError> {
        let record = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginHostError::NotInstalled(plugin_id.clone()))?;
        let missing = record.missing_permissions();
        if !missing.is_empty() {
            return Err(PluginHostError::PermissionDenied {
                plugin_id: plugin_id.clone(),
                missing,
            });
        }
        self.registry.set_enabled(plugin_id, true);
        Ok(())
    }

    /// Disables a plugin. The loaded sandbox, if any, stays untouched
    /// until an explicit unload.
    pub fn disable(&self, plugin_id: &PluginId) -> Result<(), PluginHostError> {
        if self.registry.set_enabled(plugin_id, false).is_none() {
            return Err(PluginHostError::NotInstalled(plugin_id.clone()));
        }
        Ok(())
    }

    // ================================================================
    // Load / unload / reload
    // ================================================================

    /// Loads an installed, enabled plugin into a fresh sandbox.
    pub async fn load(&self, plugin_id: &PluginId) -> Result<ExportSurface, PluginHostError> {
        let record = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginHostError::NotInstalled(plugin_id.clone()))?;
        if !record.enabled {
            return Err(PluginHostError::Disabled(plugin_id.clone()));
        }
        let missing = record.missing_permissions();
        if !missing.is_empty() {
            return Err(PluginHostError::PermissionDenied {
                plugin_id: plugin_id.clone(),
                missing,
            });
        }

        {
            let mut states = self.states.lock();
            if states.contains_key(plugin_id) {
                return Err(PluginHostError::AlreadyLoaded(plugin_id.clone()));
            }
            states.insert(plugin_id.clone(), LoadState::Loading);
        }

        match self.load_inner(plugin_id, &record).await {
            Ok(exports) => {
                self.states
                    .lock()
                    .insert(plugin_id.clone(), LoadState::Loaded);
                info!(plugin_id = %plugin_id, "plugin loaded");
                Ok(exports)
            }
            Err(e) => {
                // The error exit from loading leaves the plugin not-loaded
                // and produces a fault record.
                self.states.lock().remove(plugin_id);
                self.report_fault(plugin_id, format!("load failed: {e}"), None);
                Err(e)
            }
        }
    }

    async fn load_inner(
        &self,
        plugin_id: &PluginId,
        record: &InstalledPlugin,
    ) -> Result<ExportSurface, PluginHostError> {
        let code = self.code_store.load_code(plugin_id).await?;

        let violations = self.policy.scan_source(&code);
        for violation in &violations {
            warn!(
                plugin_id = %plugin_id,
                name = violation.name,
                line = ?violation.line,
                "source scan finding"
            );
        }
        if self.config.block_on_scan && !violations.is_empty() {
            return Err(PluginHostError::ScanBlocked {
                plugin_id: plugin_id.clone(),
                violations: violations.iter().map(|v| v.name.to_string()).collect(),
            });
        }

        let csp = self.policy.build_csp(&record.granted);
        let transport = self
            .boundary_factory
            .create(plugin_id, &code, &csp, self.config.execution_mode)
            .await?;

        let bridge = ApiBridge::build(&record.granted, self.api_provider.namespaces(plugin_id));
        let timeouts = SandboxTimeouts {
            handshake: std::time::Duration::from_millis(self.config.handshake_timeout_ms),
            call: std::time::Duration::from_millis(self.config.call_timeout_ms),
        };
        let sandbox = PluginSandbox::new(plugin_id.clone(), transport, bridge, timeouts);

        let exports = sandbox.initialize().await?;

        if exports.has_on_load {
            // Hook failures are recorded, never propagated: the plugin is
            // loaded either way.
            if let Err(e) = sandbox.call("plugin.onLoad", vec![]).await {
                self.report_fault(plugin_id, format!("onLoad failed: {e}"), None);
            }
        }
        sandbox.mark_active();

        self.loaded.write().await.insert(
            plugin_id.clone(),
            LoadedPlugin {
                sandbox,
                exports: exports.clone(),
                cleanups: Vec::new(),
            },
        );
        Ok(exports)
    }

    /// Unloads a plugin: runs `onUnload` and every cleanup callback with
    /// failures isolated, destroys the sandbox, removes the runtime
    /// record.
    pub async fn unload(&self, plugin_id: &PluginId) -> Result<(), PluginHostError> {
        {
            let mut states = self.states.lock();
            match states.get(plugin_id).copied() {
                Some(LoadState::Loaded) => {
                    states.insert(plugin_id.clone(), LoadState::Unloading);
                }
                _ => return Err(PluginHostError::NotLoaded(plugin_id.clone())),
            }
        }
        let Some(loaded) = self.loaded.write().await.remove(plugin_id) else {
            self.states.lock().remove(plugin_id);
            return Err(PluginHostError::NotLoaded(plugin_id.clone()));
        };

        if loaded.exports.has_on_unload {
            if let Err(e) = loaded.sandbox.call("plugin.onUnload", vec![]).await {
                self.report_fault(plugin_id, format!("onUnload failed: {e}"), None);
            }
        }

        for cleanup in loaded.cleanups {
            if let Err(e) = cleanup() {
                warn!(plugin_id = %plugin_id, error = %e, "cleanup callback failed");
            }
        }

        loaded.sandbox.destroy().await;
        self.states.lock().remove(plugin_id);
        info!(plugin_id = %plugin_id, "plugin unloaded");
        Ok(())
    }

    /// Unload followed by load.
    pub async fn reload(&self, plugin_id: &PluginId) -> Result<ExportSurface, PluginHostError> {
        self.unload(plugin_id).await?;
        self.load(plugin_id).await
    }

    pub async fn is_loaded(&self, plugin_id: &PluginId) -> bool {
        self.loaded.read().await.contains_key(plugin_id)
    }

    pub async fn loaded_ids(&self) -> Vec<PluginId> {
        self.loaded.read().await.keys().cloned().collect()
    }

    /// Handle to the live sandbox of a loaded plugin.
    pub async fn sandbox(&self, plugin_id: &PluginId) -> Option<PluginSandbox> {
        self.loaded
            .read()
            .await
            .get(plugin_id)
            .map(|l| l.sandbox.clone())
    }

    /// Export surface of a loaded plugin.
    pub async fn exports(&self, plugin_id: &PluginId) -> Option<ExportSurface> {
        self.loaded
            .read()
            .await
            .get(plugin_id)
            .map(|l| l.exports.clone())
    }

    /// Registers a cleanup callback to run when the plugin unloads.
    pub async fn add_cleanup(
        &self,
        plugin_id: &PluginId,
        cleanup: impl FnOnce() -> Result<(), String> + Send + 'static,
    ) -> Result<(), PluginHostError> {
        let mut loaded = self.loaded.write().await;
        match loaded.get_mut(plugin_id) {
            Some(entry) => {
                entry.cleanups.push(Box::new(cleanup));
                Ok(())
            }
            None => Err(PluginHostError::NotLoaded(plugin_id.clone())),
        }
    }

    // ================================================================
    // Faults and auto-disable
    // ================================================================

    /// Records a runtime fault attributed to a plugin and applies the
    /// auto-disable policy.
    pub fn report_fault(&self, plugin_id: &PluginId, message: String, stack: Option<String>) {
        self.report_fault_at(plugin_id, message, stack, Utc::now());
    }

    /// Timestamped variant, for callers replaying buffered crash reports.
    pub fn report_fault_at(
        &self,
        plugin_id: &PluginId,
        message: String,
        stack: Option<String>,
        occurred_at: DateTime<Utc>,
    ) {
        let count = {
            let mut faults = self.faults.lock();
            faults.record_at(plugin_id, message.clone(), stack, occurred_at);
            faults.count_within(
                plugin_id,
                ChronoDuration::seconds(self.config.fault_window_secs as i64),
                occurred_at,
            )
        };
        warn!(plugin_id = %plugin_id, message = %message, fault_count = count, "plugin fault");

        if count >= self.config.fault_threshold {
            let enabled = self.registry.get(plugin_id).map(|r| r.enabled);
            if enabled == Some(true) {
                self.registry.set_enabled(plugin_id, false);
                warn!(
                    plugin_id = %plugin_id,
                    faults = count,
                    window_secs = self.config.fault_window_secs,
                    "plugin auto-disabled after repeated faults"
                );
            }
        }
    }

    /// Retained fault records for a plugin, oldest first.
    pub fn fault_history(&self, plugin_id: &PluginId) -> Vec<FaultRecord> {
        self.faults
            .lock()
            .history(plugin_id)
            .into_iter()
            .cloned()
            .collect()
    }
}
