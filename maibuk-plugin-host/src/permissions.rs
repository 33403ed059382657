//! Grant/revoke bookkeeping against the permission catalog.
//!
//! Checking never mutates and never raises; only `grant`/`revoke` change
//! state, and only the explicit assertion calls produce a typed denial.
//! Privileged operations on unknown plugin ids are deliberate no-ops so a
//! misbehaving caller cannot crash the host by probing.

use std::collections::HashSet;
use std::sync::Arc;

use maibuk_types::PluginId;
use tracing::{debug, info};

use crate::catalog::{Permission, Risk};
use crate::error::PluginHostError;
use crate::registry::PluginRegistry;

/// Result of a pure risk analysis over a permission set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionAnalysis {
    /// Maximum risk across members; `None` for an empty set.
    pub overall_risk: Option<Risk>,
    /// Implied permissions not present in the set itself.
    pub missing_implied: Vec<Permission>,
}

/// Analyzes a permission set against the catalog. No host state involved.
pub fn analyze_permissions(set: &HashSet<Permission>) -> PermissionAnalysis {
    let overall_risk = set.iter().map(|p| p.risk()).max();
    let mut missing_implied = Vec::new();
    for permission in set {
        for implied in permission.implied_closure() {
            if !set.contains(&implied) && !missing_implied.contains(&implied) {
                missing_implied.push(implied);
            }
        }
    }
    missing_implied.sort_by_key(|p| p.identifier());
    PermissionAnalysis {
        overall_risk,
        missing_implied,
    }
}

/// Grants and revokes permissions for installed plugins.
#[derive(Clone)]
pub struct PermissionManager {
    registry: Arc<PluginRegistry>,
}

impl PermissionManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Whether the plugin currently holds `permission`. Unknown ids are
    /// simply `false`.
    pub fn has_permission(&self, plugin_id: &PluginId, permission: Permission) -> bool {
        self.registry
            .get(plugin_id)
            .map(|r| r.granted.contains(&permission))
            .unwrap_or(false)
    }

    /// Grants `permission` plus the transitive closure of its implied
    /// permissions. Idempotent; a no-op for unknown ids.
    pub fn grant(&self, plugin_id: &PluginId, permission: Permission) {
        self.registry.update(plugin_id, |record| {
            record.granted.insert(permission);
            for implied in permission.implied_closure() {
                record.granted.insert(implied);
            }
        });
        debug!(plugin_id = %plugin_id, permission = permission.identifier(), "permission granted");
    }

    /// Revokes exactly `permission` — implied grants stay. If the
    /// permission is manifest-required, the plugin is disabled; optional
    /// grants can be revoked without affecting the enabled flag.
    pub fn revoke(&self, plugin_id: &PluginId, permission: Permission) {
        let disabled = self.registry.update(plugin_id, |record| {
            record.granted.remove(&permission);
            let required = record.manifest.required_permissions();
            if required.contains(&permission) && record.enabled {
                record.enabled = false;
                return true;
            }
            false
        });
        if disabled == Some(true) {
            info!(
                plugin_id = %plugin_id,
                permission = permission.identifier(),
                "required permission revoked, plugin disabled"
            );
        }
    }

    /// Revokes every grant. Used by the uninstall cascade.
    pub fn revoke_all(&self, plugin_id: &PluginId) {
        self.registry.update(plugin_id, |record| {
            record.granted.clear();
            record.enabled = false;
        });
    }

    /// Grants every manifest-required permission (with closures).
    pub fn grant_all_required(&self, plugin_id: &PluginId) {
        let required = match self.registry.get(plugin_id) {
            Some(record) => record.manifest.required_permissions(),
            None => return,
        };
        for permission in required {
            self.grant(plugin_id, permission);
        }
    }

    /// Manifest-required permissions minus the granted set. Empty for
    /// unknown ids — checks never raise.
    pub fn missing_permissions(&self, plugin_id: &PluginId) -> Vec<Permission> {
        self.registry
            .get(plugin_id)
            .map(|r| r.missing_permissions())
            .unwrap_or_default()
    }

    /// True iff every manifest-required permission is granted. Unknown ids
    /// are `false` (loading them fails earlier as not-installed).
    pub fn has_all_required(&self, plugin_id: &PluginId) -> bool {
        self.registry
            .get(plugin_id)
            .map(|r| r.has_all_required())
            .unwrap_or(false)
    }

    /// The only raising surface: a typed denial naming what is missing.
    pub fn assert_permission(
        &self,
        plugin_id: &PluginId,
        permission: Permission,
    ) -> Result<(), PluginHostError> {
        self.assert_permissions(plugin_id, &[permission])
    }

    /// Asserts several permissions at once, naming every missing one.
    pub fn assert_permissions(
        &self,
        plugin_id: &PluginId,
        permissions: &[Permission],
    ) -> Result<(), PluginHostError> {
        let granted = self
            .registry
            .get(plugin_id)
            .map(|r| r.granted)
            .unwrap_or_default();
        let missing: Vec<Permission> = permissions
            .iter()
            .copied()
            .filter(|p| !granted.contains(p))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PluginHostError::PermissionDenied {
                plugin_id: plugin_id.clone(),
                missing,
            })
        }
    }

    /// Snapshot of the granted set. Empty for unknown ids.
    pub fn granted(&self, plugin_id: &PluginId) -> HashSet<Permission> {
        self.registry
            .get(plugin_id)
            .map(|r| r.granted)
            .unwrap_or_default()
    }
}
