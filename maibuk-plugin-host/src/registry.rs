//! Installed-plugin records.
//!
//! The registry is the only mutable state shared between the permission
//! manager and the lifecycle orchestrator. Every mutation is a
//! read-modify-write under the map's write lock, which gives per-key
//! atomicity when faults and permission changes interleave.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use maibuk_types::PluginId;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::catalog::Permission;
use crate::manifest::PluginManifest;

/// Mutable runtime record for one installed plugin.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledPlugin {
    pub manifest: PluginManifest,
    pub enabled: bool,
    /// Granted permissions — a superset of the required set once enabled,
    /// and possibly larger than declared due to implied permissions.
    pub granted: HashSet<Permission>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settings: serde_json::Map<String, Value>,
    pub storage_used_bytes: u64,
}

impl InstalledPlugin {
    fn new(manifest: PluginManifest, now: DateTime<Utc>) -> Self {
        Self {
            manifest,
            enabled: false,
            granted: HashSet::new(),
            installed_at: now,
            updated_at: now,
            settings: serde_json::Map::new(),
            storage_used_bytes: 0,
        }
    }

    /// Manifest-required permissions still missing from the granted set.
    pub fn missing_permissions(&self) -> Vec<Permission> {
        self.manifest
            .required_permissions()
            .into_iter()
            .filter(|p| !self.granted.contains(p))
            .collect()
    }

    pub fn has_all_required(&self) -> bool {
        self.missing_permissions().is_empty()
    }
}

/// Thread-safe map of installed plugins keyed by manifest id.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<PluginId, InstalledPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record for a freshly installed plugin, disabled until
    /// its required permissions are granted. Replaces any prior record for
    /// the same id.
    pub fn insert(&self, plugin_id: PluginId, manifest: PluginManifest) -> InstalledPlugin {
        let record = InstalledPlugin::new(manifest, Utc::now());
        self.plugins.write().insert(plugin_id, record.clone());
        record
    }

    /// Removes a record, returning it if present.
    pub fn remove(&self, plugin_id: &PluginId) -> Option<InstalledPlugin> {
        self.plugins.write().remove(plugin_id)
    }

    pub fn contains(&self, plugin_id: &PluginId) -> bool {
        self.plugins.read().contains_key(plugin_id)
    }

    /// Snapshot of one record.
    pub fn get(&self, plugin_id: &PluginId) -> Option<InstalledPlugin> {
        self.plugins.read().get(plugin_id).cloned()
    }

    /// Snapshot of all records, unordered.
    pub fn list(&self) -> Vec<InstalledPlugin> {
        self.plugins.read().values().cloned().collect()
    }

    /// Atomically mutates one record. Returns `None` for unknown ids.
    pub fn update<R>(
        &self,
        plugin_id: &PluginId,
        f: impl FnOnce(&mut InstalledPlugin) -> R,
    ) -> Option<R> {
        let mut plugins = self.plugins.write();
        plugins.get_mut(plugin_id).map(|record| {
            let result = f(record);
            record.updated_at = Utc::now();
            result
        })
    }

    /// Flips the enabled flag. Enabling requires the granted set to cover
    /// every manifest-required permission; disabling always succeeds.
    /// Returns the resulting enabled state, or `None` for unknown ids.
    pub fn set_enabled(&self, plugin_id: &PluginId, enabled: bool) -> Option<bool> {
        self.update(plugin_id, |record| {
            if enabled && !record.has_all_required() {
                return record.enabled;
            }
            record.enabled = enabled;
            record.enabled
        })
    }

    /// Merges a settings patch into the record's free-form settings.
    pub fn update_settings(&self, plugin_id: &PluginId, patch: serde_json::Map<String, Value>) {
        self.update(plugin_id, |record| {
            for (k, v) in patch {
                record.settings.insert(k, v);
            }
        });
    }

    /// Adjusts the storage-usage counter by a signed delta, saturating at
    /// zero.
    pub fn adjust_storage_usage(&self, plugin_id: &PluginId, delta: i64) {
        self.update(plugin_id, |record| {
            record.storage_used_bytes = if delta >= 0 {
                record.storage_used_bytes.saturating_add(delta as u64)
            } else {
                record.storage_used_bytes.saturating_sub(delta.unsigned_abs())
            };
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PluginAuthor, PluginType};

    fn manifest(id: &str, required: &[&str]) -> PluginManifest {
        PluginManifest {
            id: id.to_string(),
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            description: "test plugin".to_string(),
            author: Some(PluginAuthor {
                name: "Author".to_string(),
                email: None,
                url: None,
            }),
            main: "index.js".to_string(),
            plugin_type: Some(PluginType::Utility),
            permissions: required.iter().map(|s| s.to_string()).collect(),
            optional_permissions: Vec::new(),
            maibuk_version: "*".to_string(),
            dependencies: Default::default(),
            editor_extension: None,
            ui: None,
            license: None,
            homepage: None,
            repository: None,
            keywords: Vec::new(),
        }
    }

    fn pid(s: &str) -> PluginId {
        PluginId::new_unchecked(s)
    }

    #[test]
    fn insert_starts_disabled_with_no_grants() {
        let registry = PluginRegistry::new();
        let record = registry.insert(pid("com.example.a"), manifest("com.example.a", &["content-read"]));
        assert!(!record.enabled);
        assert!(record.granted.is_empty());
        assert_eq!(record.missing_permissions(), vec![Permission::ContentRead]);
    }

    #[test]
    fn enable_refused_while_required_missing() {
        let registry = PluginRegistry::new();
        let id = pid("com.example.a");
        registry.insert(id.clone(), manifest("com.example.a", &["content-read"]));

        assert_eq!(registry.set_enabled(&id, true), Some(false));

        registry.update(&id, |r| {
            r.granted.insert(Permission::ContentRead);
        });
        assert_eq!(registry.set_enabled(&id, true), Some(true));
    }

    #[test]
    fn disable_always_succeeds() {
        let registry = PluginRegistry::new();
        let id = pid("com.example.a");
        registry.insert(id.clone(), manifest("com.example.a", &[]));
        assert_eq!(registry.set_enabled(&id, true), Some(true));
        assert_eq!(registry.set_enabled(&id, false), Some(false));
    }

    #[test]
    fn unknown_id_is_none() {
        let registry = PluginRegistry::new();
        assert!(registry.get(&pid("com.example.ghost")).is_none());
        assert_eq!(registry.set_enabled(&pid("com.example.ghost"), true), None);
        assert!(registry.update(&pid("com.example.ghost"), |_| ()).is_none());
    }

    #[test]
    fn remove_returns_the_record() {
        let registry = PluginRegistry::new();
        let id = pid("com.example.a");
        registry.insert(id.clone(), manifest("com.example.a", &[]));
        assert!(registry.remove(&id).is_some());
        assert!(!registry.contains(&id));
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn storage_usage_saturates_at_zero() {
        let registry = PluginRegistry::new();
        let id = pid("com.example.a");
        registry.insert(id.clone(), manifest("com.example.a", &[]));
        registry.adjust_storage_usage(&id, 1024);
        registry.adjust_storage_usage(&id, -2048);
        assert_eq!(registry.get(&id).unwrap().storage_used_bytes, 0);
    }

    #[test]
    fn settings_patches_merge() {
        let registry = PluginRegistry::new();
        let id = pid("com.example.a");
        registry.insert(id.clone(), manifest("com.example.a", &[]));

        let mut patch = serde_json::Map::new();
        patch.insert("theme".to_string(), Value::from("dark"));
        registry.update_settings(&id, patch);

        let mut patch2 = serde_json::Map::new();
        patch2.insert("limit".to_string(), Value::from(10));
        registry.update_settings(&id, patch2);

        let record = registry.get(&id).unwrap();
        assert_eq!(record.settings["theme"], "dark");
        assert_eq!(record.settings["limit"], 10);
    }
}
