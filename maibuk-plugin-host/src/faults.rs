//! Runtime fault records and the rolling-window counter that feeds
//! auto-disable.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use maibuk_types::PluginId;
use serde::Serialize;

/// One runtime error attributed to a plugin.
#[derive(Debug, Clone, Serialize)]
pub struct FaultRecord {
    pub plugin_id: PluginId,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub stack: Option<String>,
}

/// Per-plugin fault history, capped at a fixed retention (oldest trimmed
/// first).
#[derive(Debug)]
pub struct FaultTracker {
    retention: usize,
    faults: HashMap<PluginId, VecDeque<FaultRecord>>,
}

impl FaultTracker {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            faults: HashMap::new(),
        }
    }

    /// Records a fault now and returns the record.
    pub fn record(
        &mut self,
        plugin_id: &PluginId,
        message: impl Into<String>,
        stack: Option<String>,
    ) -> FaultRecord {
        self.record_at(plugin_id, message, stack, Utc::now())
    }

    /// Records a fault at an explicit time. Split out so tests control the
    /// clock.
    pub fn record_at(
        &mut self,
        plugin_id: &PluginId,
        message: impl Into<String>,
        stack: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> FaultRecord {
        let record = FaultRecord {
            plugin_id: plugin_id.clone(),
            message: message.into(),
            occurred_at,
            stack,
        };
        let history = self.faults.entry(plugin_id.clone()).or_default();
        history.push_back(record.clone());
        while history.len() > self.retention {
            history.pop_front();
        }
        record
    }

    /// Number of retained faults within `window` before `now`.
    pub fn count_within(&self, plugin_id: &PluginId, window: Duration, now: DateTime<Utc>) -> usize {
        self.faults
            .get(plugin_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|f| now.signed_duration_since(f.occurred_at) <= window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// All retained faults for a plugin, oldest first.
    pub fn history(&self, plugin_id: &PluginId) -> Vec<&FaultRecord> {
        self.faults
            .get(plugin_id)
            .map(|h| h.iter().collect())
            .unwrap_or_default()
    }

    /// Drops all history for a plugin (on uninstall).
    pub fn clear(&mut self, plugin_id: &PluginId) {
        self.faults.remove(plugin_id);
    }
}
