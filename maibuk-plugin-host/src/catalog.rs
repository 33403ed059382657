//! Closed catalog of plugin permissions.
//!
//! Every capability a plugin can hold is listed here, together with its
//! risk classification, the permissions it silently implies, and any
//! Content-Security-Policy additions it contributes. The catalog is
//! versioned with the host; permissions are never combined dynamically.

use serde::{Deserialize, Serialize};

/// Risk classification shown to the user when reviewing a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

/// Individual permission a plugin may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    ContentRead,
    ContentWrite,
    SelectionRead,
    CommandsExecute,
    StorageLocal,
    StorageBook,
    NetworkAccess,
    UiToolbar,
    UiPanel,
    UiModal,
    Notifications,
    ClipboardRead,
    ClipboardWrite,
    SettingsRead,
    BookMetadataRead,
    ChapterListRead,
    ExportHook,
}

/// All catalog members, in declaration order.
pub const ALL_PERMISSIONS: &[Permission] = &[
    Permission::ContentRead,
    Permission::ContentWrite,
    Permission::SelectionRead,
    Permission::CommandsExecute,
    Permission::StorageLocal,
    Permission::StorageBook,
    Permission::NetworkAccess,
    Permission::UiToolbar,
    Permission::UiPanel,
    Permission::UiModal,
    Permission::Notifications,
    Permission::ClipboardRead,
    Permission::ClipboardWrite,
    Permission::SettingsRead,
    Permission::BookMetadataRead,
    Permission::ChapterListRead,
    Permission::ExportHook,
];

impl Permission {
    /// Stable string identifier used in manifests and settings.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::ContentRead => "content-read",
            Self::ContentWrite => "content-write",
            Self::SelectionRead => "selection-read",
            Self::CommandsExecute => "commands-execute",
            Self::StorageLocal => "storage-local",
            Self::StorageBook => "storage-book",
            Self::NetworkAccess => "network-access",
            Self::UiToolbar => "ui-toolbar",
            Self::UiPanel => "ui-panel",
            Self::UiModal => "ui-modal",
            Self::Notifications => "notifications",
            Self::ClipboardRead => "clipboard-read",
            Self::ClipboardWrite => "clipboard-write",
            Self::SettingsRead => "settings-read",
            Self::BookMetadataRead => "book-metadata-read",
            Self::ChapterListRead => "chapter-list-read",
            Self::ExportHook => "export-hook",
        }
    }

    /// Looks up a permission by its manifest identifier.
    pub fn parse_identifier(s: &str) -> Option<Self> {
        ALL_PERMISSIONS.iter().copied().find(|p| p.identifier() == s)
    }

    /// Returns the risk classification for this permission.
    pub fn risk(&self) -> Risk {
        match self {
            Self::NetworkAccess | Self::CommandsExecute | Self::ClipboardRead => Risk::High,
            Self::ContentWrite
            | Self::StorageLocal
            | Self::StorageBook
            | Self::UiModal
            | Self::ClipboardWrite
            | Self::ExportHook => Risk::Medium,
            Self::ContentRead
            | Self::SelectionRead
            | Self::UiToolbar
            | Self::UiPanel
            | Self::Notifications
            | Self::SettingsRead
            | Self::BookMetadataRead
            | Self::ChapterListRead => Risk::Low,
        }
    }

    /// Permissions this one silently requires.
    ///
    /// Granting a permission always grants the transitive closure of this
    /// set as well.
    pub fn implies(&self) -> &'static [Permission] {
        match self {
            Self::ContentWrite => &[Permission::ContentRead],
            Self::SelectionRead => &[Permission::ContentRead],
            Self::ChapterListRead => &[Permission::BookMetadataRead],
            Self::ExportHook => &[Permission::ChapterListRead],
            _ => &[],
        }
    }

    /// Human-readable description shown in permission review UI.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ContentRead => "Read the text of the open chapter",
            Self::ContentWrite => "Modify the text of the open chapter",
            Self::SelectionRead => "Read the current text selection",
            Self::CommandsExecute => "Run editor commands on your behalf",
            Self::StorageLocal => "Store data on this device",
            Self::StorageBook => "Store data inside the current book",
            Self::NetworkAccess => "Send and receive data over the network",
            Self::UiToolbar => "Add buttons to the editor toolbar",
            Self::UiPanel => "Show a panel in the sidebar",
            Self::UiModal => "Open modal dialogs",
            Self::Notifications => "Show notifications",
            Self::ClipboardRead => "Read the clipboard",
            Self::ClipboardWrite => "Write to the clipboard",
            Self::SettingsRead => "Read its own settings",
            Self::BookMetadataRead => "Read book title, author and metadata",
            Self::ChapterListRead => "Read the list of chapters",
            Self::ExportHook => "Participate in book export",
        }
    }

    /// Content-Security-Policy directive values this permission adds.
    ///
    /// Table-driven so new permissions can contribute directives without
    /// touching the CSP generator. Only network access currently adds
    /// anything.
    pub fn csp_additions(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::NetworkAccess => &[("connect-src", "https:"), ("connect-src", "data:")],
            _ => &[],
        }
    }

    /// The transitive closure of implied permissions, excluding `self`.
    pub fn implied_closure(&self) -> Vec<Permission> {
        let mut closure = Vec::new();
        let mut stack: Vec<Permission> = self.implies().to_vec();
        while let Some(p) = stack.pop() {
            if p != *self && !closure.contains(&p) {
                closure.push(p);
                stack.extend_from_slice(p.implies());
            }
        }
        closure
    }
}
