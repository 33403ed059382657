//! Plugin manifest (`plugin.json`) parsing and validation.
//!
//! Validation is a pure function over the deserialized manifest: it never
//! touches host state and reports every problem it finds rather than
//! stopping at the first. Host-version compatibility uses a simplified
//! range grammar (`*`, `>=`, `^`, exact); unrecognized range syntax is
//! treated permissively rather than rejected.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use maibuk_types::PluginId;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::catalog::Permission;

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_URL_LEN: usize = 200;
const MAX_LICENSE_LEN: usize = 50;
const MAX_KEYWORDS: usize = 10;
const MAX_KEYWORD_LEN: usize = 30;
const MAX_PERMISSION_ENTRIES: usize = 16;
const MAX_DEPENDENCY_ENTRIES: usize = 8;

/// Declared plugin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginType {
    Utility,
    EditorExtension,
    Exporter,
    Theme,
}

/// Extension kinds the editor can re-host.
pub const EXTENSION_TYPES: &[&str] = &["node", "mark", "command", "decorator"];

/// Author block of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Nested descriptor required when `type` is `editor-extension`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorExtensionDecl {
    #[serde(default)]
    pub extension_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Optional UI integration declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiDecl {
    #[serde(default)]
    pub settings_panel: bool,
    #[serde(default)]
    pub toolbar_button: bool,
    #[serde(default)]
    pub sidebar_panel: bool,
}

/// Immutable description of a plugin supplied at install time.
///
/// Permission arrays are kept as raw strings so validation can report
/// disallowed identifiers instead of failing wholesale during parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<PluginAuthor>,
    #[serde(default)]
    pub main: String,
    #[serde(rename = "type", default)]
    pub plugin_type: Option<PluginType>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub optional_permissions: Vec<String>,
    #[serde(default)]
    pub maibuk_version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub editor_extension: Option<EditorExtensionDecl>,
    #[serde(default)]
    pub ui: Option<UiDecl>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl PluginManifest {
    /// Parses a manifest from `plugin.json` contents.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns the validated plugin id, if the raw id is well-formed.
    pub fn plugin_id(&self) -> Option<PluginId> {
        PluginId::parse(&self.id).ok()
    }

    /// Manifest-required permissions that exist in the catalog.
    pub fn required_permissions(&self) -> Vec<Permission> {
        parse_permission_list(&self.permissions)
    }

    /// Optional permissions that exist in the catalog.
    pub fn optional_permission_set(&self) -> Vec<Permission> {
        parse_permission_list(&self.optional_permissions)
    }
}

fn parse_permission_list(raw: &[String]) -> Vec<Permission> {
    let mut out = Vec::new();
    for s in raw {
        if let Some(p) = Permission::parse_identifier(s) {
            if !out.contains(&p) {
                out.push(p);
            }
        }
    }
    out
}

/// Outcome of manifest validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Validates a manifest's shape, types and ranges.
pub fn validate(manifest: &PluginManifest) -> ValidationReport {
    let mut report = ValidationReport::default();

    if manifest.id.is_empty() {
        report.error("missing required field 'id'");
    } else if PluginId::parse(&manifest.id).is_err() {
        report.error(format!(
            "'id' must be a reverse-domain identifier, got '{}'",
            manifest.id
        ));
    }

    if manifest.name.is_empty() {
        report.error("missing required field 'name'");
    } else if manifest.name.len() > MAX_NAME_LEN {
        report.error(format!("'name' exceeds {MAX_NAME_LEN} characters"));
    }

    if manifest.version.is_empty() {
        report.error("missing required field 'version'");
    } else if Version::parse(&manifest.version).is_err() {
        report.error(format!(
            "'version' must be strict semver, got '{}'",
            manifest.version
        ));
    }

    if manifest.description.is_empty() {
        report.error("missing required field 'description'");
    } else if manifest.description.len() > MAX_DESCRIPTION_LEN {
        report.warn(format!("'description' exceeds {MAX_DESCRIPTION_LEN} characters"));
    }

    match &manifest.author {
        None => report.error("missing required field 'author'"),
        Some(author) => {
            if author.name.is_empty() {
                report.error("'author.name' must not be empty");
            }
            if let Some(url) = &author.url {
                if url.len() > MAX_URL_LEN {
                    report.warn(format!("'author.url' exceeds {MAX_URL_LEN} characters"));
                }
            }
        }
    }

    validate_entry_point(&manifest.main, &mut report);

    if manifest.plugin_type.is_none() {
        report.error("missing required field 'type'");
    }

    if manifest.plugin_type == Some(PluginType::EditorExtension) {
        match &manifest.editor_extension {
            None => report.error("'type' is 'editor-extension' but 'editorExtension' is missing"),
            Some(decl) => validate_extension_decl(decl, &mut report),
        }
    }

    validate_permission_entries("permissions", &manifest.permissions, &mut report);
    validate_permission_entries(
        "optionalPermissions",
        &manifest.optional_permissions,
        &mut report,
    );

    if manifest.maibuk_version.is_empty() {
        report.error("missing required field 'maibukVersion'");
    } else if !is_recognized_range(&manifest.maibuk_version) {
        // Unrecognized ranges pass the compatibility check permissively.
        report.warn(format!(
            "'maibukVersion' range '{}' is not recognized and will match any host",
            manifest.maibuk_version
        ));
    }

    if manifest.dependencies.len() > MAX_DEPENDENCY_ENTRIES {
        report.error(format!(
            "'dependencies' exceeds {MAX_DEPENDENCY_ENTRIES} entries"
        ));
    }
    for (dep_id, range) in &manifest.dependencies {
        if PluginId::parse(dep_id).is_err() {
            report.error(format!("dependency id '{dep_id}' is not a valid plugin id"));
        }
        if !is_recognized_range(range) {
            report.error(format!(
                "dependency '{dep_id}' has malformed version range '{range}'"
            ));
        }
    }

    if let Some(license) = &manifest.license {
        if license.len() > MAX_LICENSE_LEN {
            report.warn(format!("'license' exceeds {MAX_LICENSE_LEN} characters"));
        }
    }
    for (field, value) in [("homepage", &manifest.homepage), ("repository", &manifest.repository)] {
        if let Some(v) = value {
            if v.len() > MAX_URL_LEN {
                report.warn(format!("'{field}' exceeds {MAX_URL_LEN} characters"));
            }
        }
    }
    if manifest.keywords.len() > MAX_KEYWORDS {
        report.warn(format!("'keywords' exceeds {MAX_KEYWORDS} entries"));
    }
    for kw in &manifest.keywords {
        if kw.len() > MAX_KEYWORD_LEN {
            report.warn(format!("keyword '{kw}' exceeds {MAX_KEYWORD_LEN} characters"));
        }
    }

    report
}

/// The entry point must stay strictly inside the plugin's own file tree.
fn validate_entry_point(main: &str, report: &mut ValidationReport) {
    if main.is_empty() {
        report.error("missing required field 'main'");
        return;
    }
    let path = Path::new(main);
    if path.is_absolute() {
        report.error("'main' must be a relative path");
        return;
    }
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                report.error("'main' must not contain path traversal");
                return;
            }
            _ => {}
        }
    }
    if !main.ends_with(".js") {
        report.error("'main' must point to a .js entry file");
    }
}

fn validate_extension_decl(decl: &EditorExtensionDecl, report: &mut ValidationReport) {
    if decl.extension_type.is_empty() {
        report.error("'editorExtension.extensionType' must not be empty");
    } else if !EXTENSION_TYPES.contains(&decl.extension_type.as_str()) {
        report.error(format!(
            "'editorExtension.extensionType' must be one of {EXTENSION_TYPES:?}, got '{}'",
            decl.extension_type
        ));
    }
    if decl.name.is_empty() {
        report.error("'editorExtension.name' must not be empty");
    }
    if let Some(priority) = decl.priority {
        if !(0..=1000).contains(&priority) {
            report.error(format!(
                "'editorExtension.priority' must be within 0..=1000, got {priority}"
            ));
        }
    }
}

fn validate_permission_entries(field: &str, entries: &[String], report: &mut ValidationReport) {
    if entries.len() > MAX_PERMISSION_ENTRIES {
        report.error(format!("'{field}' exceeds {MAX_PERMISSION_ENTRIES} entries"));
    }
    let mut seen = Vec::new();
    for entry in entries {
        if Permission::parse_identifier(entry).is_none() {
            report.error(format!("'{field}' contains unknown permission '{entry}'"));
        }
        if seen.contains(&entry) {
            report.warn(format!("'{field}' lists '{entry}' more than once"));
        }
        seen.push(entry);
    }
}

/// Checks a declared host-version range against the running host version.
///
/// Supported: `*`, `>=x.y.z`, `^x.y.z` (with 0.x minor-locking), and exact
/// `x.y.z`. Anything else passes permissively.
pub fn is_compatible_version(range: &str, current: &Version) -> bool {
    let range = range.trim();
    if range == "*" {
        return true;
    }
    if let Some(rest) = range.strip_prefix(">=") {
        return match Version::parse(rest.trim()) {
            Ok(min) => *current >= min,
            Err(_) => true,
        };
    }
    if let Some(rest) = range.strip_prefix('^') {
        return match Version::parse(rest.trim()) {
            Ok(base) => {
                if base.major > 0 {
                    current.major == base.major && *current >= base
                } else {
                    // 0.x releases lock to the minor version.
                    current.major == 0 && current.minor == base.minor && *current >= base
                }
            }
            Err(_) => true,
        };
    }
    match Version::parse(range) {
        Ok(exact) => *current == exact,
        Err(_) => true,
    }
}

fn is_recognized_range(range: &str) -> bool {
    let range = range.trim();
    if range == "*" {
        return true;
    }
    let body = range
        .strip_prefix(">=")
        .or_else(|| range.strip_prefix('^'))
        .unwrap_or(range);
    Version::parse(body.trim()).is_ok()
}
