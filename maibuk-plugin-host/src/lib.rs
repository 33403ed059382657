//! Capability-gated plugin host for the Maibuk editor.
//!
//! Third-party code is installed, granted a bounded permission set, and
//! run inside an isolation boundary that can only reach the host through
//! a narrow, permission-checked RPC surface.
//!
//! Each plugin runs behind its own [`sandbox::PluginSandbox`] with a
//! derived Content-Security-Policy, a permission-filtered API bridge, and
//! fault isolation: repeated runtime faults auto-disable the plugin
//! without touching the rest of the host.

pub mod boundary;
pub mod bridge;
pub mod catalog;
pub mod config;
mod error;
pub mod faults;
pub mod manifest;
pub mod permissions;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod sandbox;

mod manager;

pub use boundary::{
    BoundaryFactory, BoundaryTransport, ChannelTransport, ExecutionMode, ProcessBoundary,
    ProcessBoundaryFactory, RuntimeCommand, channel_pair,
};
pub use bridge::{ApiBridge, ApiNamespace, ApiResult};
pub use catalog::{ALL_PERMISSIONS, Permission, Risk};
pub use config::HostConfig;
pub use error::PluginHostError;
pub use faults::{FaultRecord, FaultTracker};
pub use manager::{HostApiProvider, LoadedPlugin, PluginCodeStore, PluginHostManager};
pub use manifest::{
    EditorExtensionDecl, PluginAuthor, PluginManifest, PluginType, UiDecl, ValidationReport,
    is_compatible_version, validate,
};
pub use permissions::{PermissionAnalysis, PermissionManager, analyze_permissions};
pub use policy::{ScanViolation, SecurityPolicy, UrlDecision};
pub use protocol::{ExportSurface, SandboxMessage, split_method};
pub use registry::{InstalledPlugin, PluginRegistry};
pub use sandbox::{PluginSandbox, SandboxState, SandboxTimeouts};
