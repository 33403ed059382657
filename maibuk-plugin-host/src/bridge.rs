//! Permission-filtered API bridge.
//!
//! The boundary never holds references to host objects; it requests
//! `namespace.method` invocations by name with JSON arguments. The bridge
//! is a static registry built once per plugin load: namespace → method →
//! handler, with namespaces admitted only when their gating permission was
//! granted. Dispatch is table lookup, never reflection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::catalog::Permission;
use crate::protocol::split_method;

/// Result of one API invocation. The error string travels back to the
/// boundary as an `api-error` message.
pub type ApiResult = Result<Value, String>;

type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, ApiResult> + Send + Sync>;

/// Declares one host API namespace and its methods.
pub struct ApiNamespace {
    name: String,
    /// Permission gating the whole namespace; `None` means always exposed.
    permission: Option<Permission>,
    methods: HashMap<String, Handler>,
}

impl ApiNamespace {
    pub fn new(name: impl Into<String>, permission: Option<Permission>) -> Self {
        Self {
            name: name.into(),
            permission,
            methods: HashMap::new(),
        }
    }

    /// Registers a method handler.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ApiResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| handler(args).boxed());
        self.methods.insert(name.into(), handler);
        self
    }
}

/// The API surface one loaded plugin can reach.
#[derive(Clone, Default)]
pub struct ApiBridge {
    namespaces: Arc<HashMap<String, HashMap<String, Handler>>>,
}

impl ApiBridge {
    /// Builds the bridge from declared namespaces, keeping only those
    /// whose gating permission is in `granted`.
    pub fn build(granted: &HashSet<Permission>, declared: Vec<ApiNamespace>) -> Self {
        let mut namespaces = HashMap::new();
        for ns in declared {
            let admitted = match ns.permission {
                None => true,
                Some(p) => granted.contains(&p),
            };
            if admitted {
                namespaces.insert(ns.name, ns.methods);
            } else {
                debug!(namespace = %ns.name, "namespace withheld, permission not granted");
            }
        }
        Self {
            namespaces: Arc::new(namespaces),
        }
    }

    /// Resolves and invokes `namespace.method`. Unknown namespaces,
    /// unknown methods and malformed names are call errors for the
    /// requester, never host faults.
    pub async fn dispatch(&self, method: &str, args: Vec<Value>) -> ApiResult {
        let (namespace, method_name) = split_method(method)?;
        let methods = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| format!("unknown namespace '{namespace}'"))?;
        let handler = methods
            .get(method_name)
            .ok_or_else(|| format!("unknown method '{method_name}' in namespace '{namespace}'"))?;
        handler(args).await
    }

    /// Namespace names currently exposed, for diagnostics.
    pub fn namespace_names(&self) -> Vec<&str> {
        self.namespaces.keys().map(String::as_str).collect()
    }
}
