//! Individual plugin sandbox — one isolation boundary per loaded plugin.
//!
//! Owns the boundary transport and the request/response machinery in both
//! directions: the host calls lifecycle hooks whose implementation lives
//! inside the boundary, and the boundary requests permission-gated
//! `namespace.method` invocations through the API bridge. Responses are
//! correlated solely by call id; no ordering is assumed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use maibuk_types::{CallId, PluginId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::boundary::BoundaryTransport;
use crate::bridge::ApiBridge;
use crate::error::PluginHostError;
use crate::protocol::{ExportSurface, SandboxMessage};

/// Lifecycle of one sandbox instance. Errors at any point transition
/// directly to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Initializing,
    Ready,
    Active,
    Destroyed,
}

/// Per-sandbox timeouts, taken from the host config at creation.
#[derive(Debug, Clone)]
pub struct SandboxTimeouts {
    pub handshake: Duration,
    pub call: Duration,
}

impl Default for SandboxTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            call: Duration::from_secs(30),
        }
    }
}

type PendingCall = oneshot::Sender<Result<Value, PluginHostError>>;

struct Inner {
    plugin_id: PluginId,
    transport: Box<dyn BoundaryTransport>,
    bridge: ApiBridge,
    timeouts: SandboxTimeouts,
    state: Mutex<SandboxState>,
    pending: RwLock<HashMap<CallId, PendingCall>>,
    handshake_tx: Mutex<Option<oneshot::Sender<Result<ExportSurface, String>>>>,
    exports: Mutex<Option<ExportSurface>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

/// A sandboxed plugin instance. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct PluginSandbox {
    inner: Arc<Inner>,
}

impl PluginSandbox {
    pub fn new(
        plugin_id: PluginId,
        transport: Box<dyn BoundaryTransport>,
        bridge: ApiBridge,
        timeouts: SandboxTimeouts,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                plugin_id,
                transport,
                bridge,
                timeouts,
                state: Mutex::new(SandboxState::Created),
                pending: RwLock::new(HashMap::new()),
                handshake_tx: Mutex::new(None),
                exports: Mutex::new(None),
                recv_task: Mutex::new(None),
            }),
        }
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.inner.plugin_id
    }

    pub fn state(&self) -> SandboxState {
        *self.inner.state.lock()
    }

    /// The export surface reported during the handshake, once ready.
    pub fn exports(&self) -> Option<ExportSurface> {
        self.inner.exports.lock().clone()
    }

    /// Number of in-flight outbound calls. Exposed for tests and metrics.
    pub async fn pending_call_count(&self) -> usize {
        self.inner.pending.read().await.len()
    }

    /// Performs the handshake: transfers the channel endpoint with a
    /// single `init` message and waits for `ready` or `error`, bounded by
    /// the handshake timeout. Expiry or failure destroys the instance.
    pub async fn initialize(&self) -> Result<ExportSurface, PluginHostError> {
        {
            let mut state = self.inner.state.lock();
            if *state != SandboxState::Created {
                return Err(PluginHostError::HandshakeFailed(format!(
                    "initialize called in state {state:?}"
                )));
            }
            *state = SandboxState::Initializing;
        }

        let (tx, rx) = oneshot::channel();
        *self.inner.handshake_tx.lock() = Some(tx);

        self.spawn_recv_loop();

        if let Err(e) = self.inner.transport.send(SandboxMessage::Init).await {
            self.destroy().await;
            return Err(e);
        }

        let timeout = self.inner.timeouts.handshake;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(exports))) => {
                *self.inner.exports.lock() = Some(exports.clone());
                *self.inner.state.lock() = SandboxState::Ready;
                debug!(plugin_id = %self.inner.plugin_id, "sandbox ready");
                Ok(exports)
            }
            Ok(Ok(Err(error))) => {
                self.destroy().await;
                Err(PluginHostError::HandshakeFailed(error))
            }
            Ok(Err(_)) => {
                self.destroy().await;
                Err(PluginHostError::HandshakeFailed(
                    "boundary closed during handshake".to_string(),
                ))
            }
            Err(_) => {
                self.destroy().await;
                Err(PluginHostError::HandshakeTimeout {
                    plugin_id: self.inner.plugin_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Marks the sandbox active once the load sequence completed.
    pub fn mark_active(&self) {
        let mut state = self.inner.state.lock();
        if *state == SandboxState::Ready {
            *state = SandboxState::Active;
        }
    }

    /// Invokes a method inside the boundary (lifecycle hooks live there).
    ///
    /// Each call gets a fresh id and races the response against the call
    /// timeout; exactly one of resolve/reject fires per id and the pending
    /// entry is removed immediately after. A timed-out call does not tear
    /// down an otherwise healthy sandbox.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, PluginHostError> {
        if self.state() == SandboxState::Destroyed {
            return Err(PluginHostError::SandboxDestroyed);
        }

        let call_id = CallId::new();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.write().await.insert(call_id, tx);

        // A destroy racing the insert above would have drained the table
        // already; re-check so the entry cannot outlive the sandbox.
        if self.state() == SandboxState::Destroyed {
            self.inner.pending.write().await.remove(&call_id);
            return Err(PluginHostError::SandboxDestroyed);
        }

        let message = SandboxMessage::ApiCall {
            call_id,
            method: method.to_string(),
            args,
        };
        if let Err(e) = self.inner.transport.send(message).await {
            self.inner.pending.write().await.remove(&call_id);
            return Err(e);
        }

        let timeout = self.inner.timeouts.call;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PluginHostError::SandboxDestroyed),
            Err(_) => {
                // Late responses find no entry and are silently ignored.
                self.inner.pending.write().await.remove(&call_id);
                Err(PluginHostError::CallTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Tears the sandbox down. Idempotent: every still-pending call is
    /// rejected with a destroyed error, the channel is closed, and no call
    /// can succeed afterwards.
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == SandboxState::Destroyed {
                return;
            }
            *state = SandboxState::Destroyed;
        }

        // Stop the receive loop first: it may be parked inside the
        // transport, and closing the channel needs that slot back.
        if let Some(task) = self.inner.recv_task.lock().take() {
            task.abort();
        }

        // Reject the handshake if it is still waiting.
        if let Some(tx) = self.inner.handshake_tx.lock().take() {
            let _ = tx.send(Err("sandbox destroyed".to_string()));
        }

        let mut pending = self.inner.pending.write().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(PluginHostError::SandboxDestroyed));
        }
        drop(pending);

        self.inner.transport.close().await;
        debug!(plugin_id = %self.inner.plugin_id, "sandbox destroyed");
    }

    fn spawn_recv_loop(&self) {
        let sandbox = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match sandbox.inner.transport.recv().await {
                    Some(message) => sandbox.handle_message(message).await,
                    None => {
                        debug!(plugin_id = %sandbox.inner.plugin_id, "boundary channel closed");
                        break;
                    }
                }
            }
        });
        *self.inner.recv_task.lock() = Some(task);
    }

    async fn handle_message(&self, message: SandboxMessage) {
        match message {
            SandboxMessage::Ready { exports } => {
                match self.inner.handshake_tx.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(exports));
                    }
                    None => debug!(plugin_id = %self.inner.plugin_id, "ready after handshake"),
                }
            }
            SandboxMessage::Error { error } => {
                match self.inner.handshake_tx.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(Err(error));
                    }
                    None => {
                        warn!(plugin_id = %self.inner.plugin_id, error = %error, "boundary error")
                    }
                }
            }
            SandboxMessage::ApiResponse { call_id, result } => {
                match self.inner.pending.write().await.remove(&call_id) {
                    Some(tx) => {
                        let _ = tx.send(Ok(result));
                    }
                    None => debug!(call_id = %call_id, "response for unknown call id, ignoring"),
                }
            }
            SandboxMessage::ApiError { call_id, error } => {
                match self.inner.pending.write().await.remove(&call_id) {
                    Some(tx) => {
                        let _ = tx.send(Err(PluginHostError::ApiCall(error)));
                    }
                    None => debug!(call_id = %call_id, "error for unknown call id, ignoring"),
                }
            }
            SandboxMessage::ApiCall {
                call_id,
                method,
                args,
            } => {
                // Inbound request from the boundary: dispatch through the
                // permission-gated bridge on its own task so a slow handler
                // never stalls the receive loop.
                let sandbox = self.clone();
                tokio::spawn(async move {
                    let reply = match sandbox.inner.bridge.dispatch(&method, args).await {
                        Ok(result) => SandboxMessage::ApiResponse { call_id, result },
                        Err(error) => SandboxMessage::ApiError { call_id, error },
                    };
                    if let Err(e) = sandbox.inner.transport.send(reply).await {
                        debug!(
                            plugin_id = %sandbox.inner.plugin_id,
                            error = %e,
                            "could not deliver api reply"
                        );
                    }
                });
            }
            SandboxMessage::Init => {
                debug!(plugin_id = %self.inner.plugin_id, "unexpected init from boundary");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{ChannelTransport, channel_pair};
    use crate::bridge::ApiNamespace;
    use crate::catalog::Permission;
    use std::collections::HashSet;

    fn pid() -> PluginId {
        PluginId::new_unchecked("com.example.test")
    }

    fn short_timeouts() -> SandboxTimeouts {
        SandboxTimeouts {
            handshake: Duration::from_millis(200),
            call: Duration::from_millis(200),
        }
    }

    fn test_bridge(granted: &[Permission]) -> ApiBridge {
        let set: HashSet<Permission> = granted.iter().copied().collect();
        ApiBridge::build(
            &set,
            vec![ApiNamespace::new("editor", Some(Permission::ContentRead)).method(
                "getText",
                |_| async { Ok(Value::from("text")) },
            )],
        )
    }

    /// Drives the interior side of the channel like a well-behaved plugin
    /// runtime: answers init with ready, echoes api-calls.
    fn spawn_runtime(interior: ChannelTransport, exports: ExportSurface) {
        tokio::spawn(async move {
            while let Some(message) = interior.recv().await {
                match message {
                    SandboxMessage::Init => {
                        interior
                            .send(SandboxMessage::Ready {
                                exports: exports.clone(),
                            })
                            .await
                            .ok();
                    }
                    SandboxMessage::ApiCall { call_id, method, .. } => {
                        let reply = if method == "plugin.onLoad" {
                            SandboxMessage::ApiResponse {
                                call_id,
                                result: Value::Null,
                            }
                        } else {
                            SandboxMessage::ApiError {
                                call_id,
                                error: format!("no such hook '{method}'"),
                            }
                        };
                        interior.send(reply).await.ok();
                    }
                    _ => {}
                }
            }
        });
    }

    #[tokio::test]
    async fn handshake_reports_exports() {
        let (host, interior) = channel_pair();
        spawn_runtime(
            interior,
            ExportSurface {
                has_on_load: true,
                ..Default::default()
            },
        );

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        let exports = sandbox.initialize().await.unwrap();
        assert!(exports.has_on_load);
        assert_eq!(sandbox.state(), SandboxState::Ready);
    }

    #[tokio::test]
    async fn handshake_timeout_destroys_sandbox() {
        let (host, _interior) = channel_pair();
        // No runtime answers; keep the interior alive so recv blocks.
        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());

        let err = sandbox.initialize().await.unwrap_err();
        assert!(matches!(err, PluginHostError::HandshakeTimeout { .. }));
        assert_eq!(sandbox.state(), SandboxState::Destroyed);
    }

    #[tokio::test]
    async fn handshake_error_message_fails_initialize() {
        let (host, interior) = channel_pair();
        tokio::spawn(async move {
            if let Some(SandboxMessage::Init) = interior.recv().await {
                interior
                    .send(SandboxMessage::Error {
                        error: "script threw during load".to_string(),
                    })
                    .await
                    .ok();
            }
        });

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        let err = sandbox.initialize().await.unwrap_err();
        assert!(err.to_string().contains("script threw"));
        assert_eq!(sandbox.state(), SandboxState::Destroyed);
    }

    #[tokio::test]
    async fn outbound_call_resolves() {
        let (host, interior) = channel_pair();
        spawn_runtime(
            interior,
            ExportSurface {
                has_on_load: true,
                ..Default::default()
            },
        );

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        sandbox.initialize().await.unwrap();

        let result = sandbox.call("plugin.onLoad", vec![]).await.unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(sandbox.pending_call_count().await, 0);
    }

    #[tokio::test]
    async fn outbound_call_error_rejects() {
        let (host, interior) = channel_pair();
        spawn_runtime(interior, ExportSurface::default());

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        sandbox.initialize().await.unwrap();

        let err = sandbox.call("plugin.onTeapot", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("no such hook"));
    }

    #[tokio::test]
    async fn call_timeout_removes_pending_entry() {
        let (host, interior) = channel_pair();
        // Runtime that completes the handshake but never answers calls.
        tokio::spawn(async move {
            while let Some(message) = interior.recv().await {
                if matches!(message, SandboxMessage::Init) {
                    interior
                        .send(SandboxMessage::Ready {
                            exports: ExportSurface::default(),
                        })
                        .await
                        .ok();
                }
            }
        });

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        sandbox.initialize().await.unwrap();

        let err = sandbox.call("plugin.onLoad", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginHostError::CallTimeout { .. }));
        assert_eq!(sandbox.pending_call_count().await, 0);
        // A single timed-out call does not tear the sandbox down.
        assert_ne!(sandbox.state(), SandboxState::Destroyed);
    }

    #[tokio::test]
    async fn inbound_api_call_dispatches_through_bridge() {
        let (host, interior) = channel_pair();

        let sandbox = PluginSandbox::new(
            pid(),
            Box::new(host),
            test_bridge(&[Permission::ContentRead]),
            short_timeouts(),
        );

        // Complete the handshake manually, then issue an inbound call.
        let handshake = tokio::spawn({
            let sandbox = sandbox.clone();
            async move { sandbox.initialize().await }
        });
        assert_eq!(interior.recv().await, Some(SandboxMessage::Init));
        interior
            .send(SandboxMessage::Ready {
                exports: ExportSurface::default(),
            })
            .await
            .unwrap();
        handshake.await.unwrap().unwrap();

        let call_id = CallId::new();
        interior
            .send(SandboxMessage::ApiCall {
                call_id,
                method: "editor.getText".to_string(),
                args: vec![],
            })
            .await
            .unwrap();

        match interior.recv().await {
            Some(SandboxMessage::ApiResponse { call_id: id, result }) => {
                assert_eq!(id, call_id);
                assert_eq!(result, Value::from("text"));
            }
            other => panic!("expected api-response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inbound_unknown_namespace_returns_api_error() {
        let (host, interior) = channel_pair();
        let sandbox =
            PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());

        let handshake = tokio::spawn({
            let sandbox = sandbox.clone();
            async move { sandbox.initialize().await }
        });
        interior.recv().await;
        interior
            .send(SandboxMessage::Ready {
                exports: ExportSurface::default(),
            })
            .await
            .unwrap();
        handshake.await.unwrap().unwrap();

        let call_id = CallId::new();
        interior
            .send(SandboxMessage::ApiCall {
                call_id,
                method: "foo.bar".to_string(),
                args: vec![],
            })
            .await
            .unwrap();

        match interior.recv().await {
            Some(SandboxMessage::ApiError { call_id: id, error }) => {
                assert_eq!(id, call_id);
                assert!(error.contains("unknown namespace 'foo'"));
            }
            other => panic!("expected api-error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn destroy_rejects_pending_and_is_idempotent() {
        let (host, interior) = channel_pair();
        // Handshake-only runtime: calls never answered.
        tokio::spawn(async move {
            while let Some(message) = interior.recv().await {
                if matches!(message, SandboxMessage::Init) {
                    interior
                        .send(SandboxMessage::Ready {
                            exports: ExportSurface::default(),
                        })
                        .await
                        .ok();
                }
            }
        });

        let sandbox = PluginSandbox::new(
            pid(),
            Box::new(host),
            test_bridge(&[]),
            SandboxTimeouts {
                handshake: Duration::from_millis(200),
                call: Duration::from_secs(30),
            },
        );
        sandbox.initialize().await.unwrap();

        let pending_call = tokio::spawn({
            let sandbox = sandbox.clone();
            async move { sandbox.call("plugin.onLoad", vec![]).await }
        });
        // Let the call register before destroying.
        tokio::time::sleep(Duration::from_millis(50)).await;

        sandbox.destroy().await;
        sandbox.destroy().await;

        let err = pending_call.await.unwrap().unwrap_err();
        assert!(matches!(err, PluginHostError::SandboxDestroyed));
        assert_eq!(sandbox.pending_call_count().await, 0);
    }

    #[tokio::test]
    async fn no_call_succeeds_after_destroy() {
        let (host, interior) = channel_pair();
        spawn_runtime(interior, ExportSurface::default());

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        sandbox.initialize().await.unwrap();
        sandbox.destroy().await;

        let err = sandbox.call("plugin.onLoad", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginHostError::SandboxDestroyed));
    }

    #[tokio::test]
    async fn mark_active_transitions_from_ready() {
        let (host, interior) = channel_pair();
        spawn_runtime(interior, ExportSurface::default());

        let sandbox = PluginSandbox::new(pid(), Box::new(host), test_bridge(&[]), short_timeouts());
        sandbox.initialize().await.unwrap();
        sandbox.mark_active();
        assert_eq!(sandbox.state(), SandboxState::Active);
    }
}
