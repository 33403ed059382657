//! Isolation boundary transports.
//!
//! The sandboxed execution context runs plugin code out of process and
//! talks to the host exclusively through newline-delimited JSON protocol
//! messages. The transport trait is the seam: production uses a child
//! process with a restricted environment, tests and the trusted
//! direct-execution path use an in-memory channel pair.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use maibuk_types::PluginId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::error::PluginHostError;
use crate::protocol::SandboxMessage;

/// Which execution path runs the plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// The default: plugin code runs inside the isolation boundary.
    #[default]
    Sandboxed,
    /// Development only. Runs the plugin in-process with no capability
    /// restrictions applied; explicitly less secure.
    Trusted,
}

/// One end of the boundary channel.
#[async_trait]
pub trait BoundaryTransport: Send + Sync {
    /// Sends a protocol message toward the other side.
    async fn send(&self, message: SandboxMessage) -> Result<(), PluginHostError>;

    /// Receives the next protocol message, or `None` once the channel is
    /// closed.
    async fn recv(&self) -> Option<SandboxMessage>;

    /// Closes the channel. Idempotent.
    async fn close(&self);
}

/// Produces a transport for a plugin about to be loaded.
///
/// The factory receives the plugin source, the derived CSP string and the
/// execution mode so the boundary is fully configured before any plugin
/// code runs.
#[async_trait]
pub trait BoundaryFactory: Send + Sync {
    async fn create(
        &self,
        plugin_id: &PluginId,
        code: &str,
        csp: &str,
        mode: ExecutionMode,
    ) -> Result<Box<dyn BoundaryTransport>, PluginHostError>;
}

// ================================================================
// In-memory channel pair
// ================================================================

/// In-memory transport half backed by a pair of mpsc channels.
pub struct ChannelTransport {
    tx: mpsc::Sender<SandboxMessage>,
    rx: Mutex<mpsc::Receiver<SandboxMessage>>,
}

/// Creates a connected pair of in-memory transports: one for the host,
/// one standing in for the boundary interior.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (host_tx, interior_rx) = mpsc::channel(64);
    let (interior_tx, host_rx) = mpsc::channel(64);
    (
        ChannelTransport {
            tx: host_tx,
            rx: Mutex::new(host_rx),
        },
        ChannelTransport {
            tx: interior_tx,
            rx: Mutex::new(interior_rx),
        },
    )
}

#[async_trait]
impl BoundaryTransport for ChannelTransport {
    async fn send(&self, message: SandboxMessage) -> Result<(), PluginHostError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| PluginHostError::Transport("channel closed".to_string()))
    }

    async fn recv(&self) -> Option<SandboxMessage> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.rx.lock().await.close();
    }
}

// ================================================================
// Child-process boundary
// ================================================================

/// Configuration for the out-of-process plugin runtime.
#[derive(Debug, Clone)]
pub struct RuntimeCommand {
    /// Executable that hosts plugin script (the bundled runtime shim).
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Boundary backed by a child process speaking newline-delimited JSON on
/// stdio.
///
/// Capability restriction is carried in the runtime's environment: the
/// shim receives the plugin id and CSP string and starts with same-origin
/// access, top-level navigation, popups and modal dialogs disabled.
pub struct ProcessBoundary {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

impl ProcessBoundary {
    pub async fn spawn(
        command: &RuntimeCommand,
        plugin_id: &PluginId,
        code: &str,
        csp: &str,
        extra_env: &HashMap<String, String>,
    ) -> Result<Self, PluginHostError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env("MAIBUK_PLUGIN_ID", plugin_id.as_str())
            .env("MAIBUK_PLUGIN_SOURCE", code)
            .env("MAIBUK_PLUGIN_CSP", csp)
            .env("MAIBUK_SANDBOX_FLAGS", "no-same-origin,no-navigation,no-popups,no-modals")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            PluginHostError::Transport(format!(
                "failed to spawn plugin runtime {}: {e}",
                command.program.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginHostError::Transport("runtime has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginHostError::Transport("runtime has no stdout".to_string()))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }

    /// Whether the runtime process is still running.
    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}

#[async_trait]
impl BoundaryTransport for ProcessBoundary {
    async fn send(&self, message: SandboxMessage) -> Result<(), PluginHostError> {
        let json = serde_json::to_string(&message)?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| PluginHostError::Transport(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| PluginHostError::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| PluginHostError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn recv(&self) -> Option<SandboxMessage> {
        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            match stdout.read_line(&mut line).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SandboxMessage>(line) {
                Ok(message) => return Some(message),
                Err(e) => {
                    // Runtimes may emit stray diagnostics on stdout.
                    debug!(error = %e, "skipping non-protocol line from runtime");
                }
            }
        }
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}

/// Factory spawning one runtime process per sandboxed plugin. Trusted
/// mode is rejected here: the trusted path is wired by the composition
/// root with an in-process transport, not through this factory.
pub struct ProcessBoundaryFactory {
    command: RuntimeCommand,
    extra_env: HashMap<String, String>,
}

impl ProcessBoundaryFactory {
    pub fn new(command: RuntimeCommand) -> Self {
        Self {
            command,
            extra_env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.extra_env = env;
        self
    }
}

#[async_trait]
impl BoundaryFactory for ProcessBoundaryFactory {
    async fn create(
        &self,
        plugin_id: &PluginId,
        code: &str,
        csp: &str,
        mode: ExecutionMode,
    ) -> Result<Box<dyn BoundaryTransport>, PluginHostError> {
        if mode == ExecutionMode::Trusted {
            return Err(PluginHostError::Transport(
                "trusted execution is not available through the process factory".to_string(),
            ));
        }
        let boundary =
            ProcessBoundary::spawn(&self.command, plugin_id, code, csp, &self.extra_env).await?;
        Ok(Box::new(boundary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ExportSurface;

    #[tokio::test]
    async fn channel_pair_delivers_both_ways() {
        let (host, interior) = channel_pair();

        host.send(SandboxMessage::Init).await.unwrap();
        assert_eq!(interior.recv().await, Some(SandboxMessage::Init));

        interior
            .send(SandboxMessage::Ready {
                exports: ExportSurface::default(),
            })
            .await
            .unwrap();
        assert!(matches!(host.recv().await, Some(SandboxMessage::Ready { .. })));
    }

    #[tokio::test]
    async fn dropped_peer_ends_receive() {
        let (host, interior) = channel_pair();
        drop(interior);
        assert_eq!(host.recv().await, None);
    }

    #[tokio::test]
    async fn send_after_peer_drop_errors() {
        let (host, interior) = channel_pair();
        drop(interior);
        assert!(host.send(SandboxMessage::Init).await.is_err());
    }
}
