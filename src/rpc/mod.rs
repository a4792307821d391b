//! RPC Transport (C1): one child process per knowledge server, framed
//! line-delimited JSON-RPC exchange, request/response correlation.

pub mod protocol;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::CoreError;
use crate::model::{SpawnSpec, ToolDescriptor};
use protocol::{InitializeResult, Request, Response, ToolsCallParams, ToolsCallResult, ToolsListResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    Draining,
    Closed,
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// One long-lived subprocess-backed RPC session.
pub struct Session {
    pub name: String,
    state: Mutex<SessionState>,
    next_id: AtomicU64,
    stdin: Mutex<ChildStdin>,
    pending: PendingTable,
    child: Mutex<Option<Child>>,
    rpc_timeout: Duration,
    consecutive_timeouts: AtomicU64,
}

impl Session {
    /// Spawns the child process and starts the single reader task that
    /// fans responses out to per-request oneshot channels (spec §9).
    pub async fn open(spec: &SpawnSpec, rpc_timeout: Duration) -> Result<Arc<Self>, CoreError> {
        let mut child = tokio::process::Command::new(&spec.command)
            .args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| CoreError::Transport {
                server: spec.name.clone(),
                message: format!("failed to spawn '{}': {e}", spec.command),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| CoreError::Transport {
            server: spec.name.clone(),
            message: "child has no stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| CoreError::Transport {
            server: spec.name.clone(),
            message: "child has no stdout".into(),
        })?;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let session = Arc::new(Self {
            name: spec.name.clone(),
            state: Mutex::new(SessionState::Starting),
            next_id: AtomicU64::new(1),
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            child: Mutex::new(Some(child)),
            rpc_timeout,
            consecutive_timeouts: AtomicU64::new(0),
        });

        let reader_name = spec.name.clone();
        let reader_pending = pending.clone();
        let reader_session = Arc::downgrade(&session);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Response>(&line) {
                            Ok(response) => {
                                let mut table = reader_pending.lock().await;
                                if let Some(sender) = table.remove(&response.id) {
                                    let _ = sender.send(response);
                                }
                            }
                            Err(err) => {
                                warn!(server = %reader_name, %err, "malformed frame from server");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(server = %reader_name, "server closed stdout (EOF)");
                        break;
                    }
                    Err(err) => {
                        error!(server = %reader_name, %err, "error reading server stdout");
                        break;
                    }
                }
            }
            // Fatal: fail every still-pending request and mark closed.
            if let Some(session) = reader_session.upgrade() {
                *session.state.lock().await = SessionState::Closed;
            }
            let mut table = reader_pending.lock().await;
            table.clear();
        });

        *session.state.lock().await = SessionState::Ready;
        Ok(session)
    }

    async fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        if *self.state.lock().await == SessionState::Closed {
            return Err(CoreError::Transport {
                server: self.name.clone(),
                message: "session is closed".into(),
            });
        }

        let id = self.next_request_id().await;
        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(err) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().await.remove(&id);
                return Err(CoreError::Transport {
                    server: self.name.clone(),
                    message: format!("failed writing to child stdin: {err}"),
                });
            }
            if let Err(err) = stdin.flush().await {
                self.pending.lock().await.remove(&id);
                return Err(CoreError::Transport {
                    server: self.name.clone(),
                    message: format!("failed flushing child stdin: {err}"),
                });
            }
        }

        match timeout(self.rpc_timeout, rx).await {
            Ok(Ok(response)) => {
                self.consecutive_timeouts.store(0, Ordering::SeqCst);
                match response.error {
                    Some(err) => Err(CoreError::Upstream {
                        server: self.name.clone(),
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
                }
            }
            Ok(Err(_)) => Err(CoreError::Transport {
                server: self.name.clone(),
                message: "response channel dropped (session closed)".into(),
            }),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                let count = self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= 2 {
                    *self.state.lock().await = SessionState::Closed;
                }
                Err(CoreError::Timeout {
                    server: self.name.clone(),
                    call: method.to_string(),
                    after_ms: self.rpc_timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn initialize(&self) -> Result<InitializeResult, CoreError> {
        let value = self.send_request("initialize", None).await?;
        serde_json::from_value(value).map_err(|e| CoreError::Parse {
            context: format!("initialize reply from '{}'", self.name),
            message: e.to_string(),
        })
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CoreError> {
        let value = self.send_request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(value).map_err(|e| CoreError::Parse {
            context: format!("tools/list reply from '{}'", self.name),
            message: e.to_string(),
        })?;
        Ok(parsed.tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolsCallResult, CoreError> {
        let params = ToolsCallParams { name, arguments };
        let value = self
            .send_request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        serde_json::from_value(value).map_err(|e| CoreError::Parse {
            context: format!("tools/call reply from '{}' for tool '{name}'", self.name),
            message: e.to_string(),
        })
    }

    /// Closes stdin, waits a grace period, then force-kills. No orphan
    /// process may outlive the orchestrator (spec §4.1, §5).
    pub async fn close(&self) {
        *self.state.lock().await = SessionState::Draining;
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let grace = Duration::from_secs(2);
            match timeout(grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }
        *self.state.lock().await = SessionState::Closed;
        self.pending.lock().await.clear();
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }
}
