//! Session Registry (C2): opens a set of knowledge-server sessions in
//! parallel, tracks them by name, and runs post-open tool discovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::CoreError;
use crate::model::{SpawnSpec, ToolDescriptor};
use crate::rpc::protocol::ToolsCallResult;
use crate::rpc::Session;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    rpc_timeout: Duration,
}

/// Per-server outcome of a parallel open/discovery pass.
pub struct OpenReport {
    pub opened: Vec<String>,
    pub failed: Vec<(String, CoreError)>,
    pub descriptors: Vec<(String, ToolDescriptor)>,
}

impl SessionRegistry {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rpc_timeout,
        }
    }

    /// Opens every spec in parallel. A failure opening one server does not
    /// prevent others from opening (spec §4.2): partial success is
    /// collected and returned to the caller to decide.
    pub async fn open(&self, specs: &[SpawnSpec]) -> OpenReport {
        let results = join_all(specs.iter().map(|spec| {
            let rpc_timeout = self.rpc_timeout;
            async move {
                let outcome = Session::open(spec, rpc_timeout).await;
                (spec.name.clone(), outcome)
            }
        }))
        .await;

        let mut opened = Vec::new();
        let mut failed = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            for (name, outcome) in results {
                match outcome {
                    Ok(session) => {
                        sessions.insert(name.clone(), session);
                        opened.push(name);
                    }
                    Err(err) => {
                        warn!(server = %name, %err, "failed to open session");
                        failed.push((name, err));
                    }
                }
            }
        }

        // Tool discovery, also in parallel (spec §4.2).
        let sessions = self.sessions.read().await;
        let discovery = join_all(opened.iter().map(|name| {
            let session = sessions.get(name).cloned();
            let name = name.clone();
            async move {
                match session {
                    Some(session) => match session.list_tools().await {
                        Ok(tools) => tools.into_iter().map(|t| (name.clone(), t)).collect(),
                        Err(err) => {
                            warn!(server = %name, %err, "tool discovery failed");
                            Vec::new()
                        }
                    },
                    None => Vec::new(),
                }
            }
        }))
        .await;

        OpenReport {
            opened,
            failed,
            descriptors: discovery.into_iter().flatten().collect(),
        }
    }

    pub async fn call(
        &self,
        server_name: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolsCallResult, CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(server_name)
            .ok_or_else(|| CoreError::UnknownServer {
                server: server_name.to_string(),
            })?
            .clone();
        drop(sessions);
        session.call_tool(tool, args).await
    }

    pub async fn list_tools(&self) -> Vec<(String, ToolDescriptor)> {
        let sessions = self.sessions.read().await;
        let results = join_all(sessions.iter().map(|(name, session)| {
            let name = name.clone();
            let session = session.clone();
            async move {
                session
                    .list_tools()
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .map(|t| (name.clone(), t))
                    .collect::<Vec<_>>()
            }
        }))
        .await;
        results.into_iter().flatten().collect()
    }

    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        let handles: Vec<Arc<Session>> = sessions.values().cloned().collect();
        join_all(handles.iter().map(|s| s.close())).await;
        sessions.clear();
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
