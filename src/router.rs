//! Tool Router (C3): maps `tool_name → server_name`, built from the union
//! of descriptors returned by the registry post-discovery.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CoreError;
use crate::model::ToolDescriptor;
use crate::registry::SessionRegistry;
use crate::rpc::protocol::ToolsCallResult;

pub struct ToolRouter {
    tool_to_server: HashMap<String, String>,
    registry: Arc<SessionRegistry>,
}

impl ToolRouter {
    /// Builds the router from discovered descriptors. On a name collision,
    /// the first-discovered server wins and a conflict is logged (spec §8
    /// S6 — a deliberate correction of the source's last-writer-wins).
    pub fn new(registry: Arc<SessionRegistry>, descriptors: Vec<(String, ToolDescriptor)>) -> Self {
        let mut tool_to_server = HashMap::new();
        for (server, tool) in descriptors {
            match tool_to_server.entry(tool.name.clone()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(server);
                }
                std::collections::hash_map::Entry::Occupied(existing) => {
                    warn!(
                        tool = %tool.name,
                        kept_server = %existing.get(),
                        rejected_server = %server,
                        "tool name conflict: first-discovered server wins"
                    );
                }
            }
        }
        Self {
            tool_to_server,
            registry,
        }
    }

    pub fn tools(&self) -> &HashMap<String, String> {
        &self.tool_to_server
    }

    pub async fn call(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<ToolsCallResult, CoreError> {
        let server = self
            .tool_to_server
            .get(tool_name)
            .ok_or_else(|| CoreError::UnknownTool {
                tool: tool_name.to_string(),
            })?;
        self.registry.call(server, tool_name, args).await
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tool_to_server.contains_key(tool_name)
    }

    /// Same as `call`, but races the request against `cancel` so fan-out
    /// callers (search/detail/enrichment) abort promptly once the whole
    /// workflow's deadline trips (spec §5).
    pub async fn call_cancellable(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolsCallResult, CoreError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.call(tool_name, args) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_discovered_wins_on_collision() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(1)));
        let descriptors = vec![
            (
                "server-a".to_string(),
                ToolDescriptor {
                    name: "get_patient_info".to_string(),
                    description: "a".to_string(),
                    input_schema: serde_json::json!({}),
                },
            ),
            (
                "server-b".to_string(),
                ToolDescriptor {
                    name: "get_patient_info".to_string(),
                    description: "b".to_string(),
                    input_schema: serde_json::json!({}),
                },
            ),
        ];
        let router = ToolRouter::new(registry, descriptors);
        assert_eq!(
            router.tools().get("get_patient_info").map(String::as_str),
            Some("server-a")
        );
    }
}
