//! LLM capability (spec §6.2): `send(messages, tools) -> Response`.
//!
//! `AnthropicLlmClient` is the one concrete adapter shipped in this
//! crate, shaped like the teacher's HTTP-source clients (a thin struct
//! over a shared `reqwest_middleware` client + base URL, with a
//! `new_for_test` constructor for wiremock).

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::ToolDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Block>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Block::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub stop_reason: StopReason,
    pub content: Vec<Block>,
}

/// The capability §C7 depends on. Not a specific vendor (spec §1).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse, CoreError>;
}

fn shared_http_client() -> Result<ClientWithMiddleware, CoreError> {
    static CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let inner = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(CoreError::HttpClientInit)?;
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
    let client = ClientBuilder::new(inner)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();
    match CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => Ok(CLIENT.get().cloned().unwrap_or(client)),
    }
}

pub struct AnthropicLlmClient {
    client: ClientWithMiddleware,
    base_url: Cow<'static, str>,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    stop_reason: String,
    content: Vec<serde_json::Value>,
}

impl AnthropicLlmClient {
    pub fn new(api_key: String, model: String) -> Result<Self, CoreError> {
        Ok(Self {
            client: shared_http_client()?,
            base_url: Cow::Borrowed("https://api.anthropic.com/v1/messages"),
            api_key,
            model,
        })
    }

    /// Wiremock-friendly constructor (mirrors the teacher's
    /// `new_for_test(base: String)` pattern).
    pub fn new_for_test(base: String, api_key: String, model: String) -> Result<Self, CoreError> {
        Ok(Self {
            client: shared_http_client()?,
            base_url: Cow::Owned(base),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicLlmClient {
    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse, CoreError> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: 4096,
            messages,
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.base_url.as_ref())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Transport {
                server: "anthropic".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CoreError::Upstream {
                server: "anthropic".to_string(),
                code: status.as_u16() as i64,
                message: text,
            });
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text).map_err(|e| CoreError::Parse {
            context: "anthropic response".to_string(),
            message: e.to_string(),
        })?;

        let stop_reason = match parsed.stop_reason.as_str() {
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| serde_json::from_value::<Block>(block).ok())
            .collect();

        Ok(LlmResponse {
            stop_reason,
            content,
        })
    }
}
