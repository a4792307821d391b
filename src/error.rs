//! Error types for the clinical orchestrator core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("transport error on server '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("timeout on server '{server}' during {call} (after {after_ms}ms)")]
    Timeout {
        server: String,
        call: String,
        after_ms: u64,
    },

    #[error("unknown server: '{server}'")]
    UnknownServer { server: String },

    #[error("unknown tool: '{tool}'")]
    UnknownTool { tool: String },

    #[error("upstream error from '{server}' (code {code}): {message}")]
    Upstream {
        server: String,
        code: i64,
        message: String,
    },

    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http client initialization failed")]
    HttpClientInit(#[source] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
