//! Process configuration, loaded once at startup (spec §6.3).

use std::path::PathBuf;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub rpc_timeout_ms: u64,
    pub llm_timeout_ms: u64,
    pub workflow_timeout_ms: u64,
    pub max_tool_iterations: u32,
    pub top_k_guidelines: usize,
    pub top_k_cks: usize,
    pub top_k_bnf: usize,
    pub servers_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: None,
            llm_model: "claude-3-5-sonnet-latest".to_string(),
            rpc_timeout_ms: 30_000,
            llm_timeout_ms: 120_000,
            workflow_timeout_ms: 300_000,
            max_tool_iterations: 8,
            top_k_guidelines: 5,
            top_k_cks: 3,
            top_k_bnf: 3,
            servers_dir: PathBuf::from("./servers"),
        }
    }
}

impl Config {
    /// Loads configuration from `.env` (if present) and process environment.
    ///
    /// A missing `CORE_LLM_API_KEY` is not a load error — the LLM driver
    /// short-circuits to an empty result when it is absent (spec §6.3).
    pub fn from_env() -> Result<Self, CoreError> {
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(key) = std::env::var("CORE_LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("CORE_LLM_MODEL") {
            config.llm_model = model;
        }
        config.rpc_timeout_ms = env_u64("CORE_RPC_TIMEOUT_MS", config.rpc_timeout_ms)?;
        config.llm_timeout_ms = env_u64("CORE_LLM_TIMEOUT_MS", config.llm_timeout_ms)?;
        config.workflow_timeout_ms =
            env_u64("CORE_WORKFLOW_TIMEOUT_MS", config.workflow_timeout_ms)?;
        config.max_tool_iterations =
            env_u64("CORE_MAX_TOOL_ITERATIONS", config.max_tool_iterations as u64)? as u32;
        config.top_k_guidelines =
            env_u64("CORE_TOP_K_GUIDELINES", config.top_k_guidelines as u64)? as usize;
        config.top_k_cks = env_u64("CORE_TOP_K_CKS", config.top_k_cks as u64)? as usize;
        config.top_k_bnf = env_u64("CORE_TOP_K_BNF", config.top_k_bnf as u64)? as usize;

        if let Ok(dir) = std::env::var("CORE_SERVERS_DIR") {
            config.servers_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoreError::Config(format!("{key} must be an integer, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.rpc_timeout_ms, 30_000);
        assert_eq!(config.workflow_timeout_ms, 300_000);
        assert_eq!(config.max_tool_iterations, 8);
        assert_eq!(config.top_k_guidelines, 5);
        assert_eq!(config.top_k_cks, 3);
        assert_eq!(config.top_k_bnf, 3);
    }
}
