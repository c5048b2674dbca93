//! Runtime configuration, read once from the environment at startup.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key. Absent means chat endpoints are disabled.
    pub anthropic_api_key: Option<String>,
    pub model: String,
    /// Root directory for flat-file storage.
    pub data_dir: String,
    pub bind_addr: String,
    /// Token ceiling per model invocation.
    pub max_tokens: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: env::var("PICO_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string()),
            data_dir: env::var("PICO_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            bind_addr: env::var("PICO_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            max_tokens: env::var("PICO_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
        }
    }
}
