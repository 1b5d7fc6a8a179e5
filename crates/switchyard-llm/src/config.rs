use crate::failover::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Which OpenAI-compatible service a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI's hosted API.
    OpenAi,
    /// OpenRouter's model gateway.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    /// A local Ollama server exposing the OpenAI-compatible endpoint.
    Ollama,
}

/// One model backend, plus the fallbacks tried after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Service hosting the model.
    pub provider: LlmProvider,
    /// Model name as the provider knows it.
    pub model_id: String,
    /// Bearer token. Empty for unauthenticated local servers.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Response length cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout. A request that exceeds it counts as the service being unavailable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Backends tried in order once this one gives up.
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    /// Retries with backoff before falling through.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ModelConfig {
    /// The endpoint requests go to.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Ollama => "http://localhost:11434",
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_toml() {
        let cfg: ModelConfig = toml::from_str(
            r#"
            provider = "groq"
            model_id = "llama-3.3-70b"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.provider, LlmProvider::Groq);
        assert_eq!(cfg.max_tokens, 2048);
        assert_eq!(cfg.timeout_ms, 30_000);
        assert!(cfg.api_key.is_empty());
        assert!(cfg.retry_policy.is_none());
        assert_eq!(cfg.base_url(), "https://api.groq.com/openai");
    }

    #[test]
    fn test_base_url_override() {
        let cfg: ModelConfig = toml::from_str(
            r#"
            provider = "openai"
            model_id = "gpt-4o-mini"
            api_base_url = "http://127.0.0.1:9999"

            [retry_policy]
            max_retries = 1
            backoff_base_ms = 10
            backoff_max_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(cfg.base_url(), "http://127.0.0.1:9999");
        assert_eq!(cfg.retry_policy.unwrap().max_retries, 1);
    }
}
