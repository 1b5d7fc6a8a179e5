use crate::config::{LlmProvider, ModelConfig};
use crate::generator::{Generated, Prompt, TextGenerator};
use async_trait::async_trait;
use std::time::Duration;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tracing::debug;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiGenerator {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiGenerator {
    /// Build the backend and its HTTP client. Fails only on client setup.
    pub fn new(config: ModelConfig) -> SwitchyardResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SwitchyardError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn build_messages(&self, prompt: &Prompt) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        if let Some(sys) = &prompt.system {
            messages.push(serde_json::json!({ "role": "system", "content": sys }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt.user }));
        messages
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        // OpenRouter asks callers to identify themselves
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request.header("X-Title", "Switchyard")
        } else {
            request
        }
    }
}

fn transport_error(e: reqwest::Error) -> SwitchyardError {
    if e.is_timeout() || e.is_connect() {
        SwitchyardError::ServiceUnavailable(e.to_string())
    } else {
        SwitchyardError::Http(e.to_string())
    }
}

/// Map a non-success status. Rate limiting and server-side failures mean the
/// service is unavailable; anything else is a rejected request.
fn status_error(status: reqwest::StatusCode, body: &str) -> SwitchyardError {
    let msg = format!("chat completions returned {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SwitchyardError::ServiceUnavailable(msg)
    } else {
        SwitchyardError::Http(msg)
    }
}

/// Extract the assistant content from a chat completions body.
pub fn parse_completion(body: &serde_json::Value, expect_json: bool) -> SwitchyardResult<Generated> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            SwitchyardError::MalformedResponse("completion has no message content".into())
        })?;
    if expect_json {
        Generated::Text(content.to_string())
            .into_json()
            .map(Generated::Structured)
    } else {
        Ok(Generated::Text(content.to_string()))
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &Prompt) -> SwitchyardResult<Generated> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(prompt),
        });
        if prompt.expect_json {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        debug!(url = %url, model = %self.config.model_id, "Requesting completion");
        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let resp_body: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            SwitchyardError::MalformedResponse(format!("completion body is not JSON: {e}"))
        })?;
        parse_completion(&resp_body, prompt.expect_json)
    }

    fn label(&self) -> String {
        format!("{:?}:{}", self.config.provider, self.config.model_id).to_lowercase()
    }
}
