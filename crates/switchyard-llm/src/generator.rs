use crate::config::ModelConfig;
use crate::failover::FailoverGenerator;
use crate::openai::OpenAiGenerator;
use async_trait::async_trait;
use std::sync::Arc;
use switchyard_core::{SwitchyardError, SwitchyardResult};

/// A request to the text-generation service.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    /// Optional system instruction.
    pub system: Option<String>,
    /// The request itself.
    pub user: String,
    /// Ask the service for a single JSON document instead of free text.
    pub expect_json: bool,
}

impl Prompt {
    /// A free-text prompt with no system instruction.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            expect_json: false,
        }
    }

    /// Set the system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Ask for a JSON answer.
    pub fn json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// What the service produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    /// Free text, possibly holding JSON.
    Text(String),
    /// A JSON document the service already parsed.
    Structured(serde_json::Value),
}

impl Generated {
    /// Interpret the response as JSON.
    ///
    /// Text responses are parsed after stripping a surrounding Markdown code fence;
    /// anything that still fails to parse is a `MalformedResponse`.
    pub fn into_json(self) -> SwitchyardResult<serde_json::Value> {
        match self {
            Generated::Structured(value) => Ok(value),
            Generated::Text(text) => {
                let body = strip_code_fence(&text);
                serde_json::from_str(body).map_err(|e| {
                    SwitchyardError::MalformedResponse(format!("expected JSON, got: {e}"))
                })
            }
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// The text-generation service.
///
/// Implementations fail with `ServiceUnavailable` when the service is down or too
/// slow, and with `MalformedResponse` when it answers with something unusable.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Answer one prompt.
    async fn generate(&self, prompt: &Prompt) -> SwitchyardResult<Generated>;

    /// Short label for logs.
    fn label(&self) -> String {
        String::from("generator")
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, prompt: &Prompt) -> SwitchyardResult<Generated> {
        (**self).generate(prompt).await
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

/// Build the generator described by `config`.
///
/// A config with a retry policy or fallback models is wrapped in a
/// [`FailoverGenerator`]; otherwise the single HTTP backend is returned as is.
pub fn build_generator(config: &ModelConfig) -> SwitchyardResult<Arc<dyn TextGenerator>> {
    let primary: Box<dyn TextGenerator> = Box::new(OpenAiGenerator::new(config.clone())?);
    if config.retry_policy.is_none() && config.fallback_models.is_empty() {
        return Ok(Arc::from(primary));
    }

    let mut backends = vec![primary];
    for fallback in &config.fallback_models {
        backends.push(Box::new(OpenAiGenerator::new(fallback.clone())?));
    }
    let policy = config.retry_policy.clone().unwrap_or_default();
    Ok(Arc::new(FailoverGenerator::new(backends, policy)?))
}
