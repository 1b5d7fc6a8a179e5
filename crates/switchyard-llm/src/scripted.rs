use crate::generator::{Generated, Prompt, TextGenerator};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use switchyard_core::{SwitchyardError, SwitchyardResult};

/// A generator that replays a fixed list of responses, one per call.
///
/// Once the script is exhausted every call fails with `ServiceUnavailable`.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<SwitchyardResult<Generated>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    /// Replay `script` in order.
    pub fn new(script: Vec<SwitchyardResult<Generated>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A generator that always returns the same JSON document.
    pub fn always_json(value: serde_json::Value, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(Generated::Structured(value.clone()))).collect())
    }

    /// A generator whose service is always down.
    pub fn unavailable() -> Self {
        Self::new(Vec::new())
    }

    /// How many prompts were received.
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &Prompt) -> SwitchyardResult<Generated> {
        self.prompts.lock().push(prompt.clone());
        self.script.lock().pop_front().unwrap_or_else(|| {
            Err(SwitchyardError::ServiceUnavailable(
                "scripted generator exhausted".into(),
            ))
        })
    }

    fn label(&self) -> String {
        String::from("scripted")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let generator = ScriptedGenerator::new(vec![
            Ok(Generated::Text("one".into())),
            Err(SwitchyardError::MalformedResponse("two".into())),
        ]);
        let prompt = Prompt::new("go");
        assert_eq!(
            generator.generate(&prompt).await.unwrap(),
            Generated::Text("one".into())
        );
        assert!(matches!(
            generator.generate(&prompt).await,
            Err(SwitchyardError::MalformedResponse(_))
        ));
        assert!(matches!(
            generator.generate(&prompt).await,
            Err(SwitchyardError::ServiceUnavailable(_))
        ));
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.prompts()[0].user, "go");
    }
}
