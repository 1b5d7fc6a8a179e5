use crate::generator::{Generated, Prompt, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tracing::{info, warn};

#[cfg(test)]
type SleepFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<dyn Fn(u64) -> SleepFuture + Send + Sync>;

/// Configures retry behaviour for failover across generators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries per generator before moving to the next one.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
        }
    }
}

/// Whether an error is transient and worth retrying on the same generator.
///
/// Only an unavailable service is retried. A malformed answer or a rejected
/// request moves straight on to the next generator.
pub fn is_retryable(err: &SwitchyardError) -> bool {
    matches!(err, SwitchyardError::ServiceUnavailable(_))
}

/// Exponential backoff for `attempt`, capped at `backoff_max_ms`.
fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy.backoff_base_ms.saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// A [`TextGenerator`] that wraps several generators and fails over between them.
///
/// Generators are tried in order. Within each one, retryable errors are retried up
/// to `max_retries` times with exponential backoff. If every generator fails, the
/// last error is returned, so callers still see `ServiceUnavailable` or
/// `MalformedResponse` and can degrade.
pub struct FailoverGenerator {
    backends: Vec<Box<dyn TextGenerator>>,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl FailoverGenerator {
    /// Wrap `backends`, tried in order. At least one is required.
    pub fn new(backends: Vec<Box<dyn TextGenerator>>, policy: RetryPolicy) -> SwitchyardResult<Self> {
        if backends.is_empty() {
            return Err(SwitchyardError::Config(
                "failover requires at least one generator".into(),
            ));
        }
        Ok(Self {
            backends,
            policy,
            #[cfg(test)]
            sleep_fn: None,
        })
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl TextGenerator for FailoverGenerator {
    async fn generate(&self, prompt: &Prompt) -> SwitchyardResult<Generated> {
        let mut last_err: Option<SwitchyardError> = None;

        for backend in &self.backends {
            for attempt in 0..=self.policy.max_retries {
                match backend.generate(prompt).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) => {
                        if !is_retryable(&e) {
                            warn!(
                                backend = %backend.label(),
                                attempt,
                                error = %e,
                                "Non-retryable error, moving to next generator"
                            );
                            last_err = Some(e);
                            break;
                        }

                        if attempt < self.policy.max_retries {
                            let delay = compute_backoff(&self.policy, attempt);
                            info!(
                                backend = %backend.label(),
                                attempt,
                                delay_ms = delay,
                                error = %e,
                                "Retryable error, backing off"
                            );
                            self.do_sleep(delay).await;
                        }
                        last_err = Some(e);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            SwitchyardError::ServiceUnavailable("all generators exhausted".into())
        }))
    }

    fn label(&self) -> String {
        let labels: Vec<String> = self.backends.iter().map(|b| b.label()).collect();
        format!("failover[{}]", labels.join(","))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedGenerator;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    fn no_sleep() -> Option<SleepFn> {
        Some(Box::new(|_: u64| -> SleepFuture { Box::pin(async {}) }))
    }

    fn boxed(generator: impl TextGenerator + 'static) -> Box<dyn TextGenerator> {
        Box::new(generator)
    }

    fn unavailable() -> SwitchyardResult<Generated> {
        Err(SwitchyardError::ServiceUnavailable("503".into()))
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_try() {
        let failover = FailoverGenerator {
            backends: vec![boxed(ScriptedGenerator::new(vec![
                unavailable(),
                Ok(Generated::Text("ok".into())),
            ]))],
            policy: instant_policy(),
            sleep_fn: no_sleep(),
        };
        let result = failover.generate(&Prompt::new("hi")).await.unwrap();
        assert_eq!(result, Generated::Text("ok".into()));
    }

    #[tokio::test]
    async fn test_all_backends_fail_returns_last_error() {
        let failover = FailoverGenerator {
            backends: vec![
                boxed(ScriptedGenerator::new(vec![unavailable(), unavailable(), unavailable()])),
                boxed(ScriptedGenerator::new(vec![Err(
                    SwitchyardError::MalformedResponse("prose".into()),
                )])),
            ],
            policy: instant_policy(),
            sleep_fn: no_sleep(),
        };
        let err = failover.generate(&Prompt::new("hi")).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_non_retryable_moves_to_next_backend() {
        let first = Arc::new(ScriptedGenerator::new(vec![
            Err(SwitchyardError::Http("400 Bad Request".into())),
            Ok(Generated::Text("should not reach".into())),
        ]));
        let failover = FailoverGenerator {
            backends: vec![
                boxed(first.clone()),
                boxed(ScriptedGenerator::new(vec![Ok(Generated::Text("fallback".into()))])),
            ],
            policy: instant_policy(),
            sleep_fn: no_sleep(),
        };
        let result = failover.generate(&Prompt::new("hi")).await.unwrap();
        assert_eq!(result, Generated::Text("fallback".into()));
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn test_backoff_delays_are_requested() {
        let slept = Arc::new(AtomicU64::new(0));
        let counter = slept.clone();
        let failover = FailoverGenerator {
            backends: vec![boxed(ScriptedGenerator::new(vec![
                unavailable(),
                unavailable(),
                Ok(Generated::Text("ok".into())),
            ]))],
            policy: RetryPolicy {
                max_retries: 2,
                backoff_base_ms: 100,
                backoff_max_ms: 1_000,
            },
            sleep_fn: Some(Box::new(move |ms: u64| -> SleepFuture {
                counter.fetch_add(ms, Ordering::SeqCst);
                Box::pin(async {})
            })),
        };
        failover.generate(&Prompt::new("hi")).await.unwrap();
        assert_eq!(slept.load(Ordering::SeqCst), 100 + 200);
    }

    #[test]
    fn test_backoff_computation() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 5_000,
        };
        assert_eq!(compute_backoff(&policy, 0), 500);
        assert_eq!(compute_backoff(&policy, 1), 1000);
        assert_eq!(compute_backoff(&policy, 3), 4000);
        assert_eq!(compute_backoff(&policy, 4), 5_000);
    }

    #[test]
    fn test_is_retryable_classification() {
        assert!(is_retryable(&SwitchyardError::ServiceUnavailable("timeout".into())));
        assert!(!is_retryable(&SwitchyardError::MalformedResponse("x".into())));
        assert!(!is_retryable(&SwitchyardError::Http("400".into())));
    }

    #[test]
    fn test_empty_backends_rejected() {
        assert!(FailoverGenerator::new(Vec::new(), RetryPolicy::default()).is_err());
    }
}
