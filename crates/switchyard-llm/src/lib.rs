//! Text-generation service for Switchyard.
//!
//! The orchestrator treats text generation as an opaque, fallible service behind the
//! [`TextGenerator`] trait. This crate provides the trait, an OpenAI-compatible HTTP
//! backend, a [`FailoverGenerator`] that retries transient failures with exponential
//! backoff and falls through a list of backends, and a [`ScriptedGenerator`] for tests.

/// Model and provider configuration.
pub mod config;
/// Retry and failover across generators.
pub mod failover;
/// The generator trait, prompts, and responses.
pub mod generator;
/// OpenAI-compatible chat completions backend.
pub mod openai;
/// Canned responses for tests and offline runs.
pub mod scripted;

pub use config::{LlmProvider, ModelConfig};
pub use failover::{FailoverGenerator, RetryPolicy};
pub use generator::{build_generator, Generated, Prompt, TextGenerator};
pub use openai::OpenAiGenerator;
pub use scripted::ScriptedGenerator;
