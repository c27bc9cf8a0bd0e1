//! Provider seams for the classification and agent-response calls.
//!
//! Two traits mark the external collaborators of the pipeline:
//!
//! - [`Classifier`] — submits an evaluation request (policy instructions +
//!   conversation context) to a language-model provider and returns the
//!   raw textual completion. One request per call; retry policy belongs to
//!   the [`CheckEngine`](crate::guardrail::CheckEngine).
//! - [`ResponseAgent`] — generates the assistant's substantive reply from
//!   the conversation history. Invoked only when the user-side check
//!   passes.
//!
//! [`OpenAiClient`] implements both seams against any OpenAI-compatible
//! chat completions endpoint; [`mock`] provides scriptable fakes for tests.

pub mod mock;
pub mod openai;

pub use openai::{OpenAiAgent, OpenAiClassifier, OpenAiClient, OpenAiClientBuilder};

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ConversationContext;
use crate::error::ProviderError;
use crate::message::Message;

/// Trait for the external classification call.
///
/// Implementations send a single request with the policy instructions as
/// the governing directive and the serialized context as the subject to
/// evaluate, returning the raw completion text. They must not retry
/// internally.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Submit one evaluation request and return the raw completion text.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on network, timeout, or authentication
    /// failure.
    async fn classify(
        &self,
        policy: &str,
        context: &ConversationContext,
    ) -> Result<String, ProviderError>;
}

/// Trait for the agent-response collaborator.
#[async_trait]
pub trait ResponseAgent: Send + Sync {
    /// Generate a draft reply from the conversation history.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on network, timeout, or authentication
    /// failure.
    async fn generate(&self, history: &[Message]) -> Result<String, ProviderError>;
}

/// A shared, reference-counted classifier.
pub type SharedClassifier = Arc<dyn Classifier>;

/// A shared, reference-counted response agent.
pub type SharedAgent = Arc<dyn ResponseAgent>;
