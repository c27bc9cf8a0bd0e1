//! Convenience re-exports for common usage.

pub use crate::config::{HttpClientConfig, RetryPolicy};
pub use crate::context::ConversationContext;
pub use crate::error::{Error, LogError, ProviderError, Result, SchemaError};
pub use crate::guardrail::{
    CheckEngine, CheckPhase, GuardrailVerdict, PolicyAction, SafetyResult,
};
pub use crate::message::{Message, Role};
pub use crate::orchestrator::{
    ConversationState, RefusalMessages, TurnOrchestrator, TurnOutcome,
};
pub use crate::providers::{
    Classifier, OpenAiAgent, OpenAiClassifier, OpenAiClient, ResponseAgent,
};
pub use crate::store::{Feedback, InteractionStore, LoggedInteraction, MemoryStore};

#[cfg(feature = "store-sqlite")]
pub use crate::store::SqliteStore;
