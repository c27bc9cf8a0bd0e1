//! Palisade is a policy-enforcement layer for conversational LLM agents.
//!
//! Every user message and every drafted assistant reply is submitted to a
//! separate classification call before it is allowed to reach its
//! destination. The classification verdict decides whether content is
//! forwarded, blocked, or replaced — and any internal failure resolves to
//! "blocked", never to "allowed" (fail-closed).
//!
//! # Architecture
//!
//! - [`guardrail::CheckEngine`] — builds the evaluation context, invokes the
//!   classifier, and forces its output into a strict schema.
//! - [`orchestrator::TurnOrchestrator`] — the state machine that sequences
//!   check user → call agent → check assistant → finalize.
//! - [`store::InteractionStore`] — idempotent, upsert-based audit log of
//!   every check outcome.
//! - [`providers`] — the classifier and agent-response seams, with an
//!   OpenAI-compatible HTTP client and scriptable mocks.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use palisade::prelude::*;
//!
//! let client = OpenAiClient::builder()
//!     .api_key("sk-...")
//!     .base_url("https://openrouter.ai/api/v1")
//!     .build();
//!
//! let engine = CheckEngine::new(
//!     OpenAiClassifier::new(client.clone(), "o3-mini"),
//!     POLICY_RULES_TEXT,
//! );
//! let orchestrator = TurnOrchestrator::new(
//!     engine,
//!     OpenAiAgent::new(client, "gpt-4o"),
//!     SqliteStore::open("interactions.db")?,
//! );
//!
//! let mut conversation = ConversationState::new();
//! let outcome = orchestrator.run_turn(&mut conversation, "hello!").await;
//! println!("{}", outcome.displayed_content);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod message;
pub mod orchestrator;
pub mod prelude;
pub mod providers;
pub mod store;

pub use context::ConversationContext;
pub use error::{Error, LogError, ProviderError, Result, SchemaError};
pub use guardrail::{CheckEngine, CheckPhase, GuardrailVerdict, PolicyAction, SafetyResult};
pub use message::{Message, Role};
pub use orchestrator::{ConversationState, RefusalMessages, TurnOrchestrator, TurnOutcome};
