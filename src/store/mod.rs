//! Durable, idempotent recording of guardrail check outcomes.
//!
//! Every completed check is persisted as a [`LoggedInteraction`], uniquely
//! identified by `(conversation_id, check_phase)`. Recording is an upsert:
//! a retried or duplicated write for the same key replaces the existing
//! row rather than producing a second one, so the store stays consistent
//! under at-least-once delivery. The key constraint is also the only
//! concurrency-control primitive — concurrent duplicate writes resolve to
//! last-writer-wins instead of racing into duplicate rows.
//!
//! Rows are never deleted by the pipeline. They may later be annotated
//! with user [`Feedback`] (flag, thumbs up/down, free-text comment) by an
//! external collaborator; annotation mutates the same row.

pub mod memory;
#[cfg(feature = "store-sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LogError;
use crate::guardrail::{CheckPhase, SafetyResult};

/// User feedback attached to a logged interaction after the fact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Whether the user flagged this interaction for review.
    pub is_flagged: bool,
    /// Feedback kind (e.g. `"thumbs_up"`, `"thumbs_down"`).
    pub feedback_type: Option<String>,
    /// Free-text comment from the user.
    pub user_comment: Option<String>,
}

impl Feedback {
    /// Feedback that flags the interaction with the given kind and comment.
    #[must_use]
    pub fn flagged(
        feedback_type: impl Into<String>,
        user_comment: impl Into<Option<String>>,
    ) -> Self {
        Self {
            is_flagged: true,
            feedback_type: Some(feedback_type.into()),
            user_comment: user_comment.into(),
        }
    }
}

/// The persisted row for one [`SafetyResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedInteraction {
    /// The recorded check outcome.
    pub result: SafetyResult,
    /// User feedback, if any has been attached.
    pub feedback: Feedback,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written (record or annotation).
    pub updated_at: DateTime<Utc>,
}

/// Async trait for the interaction logging store.
///
/// Implementations enforce uniqueness on `(conversation_id, check_phase)`.
/// Failures are reported to the caller, who surfaces them to an operator
/// channel; they must never block the user-facing outcome of a turn.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Record a check outcome, replacing any existing row for the same
    /// `(conversation_id, check_phase)` key.
    ///
    /// Re-recording a key resets its feedback fields: feedback refers to
    /// the outcome the user saw, and that outcome has been replaced.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the backend rejects the write.
    async fn record(&self, result: &SafetyResult) -> Result<(), LogError>;

    /// Attach feedback to an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the row does not exist or the backend
    /// rejects the update.
    async fn annotate(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
        feedback: Feedback,
    ) -> Result<(), LogError>;

    /// Fetch the row for a key, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the backend rejects the read.
    async fn get(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
    ) -> Result<Option<LoggedInteraction>, LogError>;
}

/// A shared, reference-counted interaction store.
pub type SharedStore = Arc<dyn InteractionStore>;
