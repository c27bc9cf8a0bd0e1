//! In-memory interaction store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::LogError;
use crate::guardrail::{CheckPhase, SafetyResult};

use super::{Feedback, InteractionStore, LoggedInteraction};

type Key = (String, CheckPhase);

/// A `HashMap`-backed store for tests and ephemeral embedding.
///
/// Clones share the same underlying map, so a test can keep a handle for
/// assertions after handing the store to an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<HashMap<Key, LoggedInteraction>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Returns `true` if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn record(&self, result: &SafetyResult) -> Result<(), LogError> {
        let mut rows = self.rows.lock().map_err(|e| LogError::Lock(e.to_string()))?;
        let key = (result.conversation_id.clone(), result.check_phase);
        let now = Utc::now();

        let created_at = rows.get(&key).map_or(now, |existing| existing.created_at);
        rows.insert(
            key,
            LoggedInteraction {
                result: result.clone(),
                feedback: Feedback::default(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn annotate(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
        feedback: Feedback,
    ) -> Result<(), LogError> {
        let mut rows = self.rows.lock().map_err(|e| LogError::Lock(e.to_string()))?;
        let key = (conversation_id.to_owned(), phase);

        let row = rows.get_mut(&key).ok_or_else(|| {
            LogError::storage("memory", format!("no interaction for {conversation_id}/{phase}"))
        })?;
        row.feedback = feedback;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn get(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
    ) -> Result<Option<LoggedInteraction>, LogError> {
        let rows = self.rows.lock().map_err(|e| LogError::Lock(e.to_string()))?;
        Ok(rows.get(&(conversation_id.to_owned(), phase)).cloned())
    }
}
