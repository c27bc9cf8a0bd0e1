//! SQLite interaction store.
//!
//! Uniqueness on `(conversation_id, check_phase)` is enforced by the
//! table's primary key; [`record`](super::InteractionStore::record) is an
//! `ON CONFLICT ... DO UPDATE` upsert. Blocking rusqlite work runs on
//! `spawn_blocking` so the async caller is never stalled on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::LogError;
use crate::guardrail::{CheckPhase, GuardrailVerdict, PolicyAction, SafetyResult};

use super::{Feedback, InteractionStore, LoggedInteraction};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS interactions (
    conversation_id         TEXT    NOT NULL,
    check_phase             TEXT    NOT NULL,
    compliant               INTEGER NOT NULL,
    action                  TEXT,
    rules_violated          TEXT,
    user_refusal            TEXT,
    assistant_refusal       TEXT,
    analysis                TEXT,
    schema_validation_error INTEGER NOT NULL DEFAULT 0,
    error_message           TEXT,
    context_snapshot        TEXT    NOT NULL,
    is_flagged              INTEGER NOT NULL DEFAULT 0,
    feedback_type           TEXT,
    user_comment            TEXT,
    created_at              TEXT    NOT NULL,
    updated_at              TEXT    NOT NULL,
    PRIMARY KEY (conversation_id, check_phase)
);
";

/// Interaction store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`LogError`] when the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, LogError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LogError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, LogError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, LogError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| LogError::Lock(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| LogError::Task(e.to_string()))?
    }
}

#[async_trait]
impl InteractionStore for SqliteStore {
    async fn record(&self, result: &SafetyResult) -> Result<(), LogError> {
        let result = result.clone();
        self.with_conn(move |conn| {
            let (action, rules, user_refusal, assistant_refusal) = match &result.verdict {
                Some(v) => (
                    Some(v.action.as_str()),
                    Some(serde_json::to_string(&v.rules_violated)?),
                    v.user_refusal.clone(),
                    v.assistant_refusal.clone(),
                ),
                None => (None, None, None, None),
            };
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO interactions (
                    conversation_id, check_phase, compliant, action, rules_violated,
                    user_refusal, assistant_refusal, analysis, schema_validation_error,
                    error_message, context_snapshot, is_flagged, feedback_type,
                    user_comment, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, NULL, NULL, ?12, ?12)
                 ON CONFLICT(conversation_id, check_phase) DO UPDATE SET
                    compliant = excluded.compliant,
                    action = excluded.action,
                    rules_violated = excluded.rules_violated,
                    user_refusal = excluded.user_refusal,
                    assistant_refusal = excluded.assistant_refusal,
                    analysis = excluded.analysis,
                    schema_validation_error = excluded.schema_validation_error,
                    error_message = excluded.error_message,
                    context_snapshot = excluded.context_snapshot,
                    is_flagged = 0,
                    feedback_type = NULL,
                    user_comment = NULL,
                    updated_at = excluded.updated_at",
                params![
                    result.conversation_id,
                    result.check_phase.as_str(),
                    result.compliant,
                    action,
                    rules,
                    user_refusal,
                    assistant_refusal,
                    result.analysis,
                    result.schema_validation_error,
                    result.error_message,
                    result.context_snapshot,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn annotate(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
        feedback: Feedback,
    ) -> Result<(), LogError> {
        let conversation_id = conversation_id.to_owned();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE interactions
                 SET is_flagged = ?1, feedback_type = ?2, user_comment = ?3, updated_at = ?4
                 WHERE conversation_id = ?5 AND check_phase = ?6",
                params![
                    feedback.is_flagged,
                    feedback.feedback_type,
                    feedback.user_comment,
                    Utc::now().to_rfc3339(),
                    conversation_id,
                    phase.as_str(),
                ],
            )?;
            if updated == 0 {
                return Err(LogError::storage(
                    "sqlite",
                    format!("no interaction for {conversation_id}/{phase}"),
                ));
            }
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
    ) -> Result<Option<LoggedInteraction>, LogError> {
        let conversation_id = conversation_id.to_owned();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT conversation_id, check_phase, compliant, action, rules_violated,
                            user_refusal, assistant_refusal, analysis, schema_validation_error,
                            error_message, context_snapshot, is_flagged, feedback_type,
                            user_comment, created_at, updated_at
                     FROM interactions
                     WHERE conversation_id = ?1 AND check_phase = ?2",
                    params![conversation_id, phase.as_str()],
                    |row| {
                        Ok(RawRow {
                            conversation_id: row.get(0)?,
                            check_phase: row.get(1)?,
                            compliant: row.get(2)?,
                            action: row.get(3)?,
                            rules_violated: row.get(4)?,
                            user_refusal: row.get(5)?,
                            assistant_refusal: row.get(6)?,
                            analysis: row.get(7)?,
                            schema_validation_error: row.get(8)?,
                            error_message: row.get(9)?,
                            context_snapshot: row.get(10)?,
                            is_flagged: row.get(11)?,
                            feedback_type: row.get(12)?,
                            user_comment: row.get(13)?,
                            created_at: row.get(14)?,
                            updated_at: row.get(15)?,
                        })
                    },
                )
                .optional()?;

            raw.map(RawRow::into_interaction).transpose()
        })
        .await
    }
}

/// Column values as stored, before decoding into domain types.
struct RawRow {
    conversation_id: String,
    check_phase: String,
    compliant: bool,
    action: Option<String>,
    rules_violated: Option<String>,
    user_refusal: Option<String>,
    assistant_refusal: Option<String>,
    analysis: Option<String>,
    schema_validation_error: bool,
    error_message: Option<String>,
    context_snapshot: String,
    is_flagged: bool,
    feedback_type: Option<String>,
    user_comment: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn into_interaction(self) -> Result<LoggedInteraction, LogError> {
        let check_phase = CheckPhase::from_name(&self.check_phase).ok_or_else(|| {
            LogError::storage("sqlite", format!("unknown check phase: {}", self.check_phase))
        })?;

        let verdict = match self.action {
            Some(name) => {
                let action = PolicyAction::from_name(&name).ok_or_else(|| {
                    LogError::storage("sqlite", format!("unknown action: {name}"))
                })?;
                let rules_violated = match self.rules_violated {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                Some(GuardrailVerdict {
                    action,
                    rules_violated,
                    user_refusal: self.user_refusal,
                    assistant_refusal: self.assistant_refusal,
                })
            }
            None => None,
        };

        Ok(LoggedInteraction {
            result: SafetyResult {
                conversation_id: self.conversation_id,
                check_phase,
                compliant: self.compliant,
                verdict,
                analysis: self.analysis,
                schema_validation_error: self.schema_validation_error,
                error_message: self.error_message,
                context_snapshot: self.context_snapshot,
            },
            feedback: Feedback {
                is_flagged: self.is_flagged,
                feedback_type: self.feedback_type,
                user_comment: self.user_comment,
            },
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LogError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LogError::storage("sqlite", format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::guardrail::schema::ParsedVerdict;

    fn refusal_result(conversation_id: &str) -> SafetyResult {
        SafetyResult::from_verdict(
            conversation_id,
            CheckPhase::UserCheck,
            ParsedVerdict {
                verdict: GuardrailVerdict {
                    action: PolicyAction::RefuseUser,
                    rules_violated: vec!["R1".into(), "R2".into()],
                    user_refusal: Some("I can't help with that.".into()),
                    assistant_refusal: None,
                },
                analysis: Some("matched two rules".into()),
            },
            "<input>...</input>",
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = refusal_result("c1");

        store.record(&result).await.unwrap();
        let row = store.get("c1", CheckPhase::UserCheck).await.unwrap().unwrap();

        assert_eq!(row.result, result);
        assert!(!row.feedback.is_flagged);
    }

    #[tokio::test]
    async fn test_duplicate_record_keeps_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record(&refusal_result("c1")).await.unwrap();

        let second = SafetyResult::schema_failure(
            "c1",
            CheckPhase::UserCheck,
            &SchemaError::new("{oops", "truncated"),
            "<input/>",
        );
        store.record(&second).await.unwrap();

        let row = store.get("c1", CheckPhase::UserCheck).await.unwrap().unwrap();
        assert_eq!(row.result, second);
        assert!(row.result.schema_validation_error);
        assert!(row.result.verdict.is_none());
    }

    #[tokio::test]
    async fn test_annotate_and_reset_on_rerecord() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = refusal_result("c1");
        store.record(&result).await.unwrap();

        store
            .annotate(
                "c1",
                CheckPhase::UserCheck,
                Feedback::flagged("thumbs_down", Some("disagree".to_owned())),
            )
            .await
            .unwrap();

        let row = store.get("c1", CheckPhase::UserCheck).await.unwrap().unwrap();
        assert!(row.feedback.is_flagged);
        assert_eq!(row.feedback.user_comment.as_deref(), Some("disagree"));

        store.record(&result).await.unwrap();
        let row = store.get("c1", CheckPhase::UserCheck).await.unwrap().unwrap();
        assert_eq!(row.feedback, Feedback::default());
    }

    #[tokio::test]
    async fn test_annotate_missing_row_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .annotate("ghost", CheckPhase::AssistantCheck, Feedback::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no interaction"));
    }

    #[tokio::test]
    async fn test_get_missing_row_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("nope", CheckPhase::UserCheck).await.unwrap().is_none());
    }
}
