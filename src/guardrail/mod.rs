//! Guardrail check pipeline — classification, validation, and outcomes.
//!
//! A guardrail check evaluates one side of a conversational turn (the
//! user's input, or the assistant's drafted reply) against a policy rules
//! document, via an external classification call whose free-form output is
//! forced into a strict schema.
//!
//! # Fail-Closed Contract
//!
//! The single most important property of this module: the
//! [`CheckEngine`] never raises a raw fault. Every failure — malformed
//! classification payload, provider timeout, network error — is converted
//! into a well-formed [`SafetyResult`] with `compliant = false`, so the
//! orchestrator always has a decidable outcome and an internal error can
//! never default to "allow".
//!
//! # Components
//!
//! - [`schema`] — decodes raw classification text into a
//!   [`GuardrailVerdict`], or reports a structured [`SchemaError`].
//! - [`CheckEngine`] — serializes the context, invokes the
//!   [`Classifier`](crate::providers::Classifier), validates the payload,
//!   and resolves to a [`SafetyResult`].
//!
//! [`SchemaError`]: crate::error::SchemaError

mod engine;
pub mod schema;

pub use engine::CheckEngine;
pub use schema::{GuardrailVerdict, ParsedVerdict, PolicyAction};

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, SchemaError};

/// Which side of a turn is being evaluated.
///
/// Part of the logging key: the interaction store holds at most one row
/// per `(conversation_id, check_phase)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    /// The user's input is being evaluated.
    UserCheck,
    /// The assistant's drafted reply is being evaluated.
    AssistantCheck,
}

impl CheckPhase {
    /// Returns the stable string form used as part of the storage key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserCheck => "user_check",
            Self::AssistantCheck => "assistant_check",
        }
    }

    /// Parse the stable string form back into a phase.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "user_check" => Some(Self::UserCheck),
            "assistant_check" => Some(Self::AssistantCheck),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full outcome of one guardrail check.
///
/// Produced by [`CheckEngine::check`] for every check that runs, whether
/// the classification call succeeded or not. `compliant` is derived, never
/// caller-supplied: it is `true` iff the verdict parsed and its action is
/// [`PolicyAction::Allow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyResult {
    /// The conversation this check belongs to.
    pub conversation_id: String,
    /// Which side of the turn was evaluated.
    pub check_phase: CheckPhase,
    /// Whether the evaluated content complies with the policy.
    pub compliant: bool,
    /// The parsed verdict, when the classification payload validated.
    pub verdict: Option<GuardrailVerdict>,
    /// The classifier's free-text analysis, when the payload carried one.
    pub analysis: Option<String>,
    /// `true` when the payload failed schema validation.
    pub schema_validation_error: bool,
    /// Diagnostic for schema or transport failures.
    pub error_message: Option<String>,
    /// The serialized evaluation context the classifier saw.
    ///
    /// For an assistant-side check this includes the drafted reply, which
    /// is how a suppressed draft stays available for audit.
    pub context_snapshot: String,
}

impl SafetyResult {
    /// Build a result from a successfully validated verdict.
    #[must_use]
    pub fn from_verdict(
        conversation_id: impl Into<String>,
        check_phase: CheckPhase,
        parsed: ParsedVerdict,
        context_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            check_phase,
            compliant: parsed.verdict.action.is_allow(),
            verdict: Some(parsed.verdict),
            analysis: parsed.analysis,
            schema_validation_error: false,
            error_message: None,
            context_snapshot: context_snapshot.into(),
        }
    }

    /// Build the fail-closed result for a payload that failed validation.
    #[must_use]
    pub fn schema_failure(
        conversation_id: impl Into<String>,
        check_phase: CheckPhase,
        error: &SchemaError,
        context_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            check_phase,
            compliant: false,
            verdict: None,
            analysis: None,
            schema_validation_error: true,
            error_message: Some(error.detail.clone()),
            context_snapshot: context_snapshot.into(),
        }
    }

    /// Build the fail-closed result for a classification transport failure.
    #[must_use]
    pub fn provider_failure(
        conversation_id: impl Into<String>,
        check_phase: CheckPhase,
        error: &ProviderError,
        context_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            check_phase,
            compliant: false,
            verdict: None,
            analysis: None,
            schema_validation_error: false,
            error_message: Some(error.to_string()),
            context_snapshot: context_snapshot.into(),
        }
    }

    /// Whether the evaluated content complies with the policy.
    #[must_use]
    pub const fn is_compliant(&self) -> bool {
        self.compliant
    }

    /// The policy action this result resolves to.
    ///
    /// When no verdict is available (fail-closed), the action defaults to
    /// refusing the side of the turn that was being checked.
    #[must_use]
    pub fn effective_action(&self) -> PolicyAction {
        self.verdict.as_ref().map_or(
            match self.check_phase {
                CheckPhase::UserCheck => PolicyAction::RefuseUser,
                CheckPhase::AssistantCheck => PolicyAction::RefuseAssistant,
            },
            |v| v.action,
        )
    }
}
