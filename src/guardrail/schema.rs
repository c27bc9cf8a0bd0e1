//! Schema validation for classification payloads.
//!
//! The classification call is asked for a JSON object, but nothing
//! guarantees it produces one. [`parse_verdict`] is the strict boundary:
//! it either decodes the raw text into a typed [`GuardrailVerdict`] or
//! reports a [`SchemaError`] carrying the offending payload. It performs
//! no I/O and is deterministic given its input.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// The corrective action named by a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyAction {
    /// No rule was triggered; the content may proceed.
    Allow,
    /// The user's input violated policy; the turn stops before the agent.
    RefuseUser,
    /// The assistant's drafted reply violated policy; it must be suppressed.
    RefuseAssistant,
}

impl PolicyAction {
    /// Returns `true` for [`PolicyAction::Allow`].
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns the wire string form of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::RefuseUser => "RefuseUser",
            Self::RefuseAssistant => "RefuseAssistant",
        }
    }

    /// Parse the wire string form back into an action.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Allow" => Some(Self::Allow),
            "RefuseUser" => Some(Self::RefuseUser),
            "RefuseAssistant" => Some(Self::RefuseAssistant),
            _ => None,
        }
    }
}

/// The structured decision produced by a successful classification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    /// The corrective action to apply.
    pub action: PolicyAction,
    /// Identifiers of the rules that were violated, in the classifier's
    /// order. Empty when `action` is `Allow`.
    pub rules_violated: Vec<String>,
    /// Classifier-authored refusal text for a refused user input.
    #[serde(
        default,
        rename = "RefuseUser",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_refusal: Option<String>,
    /// Classifier-authored refusal text for a refused assistant reply.
    #[serde(
        default,
        rename = "RefuseAssistant",
        skip_serializing_if = "Option::is_none"
    )]
    pub assistant_refusal: Option<String>,
}

/// A validated classification payload: the verdict plus the optional
/// free-text analysis that accompanied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVerdict {
    /// The typed verdict.
    pub verdict: GuardrailVerdict,
    /// The classifier's reasoning, when present in the payload.
    pub analysis: Option<String>,
}

/// Wire shape of the payload the policy instructions ask the classifier
/// to emit. `action` and `rules_violated` are required; everything else
/// is optional. Unknown keys are ignored.
#[derive(Deserialize)]
struct VerdictPayload {
    action: PolicyAction,
    rules_violated: Vec<String>,
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default, rename = "RefuseUser")]
    user_refusal: Option<String>,
    #[serde(default, rename = "RefuseAssistant")]
    assistant_refusal: Option<String>,
}

/// Decode a raw classification payload into a [`ParsedVerdict`].
///
/// # Errors
///
/// Returns a [`SchemaError`] on malformed JSON, a missing or mistyped
/// required field, or an `action` value outside the enum.
pub fn parse_verdict(raw: &str) -> Result<ParsedVerdict, SchemaError> {
    let payload: VerdictPayload =
        serde_json::from_str(raw).map_err(|e| SchemaError::new(raw, e.to_string()))?;

    Ok(ParsedVerdict {
        verdict: GuardrailVerdict {
            action: payload.action,
            rules_violated: payload.rules_violated,
            user_refusal: payload.user_refusal,
            assistant_refusal: payload.assistant_refusal,
        },
        analysis: payload.analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow() {
        let parsed = parse_verdict(r#"{"action":"Allow","rules_violated":[]}"#).unwrap();
        assert_eq!(parsed.verdict.action, PolicyAction::Allow);
        assert!(parsed.verdict.rules_violated.is_empty());
        assert!(parsed.analysis.is_none());
    }

    #[test]
    fn test_parse_full_refusal_payload() {
        let raw = r#"{
            "action": "RefuseUser",
            "rules_violated": ["R1", "R3"],
            "analysis": "attempted prompt injection",
            "RefuseUser": "I can't help with that."
        }"#;
        let parsed = parse_verdict(raw).unwrap();

        assert_eq!(parsed.verdict.action, PolicyAction::RefuseUser);
        assert_eq!(parsed.verdict.rules_violated, vec!["R1", "R3"]);
        assert_eq!(
            parsed.verdict.user_refusal.as_deref(),
            Some("I can't help with that.")
        );
        assert_eq!(parsed.analysis.as_deref(), Some("attempted prompt injection"));
    }

    #[test]
    fn test_truncated_json_is_rejected() {
        let err = parse_verdict(r#"{"action":"Allow","rules_vio"#).unwrap_err();
        assert_eq!(err.raw, r#"{"action":"Allow","rules_vio"#);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(parse_verdict(r#"{"action":"Escalate","rules_violated":[]}"#).is_err());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        assert!(parse_verdict(r#"{"action":"Allow"}"#).is_err());
        assert!(parse_verdict(r#"{"rules_violated":[]}"#).is_err());
    }

    #[test]
    fn test_mistyped_rules_are_rejected() {
        assert!(parse_verdict(r#"{"action":"Allow","rules_violated":"none"}"#).is_err());
        assert!(parse_verdict(r#"{"action":"Allow","rules_violated":[1,2]}"#).is_err());
    }

    #[test]
    fn test_non_object_payloads_are_rejected() {
        assert!(parse_verdict("").is_err());
        assert!(parse_verdict("the content looks fine to me").is_err());
        assert!(parse_verdict("[]").is_err());
    }

    #[test]
    fn test_action_name_round_trip() {
        for action in [
            PolicyAction::Allow,
            PolicyAction::RefuseUser,
            PolicyAction::RefuseAssistant,
        ] {
            assert_eq!(PolicyAction::from_name(action.as_str()), Some(action));
        }
        assert_eq!(PolicyAction::from_name("allow"), None);
    }
}
