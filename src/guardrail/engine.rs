//! The guardrail check engine.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::context::ConversationContext;
use crate::error::ProviderError;
use crate::providers::Classifier;

use super::schema;
use super::{CheckPhase, SafetyResult};

/// Runs one guardrail check end to end: serialize the context, invoke the
/// classifier, validate the payload, resolve to a [`SafetyResult`].
///
/// The engine holds the policy rules document and passes it unchanged into
/// every classification call. It never returns a raw fault — both schema
/// and transport failures become fail-closed results, so a caller always
/// has a decidable outcome.
#[derive(Clone)]
pub struct CheckEngine {
    classifier: Arc<dyn Classifier>,
    policy: Arc<str>,
    retry: RetryPolicy,
}

impl CheckEngine {
    /// Create an engine from a classifier and the policy rules text.
    ///
    /// The default [`RetryPolicy`] makes a single attempt per check.
    #[must_use]
    pub fn new(classifier: impl Classifier + 'static, policy: impl Into<String>) -> Self {
        Self {
            classifier: Arc::new(classifier),
            policy: policy.into().into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry policy applied to transient classification failures.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the policy rules text handed to every classification call.
    #[must_use]
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Evaluate one side of a turn against the policy.
    ///
    /// Infallible by contract: any internal failure resolves to a
    /// fail-closed (non-compliant) result rather than an error.
    pub async fn check(
        &self,
        conversation_id: &str,
        phase: CheckPhase,
        context: &ConversationContext,
    ) -> SafetyResult {
        let snapshot = context.to_prompt();
        debug!(conversation_id, %phase, "running guardrail check");

        let raw = match self.classify_with_retry(context).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(conversation_id, %phase, %error, "classification call failed, failing closed");
                return SafetyResult::provider_failure(conversation_id, phase, &error, snapshot);
            }
        };

        match schema::parse_verdict(&raw) {
            Ok(parsed) => {
                debug!(
                    conversation_id,
                    %phase,
                    action = parsed.verdict.action.as_str(),
                    "guardrail verdict parsed"
                );
                SafetyResult::from_verdict(conversation_id, phase, parsed, snapshot)
            }
            Err(error) => {
                warn!(conversation_id, %phase, %error, "classification payload failed schema validation, failing closed");
                SafetyResult::schema_failure(conversation_id, phase, &error, snapshot)
            }
        }
    }

    /// Invoke the classifier, retrying transient failures per the policy.
    async fn classify_with_retry(
        &self,
        context: &ConversationContext,
    ) -> Result<String, ProviderError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.classifier.classify(&self.policy, context).await {
                Ok(raw) => return Ok(raw),
                Err(error) if error.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, %error, "retrying classification call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl std::fmt::Debug for CheckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckEngine")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
