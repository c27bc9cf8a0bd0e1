//! Scriptable mock providers for tests and offline development.
//!
//! Both mocks are cheap to clone; clones share the same script and call
//! counter, so a test can keep a handle for assertions after handing the
//! mock to an engine or orchestrator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::context::ConversationContext;
use crate::error::ProviderError;
use crate::message::Message;

use super::{Classifier, ResponseAgent};

type Script = Mutex<VecDeque<Result<String, ProviderError>>>;

fn next_scripted(script: &Script, what: &str) -> Result<String, ProviderError> {
    let mut script = script
        .lock()
        .map_err(|_| ProviderError::provider("mock", "script lock poisoned"))?;
    script
        .pop_front()
        .unwrap_or_else(|| Err(ProviderError::provider("mock", format!("no scripted {what}"))))
}

/// A classifier that replays a scripted sequence of responses.
#[derive(Debug, Clone, Default)]
pub struct MockClassifier {
    inner: Arc<MockInner>,
}

#[derive(Debug, Default)]
struct MockInner {
    script: Script,
    calls: AtomicUsize,
}

impl MockClassifier {
    /// Create a mock with an empty script.
    ///
    /// An unscripted call fails with a provider error, so a test that
    /// forgets to enqueue a verdict fails loudly instead of passing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw classification payload to return.
    pub fn enqueue_verdict(&self, raw: impl Into<String>) {
        if let Ok(mut script) = self.inner.script.lock() {
            script.push_back(Ok(raw.into()));
        }
    }

    /// Enqueue a provider failure.
    pub fn enqueue_failure(&self, error: ProviderError) {
        if let Ok(mut script) = self.inner.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// Number of classification calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        _policy: &str,
        _context: &ConversationContext,
    ) -> Result<String, ProviderError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.inner.script, "verdict")
    }
}

/// A response agent that replays a scripted sequence of replies.
#[derive(Debug, Clone, Default)]
pub struct MockAgent {
    inner: Arc<MockInner>,
}

impl MockAgent {
    /// Create a mock with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a draft reply to return.
    pub fn enqueue_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.inner.script.lock() {
            script.push_back(Ok(reply.into()));
        }
    }

    /// Enqueue a provider failure.
    pub fn enqueue_failure(&self, error: ProviderError) {
        if let Ok(mut script) = self.inner.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// Number of generation calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseAgent for MockAgent {
    async fn generate(&self, _history: &[Message]) -> Result<String, ProviderError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.inner.script, "reply")
    }
}
