//! OpenAI-compatible chat completions client.
//!
//! Works against OpenAI's API as well as compatible gateways (OpenRouter,
//! local proxies) via a custom base URL. The same client backs both
//! provider seams: [`OpenAiClassifier`] asks for a JSON-object completion
//! governed by the policy instructions, [`OpenAiAgent`] produces the
//! assistant's substantive reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::HttpClientConfig;
use crate::context::ConversationContext;
use crate::error::ProviderError;
use crate::message::Message;

use super::{Classifier, ResponseAgent};

/// Default OpenAI API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER_NAME: &str = "openai";

/// HTTP client for an OpenAI-compatible chat completions endpoint.
///
/// Requests carry a bounded timeout (from [`HttpClientConfig`], default
/// 120 s); expiry surfaces as a timeout [`ProviderError`].
///
/// # Example
///
/// ```rust,ignore
/// use palisade::providers::OpenAiClient;
///
/// // Official API
/// let client = OpenAiClient::new("sk-...");
///
/// // An OpenAI-compatible gateway
/// let client = OpenAiClient::builder()
///     .api_key("sk-or-...")
///     .base_url("https://openrouter.ai/api/v1")
///     .build();
/// ```
#[derive(Clone)]
pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_key: Arc<str>,
    base_url: Arc<str>,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    /// Create a new client with the given API key and the default base URL.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::builder().api_key(api_key).build()
    }

    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> OpenAiClientBuilder {
        OpenAiClientBuilder::default()
    }

    /// Send one chat completion request and return the message content.
    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::auth(PROVIDER_NAME, body),
                429 => ProviderError::rate_limited(PROVIDER_NAME),
                code => ProviderError::http_status(code, body),
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ProviderError::provider(PROVIDER_NAME, e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::provider(PROVIDER_NAME, "completion contained no message content")
            })
    }
}

/// Builder for [`OpenAiClient`].
#[derive(Debug, Default)]
pub struct OpenAiClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    http_config: Option<HttpClientConfig>,
}

impl OpenAiClientBuilder {
    /// Set the API key.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set a custom base URL (for gateways and proxies).
    ///
    /// A trailing slash is stripped.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the HTTP client configuration (timeout, user agent).
    #[must_use]
    pub fn http_config(mut self, config: HttpClientConfig) -> Self {
        self.http_config = Some(config);
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> OpenAiClient {
        let base_url = self
            .base_url
            .unwrap_or_else(|| OPENAI_API_BASE_URL.to_owned());
        let base_url = base_url.trim_end_matches('/').to_owned();

        OpenAiClient {
            http_client: self.http_config.unwrap_or_default().build_client(),
            api_key: self.api_key.unwrap_or_default().into(),
            base_url: base_url.into(),
        }
    }
}

/// Classification seam backed by an [`OpenAiClient`].
///
/// Sends the policy instructions as the system message and the serialized
/// conversation context as the user message, requesting a JSON-object
/// completion.
#[derive(Debug, Clone)]
pub struct OpenAiClassifier {
    client: OpenAiClient,
    model: String,
}

impl OpenAiClassifier {
    /// Create a classifier using the given model id.
    #[must_use]
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(
        &self,
        policy: &str,
        context: &ConversationContext,
    ) -> Result<String, ProviderError> {
        let serialized = context.to_prompt();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: policy,
                },
                WireMessage {
                    role: "user",
                    content: &serialized,
                },
            ],
            response_format: Some(ResponseFormat {
                format_type: "json_object",
            }),
            temperature: None,
            max_tokens: None,
        };
        self.client.chat(&request).await
    }
}

/// Agent-response seam backed by an [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct OpenAiAgent {
    client: OpenAiClient,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiAgent {
    /// Create an agent using the given model id.
    #[must_use]
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: None,
            temperature: 0.6,
            max_tokens: 4096,
        }
    }

    /// Set the agent's system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ResponseAgent for OpenAiAgent {
    async fn generate(&self, history: &[Message]) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(WireMessage {
                role: "system",
                content: prompt,
            });
        }
        messages.extend(history.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let request = ChatRequest {
            model: &self.model,
            messages,
            response_format: None,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };
        self.client.chat(&request).await
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}
