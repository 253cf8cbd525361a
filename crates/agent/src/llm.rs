//! Completion backend abstraction and OpenAI-compatible implementation.

use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use proto::{BackendFailure, FailureKind};
use tracing::debug;

/// Prompt sent while probing candidates during discovery.
pub const CANARY_PROMPT: &str = "ping";

/// One text-generation backend/model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Stable display name, e.g. `gemini:gemini-1.5-flash`.
    fn name(&self) -> &str;

    /// Generates a completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String, BackendFailure>;

    /// Checks that this backend is usable with a trivial prompt.
    async fn probe(&self) -> Result<(), BackendFailure> {
        self.complete(CANARY_PROMPT).await.map(|_| ())
    }
}

/// An entry in the ordered candidate list.
pub type BackendCandidate = Arc<dyn CompletionBackend>;

/// Builds a reqwest client with the outbound call timeout applied.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Classifies a transport-level reqwest error.
pub fn classify_reqwest_error(err: &reqwest::Error) -> FailureKind {
    if let Some(status) = err.status() {
        FailureKind::from_status(status.as_u16())
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        FailureKind::Network
    } else if err.is_decode() {
        FailureKind::InvalidResponse
    } else {
        FailureKind::Other
    }
}

/// OpenAI-compatible chat-completions backend (OpenAI, Together, Ollama, ...).
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    name: String,
}

impl OpenAiBackend {
    /// Creates a backend for `model` using the default API base URL.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self::build(OpenAIConfig::new().with_api_key(api_key), model.into(), timeout)
    }

    /// Creates a backend for `model` with a custom API base URL.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self::build(config, model.into(), timeout)
    }

    fn build(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        // Rate limits must surface to the gateway instead of being retried here.
        let no_retry = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();
        let client = Client::with_config(config)
            .with_http_client(http_client(timeout))
            .with_backoff(no_retry);
        Self {
            client,
            name: format!("openai:{model}"),
            model,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendFailure> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| BackendFailure::new(FailureKind::InvalidRequest, e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()
            .map_err(|e| BackendFailure::new(FailureKind::InvalidRequest, e.to_string()))?;

        debug!(model = %self.model, "Sending request to OpenAI-compatible endpoint");

        let response = self.client.chat().create(request).await.map_err(|e| {
            let kind = classify_openai_error(&e);
            debug!(model = %self.model, kind = %kind, error = %e, "OpenAI API error");
            BackendFailure::new(kind, e.to_string())
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendFailure::new(FailureKind::InvalidResponse, "No choices in response"))
    }
}

/// Maps an async-openai error to a failure kind using the structured
/// `code`/`type` fields of the API error body.
fn classify_openai_error(err: &OpenAIError) -> FailureKind {
    match err {
        OpenAIError::Reqwest(e) => classify_reqwest_error(e),
        OpenAIError::ApiError(api) => classify_api_error(api),
        OpenAIError::JSONDeserialize(_) => FailureKind::InvalidResponse,
        OpenAIError::InvalidArgument(_) => FailureKind::InvalidRequest,
        _ => FailureKind::Other,
    }
}

fn classify_api_error(api: &ApiError) -> FailureKind {
    match api.code.as_deref() {
        Some("model_not_found") => return FailureKind::NotFound,
        Some("invalid_api_key" | "unsupported_country_region_territory") => {
            return FailureKind::Forbidden;
        }
        Some("rate_limit_exceeded") => return FailureKind::RateLimited,
        Some("insufficient_quota") => return FailureKind::QuotaExceeded,
        _ => {}
    }
    match api.r#type.as_deref() {
        Some("insufficient_quota") => FailureKind::QuotaExceeded,
        Some("authentication_error" | "permission_error") => FailureKind::Forbidden,
        Some("not_found_error") => FailureKind::NotFound,
        Some("invalid_request_error") => FailureKind::InvalidRequest,
        Some("server_error") => FailureKind::Server,
        _ => FailureKind::Other,
    }
}
