//! Google Gemini `generateContent` backend.

use std::time::Duration;

use async_trait::async_trait;
use proto::{BackendFailure, FailureKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{CompletionBackend, classify_reqwest_error, http_client};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Google RPC error envelope: `{"error": {"code", "status", "details"}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

// ── Backend ────────────────────────────────────────────────────────────────────

/// Gemini backend bound to one model.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    name: String,
}

impl GeminiBackend {
    /// Creates a backend targeting the public Gemini API.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self::with_base_url(api_key, GEMINI_API_BASE, model, timeout)
    }

    /// Creates a backend targeting a custom base URL (proxies/tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let model = model.into();
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: format!("gemini:{model}"),
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendFailure> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        debug!(model = %self.model, "Sending request to Gemini");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendFailure::new(classify_reqwest_error(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            debug!(model = %self.model, status = %status, "Gemini API error");
            return Err(BackendFailure::new(
                classify_error(status.as_u16(), &error_text),
                format!("Gemini API error ({status}): {error_text}"),
            ));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendFailure::new(FailureKind::InvalidResponse, e.to_string()))?;
        extract_text(parsed)
    }
}

/// Classifies an error response from its RPC reason and status, falling
/// back to the HTTP status when the body is not a Google error envelope.
///
/// An invalid API key comes back as HTTP 400 `INVALID_ARGUMENT` with reason
/// `API_KEY_INVALID`, which must reject the candidate.
fn classify_error(http_status: u16, body: &str) -> FailureKind {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return FailureKind::from_status(http_status);
    };
    let error = envelope.error;

    let by_reason = error.details.iter().find_map(|d| match d.reason.as_deref()? {
        "API_KEY_INVALID" | "API_KEY_EXPIRED" | "API_KEY_SERVICE_BLOCKED" => {
            Some(FailureKind::Forbidden)
        }
        "RATE_LIMIT_EXCEEDED" => Some(FailureKind::RateLimited),
        _ => None,
    });
    if let Some(kind) = by_reason {
        return kind;
    }

    match error.status.as_deref() {
        Some("PERMISSION_DENIED" | "UNAUTHENTICATED") => FailureKind::Forbidden,
        Some("NOT_FOUND") => FailureKind::NotFound,
        Some("RESOURCE_EXHAUSTED") => FailureKind::RateLimited,
        _ => FailureKind::from_status(http_status),
    }
}

/// Joins the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String, BackendFailure> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(BackendFailure::new(
            FailureKind::InvalidRequest,
            format!("Gemini returned no candidates: {reason}"),
        ));
    };

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        Err(BackendFailure::new(
            FailureKind::InvalidResponse,
            "Gemini candidate carried no text",
        ))
    } else {
        Ok(text)
    }
}
