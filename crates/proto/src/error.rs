use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Transport errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport could not be started or reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Sending a command or reply failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Transport has been closed.
    #[error("Channel closed")]
    Closed,
}

/// Structured classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Model or endpoint does not exist (HTTP 404).
    NotFound,
    /// Credentials rejected or model not permitted (HTTP 401/403).
    Forbidden,
    /// Provider throttled the request (HTTP 429).
    RateLimited,
    /// Account quota or billing exhausted.
    QuotaExceeded,
    /// Malformed request or rejected input (HTTP 400).
    InvalidRequest,
    /// Server-side failure (HTTP 5xx).
    Server,
    /// Connection failure or timeout.
    Network,
    /// Response could not be interpreted.
    InvalidResponse,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Maps an HTTP status code to a failure kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            401 | 403 => Self::Forbidden,
            429 => Self::RateLimited,
            402 => Self::QuotaExceeded,
            400 | 413 | 422 => Self::InvalidRequest,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Returns `true` when a candidate failing this way is unusable and
    /// discovery should move on to the next one.
    pub fn rejects_candidate(self) -> bool {
        matches!(self, Self::NotFound | Self::Forbidden)
    }

    /// Short lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::InvalidRequest => "invalid_request",
            Self::Server => "server",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a single completion backend call.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct BackendFailure {
    /// Structured classification.
    pub kind: FailureKind,
    /// Provider-supplied detail, for logs only.
    pub message: String,
}

impl BackendFailure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Completion gateway errors
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// Discovery rejected every candidate, or none were configured.
    #[error("No completion backend available")]
    NoBackendAvailable,

    /// The selected backend failed at request time.
    #[error("Backend {backend} failed ({}): {}", .failure.kind, .failure.message)]
    RequestFailed {
        backend: String,
        failure: BackendFailure,
    },
}

impl CompletionError {
    /// Short reply text suitable for the triggering chat.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoBackendAvailable => {
                "The assistant is currently unavailable. Please try again later."
            }
            Self::RequestFailed { .. } => "Sorry, I encountered an error processing your request.",
        }
    }
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored material could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credential persistence failed in a way that prevents connecting.
    #[error("Credential store failure: {0}")]
    Store(#[from] StoreError),

    /// Configured reconnect limit reached without reaching an open session.
    #[error("Gave up after {attempts} consecutive reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}
