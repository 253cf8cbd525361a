//! Ordered-fallback gateway over completion backends.

use parking_lot::Mutex;
use proto::{BackendFailure, CompletionError, FailureKind};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::llm::BackendCandidate;

/// How the gateway picks a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Probe candidates once, cache the first usable one for the process
    /// lifetime, and route every request to it.
    #[default]
    DiscoverOnce,
    /// Try candidates in order on every request; first success wins.
    PerRequest,
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "discover_once" | "discover" => Ok(Self::DiscoverOnce),
            "per_request" => Ok(Self::PerRequest),
            other => Err(format!("unknown completion mode '{other}'")),
        }
    }
}

/// Outcome of probing one candidate.
#[derive(Debug, PartialEq, Eq)]
enum ProbeOutcome {
    Usable,
    /// Exists and is authorized but currently constrained.
    AcceptedDespite(FailureKind),
    Rejected(FailureKind),
}

fn probe_outcome(result: Result<(), BackendFailure>) -> ProbeOutcome {
    match result {
        Ok(()) => ProbeOutcome::Usable,
        Err(failure) if failure.kind.rejects_candidate() => ProbeOutcome::Rejected(failure.kind),
        Err(failure) => ProbeOutcome::AcceptedDespite(failure.kind),
    }
}

/// Single `complete(prompt)` entry point over an ordered candidate list.
pub struct CompletionGateway {
    candidates: Vec<BackendCandidate>,
    mode: SelectionMode,
    /// Index of the discovered candidate; `Some(None)` once discovery
    /// exhausted every candidate.
    active: OnceCell<Option<usize>>,
    /// Last candidate that answered in per-request mode.
    last_success: Mutex<Option<usize>>,
}

impl CompletionGateway {
    /// Creates a gateway over `candidates`, probed in the given order.
    pub fn new(candidates: Vec<BackendCandidate>, mode: SelectionMode) -> Self {
        Self {
            candidates,
            mode,
            active: OnceCell::new(),
            last_success: Mutex::new(None),
        }
    }

    /// Selection mode of this gateway.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Names of all configured candidates, in probe order.
    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.name()).collect()
    }

    /// Name of the backend currently answering requests, without
    /// triggering discovery.
    pub fn active_backend(&self) -> Option<&str> {
        let index = match self.mode {
            SelectionMode::DiscoverOnce => self.active.get().copied().flatten(),
            SelectionMode::PerRequest => *self.last_success.lock(),
        };
        index.map(|i| self.candidates[i].name())
    }

    /// Runs discovery if it has not run yet and returns the selected
    /// backend name. In per-request mode this only reports the last
    /// backend that answered.
    pub async fn discover(&self) -> Option<&str> {
        match self.mode {
            SelectionMode::DiscoverOnce => self
                .discovered()
                .await
                .map(|i| self.candidates[i].name()),
            SelectionMode::PerRequest => self.active_backend(),
        }
    }

    /// Generates a completion for `prompt`.
    pub async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        match self.mode {
            SelectionMode::DiscoverOnce => self.complete_with_active(prompt).await,
            SelectionMode::PerRequest => self.complete_per_request(prompt).await,
        }
    }

    async fn discovered(&self) -> Option<usize> {
        *self
            .active
            .get_or_init(|| async { self.run_discovery().await })
            .await
    }

    async fn run_discovery(&self) -> Option<usize> {
        if self.candidates.is_empty() {
            warn!("No completion backends configured");
            return None;
        }

        for (index, candidate) in self.candidates.iter().enumerate() {
            match probe_outcome(candidate.probe().await) {
                ProbeOutcome::Usable => {
                    info!(backend = %candidate.name(), "Completion backend selected");
                    return Some(index);
                }
                ProbeOutcome::AcceptedDespite(kind) => {
                    info!(
                        backend = %candidate.name(),
                        kind = %kind,
                        "Completion backend selected despite probe failure"
                    );
                    return Some(index);
                }
                ProbeOutcome::Rejected(kind) => {
                    debug!(backend = %candidate.name(), kind = %kind, "Completion backend unavailable");
                }
            }
        }

        warn!(
            candidates = self.candidates.len(),
            "Every completion backend was rejected during discovery"
        );
        None
    }

    async fn complete_with_active(&self, prompt: &str) -> Result<String, CompletionError> {
        let index = self
            .discovered()
            .await
            .ok_or(CompletionError::NoBackendAvailable)?;
        let candidate = &self.candidates[index];
        candidate
            .complete(prompt)
            .await
            .map_err(|failure| CompletionError::RequestFailed {
                backend: candidate.name().to_string(),
                failure,
            })
    }

    async fn complete_per_request(&self, prompt: &str) -> Result<String, CompletionError> {
        let mut last_error = CompletionError::NoBackendAvailable;
        for (index, candidate) in self.candidates.iter().enumerate() {
            match candidate.complete(prompt).await {
                Ok(text) => {
                    *self.last_success.lock() = Some(index);
                    return Ok(text);
                }
                Err(failure) => {
                    debug!(backend = %candidate.name(), kind = %failure.kind, "Candidate failed, trying next");
                    last_error = CompletionError::RequestFailed {
                        backend: candidate.name().to_string(),
                        failure,
                    };
                }
            }
        }
        Err(last_error)
    }
}
