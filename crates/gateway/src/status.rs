//! Operator-facing status derived from the session snapshot.

use agent::CompletionGateway;
use proto::PairingCode;

use crate::session::{SessionSnapshot, SessionState};

/// What an operator needs to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusView {
    Initializing,
    AwaitingPairing { code: PairingCode },
    Connected,
}

impl StatusView {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        match (&snapshot.state, &snapshot.pairing_code) {
            (SessionState::Open, _) => Self::Connected,
            (_, Some(code)) => Self::AwaitingPairing { code: code.clone() },
            _ => Self::Initializing,
        }
    }
}

/// Status view plus the backend currently serving completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub view: StatusView,
    pub active_backend: Option<String>,
}

impl StatusReport {
    pub fn new(snapshot: &SessionSnapshot, gateway: &CompletionGateway) -> Self {
        Self {
            view: StatusView::from_snapshot(snapshot),
            active_backend: gateway.active_backend().map(str::to_string),
        }
    }

    /// One-line summary for logs and the terminal.
    pub fn headline(&self) -> String {
        let backend = self.active_backend.as_deref().unwrap_or("none");
        match &self.view {
            StatusView::Initializing => format!("Initializing (backend: {backend})"),
            StatusView::AwaitingPairing { .. } => {
                format!("Waiting for QR scan (backend: {backend})")
            }
            StatusView::Connected => format!("Connected (backend: {backend})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use agent::SelectionMode;
    use chrono::Utc;

    use super::*;

    fn snapshot(state: SessionState, code: Option<&str>) -> SessionSnapshot {
        SessionSnapshot {
            generation: 1,
            state,
            pairing_code: code.map(PairingCode::from),
            last_close: None,
            since: Utc::now(),
        }
    }

    #[test]
    fn view_follows_state_and_code() {
        assert_eq!(
            StatusView::from_snapshot(&snapshot(SessionState::Connecting, None)),
            StatusView::Initializing
        );
        assert_eq!(
            StatusView::from_snapshot(&snapshot(SessionState::AwaitingPairing, Some("2@qr"))),
            StatusView::AwaitingPairing {
                code: PairingCode::from("2@qr")
            }
        );
        assert_eq!(
            StatusView::from_snapshot(&snapshot(SessionState::AwaitingPairing, None)),
            StatusView::Initializing
        );
        assert_eq!(
            StatusView::from_snapshot(&snapshot(SessionState::Open, None)),
            StatusView::Connected
        );
    }

    #[test]
    fn report_without_backends() {
        let gateway = CompletionGateway::new(Vec::new(), SelectionMode::DiscoverOnce);
        let report = StatusReport::new(&snapshot(SessionState::Open, None), &gateway);
        assert_eq!(report.active_backend, None);
        assert_eq!(report.headline(), "Connected (backend: none)");
    }
}
