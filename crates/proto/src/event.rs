use serde::{Deserialize, Serialize};

/// Close code WhatsApp uses when the device was unlinked.
pub const LOGGED_OUT_CODE: u16 = 401;
/// Close code WhatsApp uses for banned or forbidden accounts.
pub const FORBIDDEN_CODE: u16 = 403;

/// One-time pairing payload issued by the transport. Opaque: it is only
/// ever handed to a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode(pub String);

impl PairingCode {
    /// Raw payload.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PairingCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session authentication material. Opaque to everything but the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

/// How a close reason affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Logged out or banned: wipe credentials and pair again.
    Terminal,
    /// Anything else: keep credentials and reconnect after a delay.
    Recoverable,
}

/// Why the transport connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloseReason {
    /// Numeric close code, when the transport supplied one.
    #[serde(default)]
    pub code: Option<u16>,
    /// Symbolic or human-readable reason.
    #[serde(default)]
    pub message: Option<String>,
}

impl CloseReason {
    /// Builds a reason from an optional code and message.
    pub fn new(code: Option<u16>, message: Option<String>) -> Self {
        Self { code, message }
    }

    /// The remote logged this device out.
    pub fn logged_out() -> Self {
        Self::new(Some(LOGGED_OUT_CODE), Some("logged out".to_string()))
    }

    /// Transport went away without reporting a reason.
    pub fn transport_exited() -> Self {
        Self::new(None, Some("transport exited".to_string()))
    }

    /// Classifies this reason as terminal or recoverable.
    pub fn classify(&self) -> CloseKind {
        let terminal_code = matches!(self.code, Some(LOGGED_OUT_CODE | FORBIDDEN_CODE));
        let terminal_message = self
            .message
            .as_deref()
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("logged out"));
        if terminal_code || terminal_message {
            CloseKind::Terminal
        } else {
            CloseKind::Recoverable
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{code} ({message})"),
            (Some(code), None) => write!(f, "{code}"),
            (None, Some(message)) => f.write_str(message),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// Connection-state change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// A new pairing code is available; replaces any previous one.
    PairingCode(PairingCode),
    /// The current pairing code lapsed before it was scanned.
    PairingExpired,
    /// Pairing accepted or stored credentials presented; handshake running.
    Authenticating,
    /// Fully connected.
    Open {
        /// Account identifier, when reported.
        account: Option<String>,
    },
    /// Connection dropped.
    Closed(CloseReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_and_forbidden_codes_are_terminal() {
        assert_eq!(CloseReason::logged_out().classify(), CloseKind::Terminal);
        assert_eq!(
            CloseReason::new(Some(403), None).classify(),
            CloseKind::Terminal
        );
        assert_eq!(
            CloseReason::new(None, Some(" Logged Out ".to_string())).classify(),
            CloseKind::Terminal
        );
    }

    #[test]
    fn other_reasons_are_recoverable() {
        for code in [408, 428, 440, 500, 503, 515] {
            assert_eq!(
                CloseReason::new(Some(code), Some("connection lost".to_string())).classify(),
                CloseKind::Recoverable,
                "code {code}"
            );
        }
        assert_eq!(CloseReason::default().classify(), CloseKind::Recoverable);
        assert_eq!(
            CloseReason::transport_exited().classify(),
            CloseKind::Recoverable
        );
    }

    #[test]
    fn close_reason_display_formats() {
        assert_eq!(CloseReason::logged_out().to_string(), "401 (logged out)");
        assert_eq!(CloseReason::new(Some(515), None).to_string(), "515");
        assert_eq!(CloseReason::default().to_string(), "unknown");
    }

    #[test]
    fn credentials_serialize_transparently() {
        let creds = Credentials(serde_json::json!({"me": {"id": "1"}}));
        let text = serde_json::to_string(&creds).expect("serialize");
        assert_eq!(text, r#"{"me":{"id":"1"}}"#);
    }
}
