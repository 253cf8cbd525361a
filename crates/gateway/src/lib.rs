//! Gateway components: session lifecycle, credential storage, message
//! routing and completion dispatch.

pub mod credentials;
pub mod dispatch;
pub mod router;
pub mod session;
pub mod status;

/// Session directory persistence.
pub use credentials::CredentialStore;
/// Per-message completion dispatch.
pub use dispatch::{Dispatcher, LiveLink};
/// Text extraction and trigger parsing.
pub use router::{MessageRouter, RouterPolicy, TRIGGER_PREFIX, extract_text, parse_trigger};
/// Session manager and its published snapshot.
pub use session::{ReconnectPolicy, SessionManager, SessionSnapshot, SessionState};
/// Operator status view.
pub use status::{StatusReport, StatusView};
