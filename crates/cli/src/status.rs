//! Terminal status reporting: pairing prompts and headline logging.

use std::sync::Arc;

use agent::CompletionGateway;
use gateway::{SessionSnapshot, StatusReport};
use proto::PairingCode;
use tokio::sync::{Notify, watch};

use crate::qr;

/// One thing to show the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// QR block plus scan instructions, printed to stdout.
    Prompt(String),
    /// State summary, logged at info.
    Headline { generation: u64, text: String },
}

/// Remembers what was already shown so repeats are suppressed.
#[derive(Default)]
pub struct StatusTracker {
    last_code: Option<PairingCode>,
    last_headline: String,
}

impl StatusTracker {
    pub fn observe(
        &mut self,
        snapshot: &SessionSnapshot,
        gateway: Option<&CompletionGateway>,
    ) -> Vec<StatusLine> {
        let mut lines = Vec::new();

        if snapshot.pairing_code != self.last_code {
            if let Some(code) = &snapshot.pairing_code {
                lines.push(StatusLine::Prompt(qr::pairing_prompt(code)));
            }
            self.last_code = snapshot.pairing_code.clone();
        }

        if let Some(gateway) = gateway {
            let headline = StatusReport::new(snapshot, gateway).headline();
            if headline != self.last_headline {
                lines.push(StatusLine::Headline {
                    generation: snapshot.generation,
                    text: headline.clone(),
                });
                self.last_headline = headline;
            }
        }

        lines
    }
}

/// Emits status lines until the session manager goes away.
///
/// Re-evaluates on every snapshot change and whenever `discovered` is
/// notified, so a backend selected after the session opened still shows up.
pub async fn report_status(
    mut rx: watch::Receiver<SessionSnapshot>,
    gateway: Option<Arc<CompletionGateway>>,
    discovered: Arc<Notify>,
    mut emit: impl FnMut(StatusLine),
) {
    let mut tracker = StatusTracker::default();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        for line in tracker.observe(&snapshot, gateway.as_deref()) {
            emit(line);
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = discovered.notified() => {}
        }
    }
}
