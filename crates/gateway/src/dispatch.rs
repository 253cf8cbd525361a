//! Per-message completion dispatch.

use std::sync::Arc;
use std::time::Duration;

use agent::CompletionGateway;
use channels::TransportLink;
use proto::{CompletionRequest, InboundMessage, OutboundReply};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::router::MessageRouter;

/// The link of the currently open session; `None` while reconnecting.
pub type LiveLink = watch::Receiver<Option<Arc<dyn TransportLink>>>;

/// How long a finished reply waits for a session to reopen before it is
/// dropped.
const REOPEN_WAIT: Duration = Duration::from_secs(120);

/// Routes inbound batches and answers triggered messages on their own tasks.
#[derive(Clone)]
pub struct Dispatcher {
    router: MessageRouter,
    gateway: Arc<CompletionGateway>,
}

impl Dispatcher {
    pub fn new(router: MessageRouter, gateway: Arc<CompletionGateway>) -> Self {
        Self { router, gateway }
    }

    pub fn gateway(&self) -> &Arc<CompletionGateway> {
        &self.gateway
    }

    /// Spawns one task per triggered message, in arrival order.
    ///
    /// Each reply goes out on whichever link is live when the completion
    /// finishes, so a reconnect in between does not lose it. Failures inside
    /// a task end as a chat reply or a log line and never reach the caller.
    pub fn dispatch(&self, batch: Vec<InboundMessage>, links: &LiveLink) -> Vec<JoinHandle<()>> {
        batch
            .iter()
            .filter_map(|msg| self.router.route(msg))
            .map(|request| {
                let gateway = Arc::clone(&self.gateway);
                let links = links.clone();
                tokio::spawn(answer(gateway, links, request))
            })
            .collect()
    }
}

/// Waits (bounded) for an open session and returns its link.
async fn current_link(links: &mut LiveLink) -> Option<Arc<dyn TransportLink>> {
    match tokio::time::timeout(REOPEN_WAIT, links.wait_for(|link| link.is_some())).await {
        Ok(Ok(link)) => link.clone(),
        Ok(Err(_)) | Err(_) => None,
    }
}

async fn answer(gateway: Arc<CompletionGateway>, mut links: LiveLink, request: CompletionRequest) {
    info!(sender = %request.sender, chat = %request.chat, "Completion requested");

    let text = match gateway.complete(&request.prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!(sender = %request.sender, "Completion failed: {e}");
            e.user_message().to_string()
        }
    };

    let Some(link) = current_link(&mut links).await else {
        warn!(chat = %request.chat, "No open session; dropping reply");
        return;
    };
    match link.send_reply(OutboundReply::answering(&request, text)).await {
        Ok(()) => debug!(chat = %request.chat, "Reply sent"),
        Err(e) => warn!(chat = %request.chat, "Failed to send reply: {e}"),
    }
}
