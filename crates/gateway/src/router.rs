use proto::{CompletionRequest, InboundMessage, STATUS_BROADCAST_JID};
use tracing::debug;

/// Command prefix that turns a message into a completion request.
pub const TRIGGER_PREFIX: &str = "!gpt ";

/// Which messages may trigger a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterPolicy {
    /// Allow messages sent from this account to trigger.
    pub allow_self_trigger: bool,
}

/// Returns the plain text of a message.
///
/// Precedence: conversation text, then extended (quoted/linked) text, then a
/// media caption. Empty strings count as absent.
pub fn extract_text(msg: &InboundMessage) -> Option<&str> {
    let content = msg.message.as_ref()?;
    content
        .conversation
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| {
            content
                .extended_text_message
                .as_ref()
                .and_then(|e| e.text.as_deref())
                .filter(|t| !t.is_empty())
        })
        .or_else(|| content.caption())
}

/// Returns the prompt when `text` starts with the trigger prefix.
/// The remainder is returned verbatim and may be empty.
pub fn parse_trigger(text: &str) -> Option<&str> {
    text.strip_prefix(TRIGGER_PREFIX)
}

/// Turns inbound messages into completion requests.
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    policy: RouterPolicy,
}

impl MessageRouter {
    pub fn new(policy: RouterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RouterPolicy {
        self.policy
    }

    /// Returns a request when the message triggers a completion.
    pub fn route(&self, msg: &InboundMessage) -> Option<CompletionRequest> {
        let request = self.triggered(msg);
        debug!(
            sender = msg.sender(),
            from_me = msg.key.from_me,
            triggered = request.is_some(),
            "Inbound message"
        );
        request
    }

    fn triggered(&self, msg: &InboundMessage) -> Option<CompletionRequest> {
        if msg.chat() == STATUS_BROADCAST_JID {
            return None;
        }
        if msg.key.from_me && !self.policy.allow_self_trigger {
            return None;
        }
        let prompt = parse_trigger(extract_text(msg)?)?;
        Some(CompletionRequest {
            prompt: prompt.to_string(),
            chat: msg.chat().to_string(),
            sender: msg.sender().to_string(),
            quoted_id: Some(msg.key.id.clone()),
        })
    }
}
