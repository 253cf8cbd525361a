use serde::{Deserialize, Serialize};

/// JID used by WhatsApp for status broadcasts; never a chat.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";

/// Addressing key of a WhatsApp message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat the message belongs to (user or group JID).
    pub remote_jid: String,
    /// Whether this account sent the message.
    #[serde(default)]
    pub from_me: bool,
    /// Message id, usable to quote the message in a reply.
    pub id: String,
    /// Author inside a group chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// Text body of an extended (quoted reply / link preview) message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

/// Media message; only the caption matters here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionedMedia {
    #[serde(default)]
    pub caption: Option<String>,
}

/// Content shapes that may carry text. Unknown shapes deserialize to
/// all-`None`, which yields no text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    /// Plain conversational text.
    #[serde(default)]
    pub conversation: Option<String>,
    /// Quoted reply or extended text.
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub image_message: Option<CaptionedMedia>,
    #[serde(default)]
    pub video_message: Option<CaptionedMedia>,
    #[serde(default)]
    pub document_message: Option<CaptionedMedia>,
}

impl MessageContent {
    /// Plain text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Self::default()
        }
    }

    /// Extended (quoted reply) text content.
    pub fn extended(text: impl Into<String>) -> Self {
        Self {
            extended_text_message: Some(ExtendedText {
                text: Some(text.into()),
            }),
            ..Self::default()
        }
    }

    /// Image with caption.
    pub fn image_caption(caption: impl Into<String>) -> Self {
        Self {
            image_message: Some(CaptionedMedia {
                caption: Some(caption.into()),
            }),
            ..Self::default()
        }
    }

    /// First non-empty media caption, in image/video/document order.
    pub fn caption(&self) -> Option<&str> {
        [
            &self.image_message,
            &self.video_message,
            &self.document_message,
        ]
        .into_iter()
        .flatten()
        .filter_map(|media| media.caption.as_deref())
        .find(|caption| !caption.is_empty())
    }
}

/// Inbound chat message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub key: MessageKey,
    /// Display name of the sender, when known.
    #[serde(default)]
    pub push_name: Option<String>,
    /// `None` for protocol/system messages without content.
    #[serde(default)]
    pub message: Option<MessageContent>,
}

impl InboundMessage {
    /// Builds a message from a peer in a one-to-one chat.
    pub fn new(remote_jid: impl Into<String>, id: impl Into<String>, content: MessageContent) -> Self {
        Self {
            key: MessageKey {
                remote_jid: remote_jid.into(),
                from_me: false,
                id: id.into(),
                participant: None,
            },
            push_name: None,
            message: Some(content),
        }
    }

    /// Marks the message as sent by this account.
    pub fn from_me(mut self) -> Self {
        self.key.from_me = true;
        self
    }

    /// Sender identifier: the group participant when present, else the chat.
    pub fn sender(&self) -> &str {
        self.key
            .participant
            .as_deref()
            .unwrap_or(&self.key.remote_jid)
    }

    /// Chat to address a reply to.
    pub fn chat(&self) -> &str {
        &self.key.remote_jid
    }
}

/// A triggered prompt together with where to deliver the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Prompt text with the trigger prefix removed.
    pub prompt: String,
    /// Chat to reply in.
    pub chat: String,
    /// Sender of the triggering message.
    pub sender: String,
    /// Message id to quote in the reply.
    pub quoted_id: Option<String>,
}

/// Outbound text reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    /// Destination chat JID.
    pub to: String,
    pub text: String,
    /// Message id being replied to.
    pub quoted_id: Option<String>,
}

impl OutboundReply {
    /// Builds a reply answering `request`.
    pub fn answering(request: &CompletionRequest, text: impl Into<String>) -> Self {
        Self {
            to: request.chat.clone(),
            text: text.into(),
            quoted_id: request.quoted_id.clone(),
        }
    }
}
