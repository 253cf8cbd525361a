//! Shared protocol types for the transport, session manager, and
//! completion gateway.
//!
//! This crate defines serializable message/event structures and
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod event;
pub mod message;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of transport event types.
pub use event::{
    CloseKind, CloseReason, ConnectionUpdate, Credentials, FORBIDDEN_CODE, LOGGED_OUT_CODE,
    PairingCode,
};
/// Re-export of chat message types.
pub use message::{
    CaptionedMedia, CompletionRequest, ExtendedText, InboundMessage, MessageContent, MessageKey,
    OutboundReply, STATUS_BROADCAST_JID,
};
