//! Transport traits shared by the session manager and transport
//! implementations.

use std::sync::Arc;

use async_trait::async_trait;
use proto::{ChannelError, ConnectionUpdate, Credentials, InboundMessage, OutboundReply};
use tokio::sync::mpsc;

/// Receiving halves of one live connection, one channel per event category.
pub struct TransportEvents {
    /// Connection-state changes (pairing codes, open, closed).
    pub connection: mpsc::Receiver<ConnectionUpdate>,
    /// Rotated credentials to persist.
    pub credentials: mpsc::Receiver<Credentials>,
    /// Inbound message batches.
    pub messages: mpsc::Receiver<Vec<InboundMessage>>,
}

/// Sending halves used by a transport implementation to publish events.
#[derive(Clone)]
pub struct TransportSenders {
    pub connection: mpsc::Sender<ConnectionUpdate>,
    pub credentials: mpsc::Sender<Credentials>,
    pub messages: mpsc::Sender<Vec<InboundMessage>>,
}

/// Creates the three event channels for one connection.
pub fn transport_channels(capacity: usize) -> (TransportSenders, TransportEvents) {
    let (connection_tx, connection_rx) = mpsc::channel(capacity);
    let (credentials_tx, credentials_rx) = mpsc::channel(capacity);
    let (messages_tx, messages_rx) = mpsc::channel(capacity);
    (
        TransportSenders {
            connection: connection_tx,
            credentials: credentials_tx,
            messages: messages_tx,
        },
        TransportEvents {
            connection: connection_rx,
            credentials: credentials_rx,
            messages: messages_rx,
        },
    )
}

/// Outbound half of a live connection.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Sends a text reply into a chat.
    async fn send_reply(&self, reply: OutboundReply) -> Result<(), ChannelError>;

    /// Tears the connection down. Once this returns the transport is no
    /// longer open.
    async fn shutdown(&self);
}

/// A freshly established connection.
pub struct Connection {
    pub link: Arc<dyn TransportLink>,
    pub events: TransportEvents,
}

/// Factory for connections to the chat service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new connection, presenting stored credentials when present.
    async fn connect(&self, credentials: Option<Credentials>) -> Result<Connection, ChannelError>;
}
