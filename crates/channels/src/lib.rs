//! Chat transport interfaces and the WhatsApp bridge implementation.

pub mod adapter;
pub mod whatsapp;

/// Transport traits and per-connection event channels.
pub use adapter::{
    Connection, Transport, TransportEvents, TransportLink, TransportSenders, transport_channels,
};
/// WhatsApp bridge transport.
pub use whatsapp::{WhatsAppBridge, WhatsAppBridgeConfig};
