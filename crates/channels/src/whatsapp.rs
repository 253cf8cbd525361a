//! WhatsApp Web transport backed by a Node.js bridge subprocess.
//!
//! The bridge speaks newline-delimited JSON: commands are written to its
//! stdin and events are read from its stdout. The first command on every
//! connection is always `auth`, carrying the stored credentials or `null`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use proto::{
    ChannelError, CloseReason, ConnectionUpdate, Credentials, InboundMessage, OutboundReply,
    PairingCode,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::adapter::{Connection, Transport, TransportLink, TransportSenders, transport_channels};

/// Configuration for the bridge transport.
#[derive(Debug, Clone)]
pub struct WhatsAppBridgeConfig {
    /// Node.js executable.
    pub node_command: String,
    /// Path to the bridge entry script.
    pub bridge_path: PathBuf,
    /// Capacity of each per-connection event channel.
    pub event_buffer: usize,
}

impl WhatsAppBridgeConfig {
    pub fn new(bridge_path: impl Into<PathBuf>) -> Self {
        Self {
            node_command: "node".to_string(),
            bridge_path: bridge_path.into(),
            event_buffer: 64,
        }
    }
}

// ─── Wire protocol ─────────────────────────────────────────

/// Events emitted by the bridge on stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// New pairing QR payload.
    Qr { data: String },
    /// The displayed QR lapsed.
    QrExpired,
    /// Pairing accepted or stored credentials presented.
    Authenticating,
    /// Session is open.
    Connected {
        phone: Option<String>,
        name: Option<String>,
    },
    /// Session closed. The bridge exits after emitting this.
    Disconnected {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Credentials changed and should be persisted.
    Creds { state: Credentials },
    /// Batch of inbound messages in raw WAMessage shape.
    Messages { messages: Vec<serde_json::Value> },
    /// Non-fatal bridge-side error.
    Error { message: String },
}

/// Commands written to the bridge on stdin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Auth {
        state: Option<&'a Credentials>,
    },
    Send {
        to: &'a str,
        text: &'a str,
        quoted_id: Option<&'a str>,
    },
}

fn encode_command(command: &BridgeCommand<'_>) -> Result<Vec<u8>, ChannelError> {
    let mut line = serde_json::to_vec(command)
        .map_err(|e| ChannelError::SendFailed(format!("encode bridge command: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

// ─── Transport ─────────────────────────────────────────────

/// Spawns one bridge process per connection.
pub struct WhatsAppBridge {
    config: WhatsAppBridgeConfig,
}

impl WhatsAppBridge {
    pub fn new(config: WhatsAppBridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WhatsAppBridge {
    async fn connect(&self, credentials: Option<Credentials>) -> Result<Connection, ChannelError> {
        info!(
            bridge = %self.config.bridge_path.display(),
            stored_credentials = credentials.is_some(),
            "Starting WhatsApp bridge"
        );

        let mut child = Command::new(&self.config.node_command)
            .arg(&self.config.bridge_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChannelError::ConnectionFailed(format!("spawn bridge: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::ConnectionFailed("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::ConnectionFailed("bridge stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "whatsapp_bridge", "{line}");
                }
            });
        }

        let link = Arc::new(BridgeLink {
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: parking_lot::Mutex::new(Some(child)),
        });
        link.write(&BridgeCommand::Auth {
            state: credentials.as_ref(),
        })
        .await
        .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let (senders, events) = transport_channels(self.config.event_buffer);
        tokio::spawn(pump_events(BufReader::new(stdout), senders));

        Ok(Connection { link, events })
    }
}

/// Outbound half of a running bridge process.
struct BridgeLink {
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: parking_lot::Mutex<Option<Child>>,
}

impl BridgeLink {
    async fn write(&self, command: &BridgeCommand<'_>) -> Result<(), ChannelError> {
        let line = encode_command(command)?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ChannelError::Closed)?;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| ChannelError::SendFailed(format!("bridge write: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("bridge flush: {e}")))
    }
}

#[async_trait]
impl TransportLink for BridgeLink {
    async fn send_reply(&self, reply: OutboundReply) -> Result<(), ChannelError> {
        self.write(&BridgeCommand::Send {
            to: &reply.to,
            text: &reply.text,
            quoted_id: reply.quoted_id.as_deref(),
        })
        .await
    }

    async fn shutdown(&self) {
        self.stdin.lock().await.take();
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!("Bridge already exited: {e}");
            }
            info!("WhatsApp bridge stopped");
        }
    }
}

// ─── Event pump ────────────────────────────────────────────

enum Routed {
    Connection(ConnectionUpdate),
    Credentials(Credentials),
    Messages(Vec<InboundMessage>),
    Nothing,
}

fn route_event(event: BridgeEvent) -> Routed {
    match event {
        BridgeEvent::Qr { data } => Routed::Connection(ConnectionUpdate::PairingCode(
            PairingCode(data),
        )),
        BridgeEvent::QrExpired => Routed::Connection(ConnectionUpdate::PairingExpired),
        BridgeEvent::Authenticating => Routed::Connection(ConnectionUpdate::Authenticating),
        BridgeEvent::Connected { phone, name } => {
            if let Some(name) = name.as_deref().filter(|n| !n.is_empty()) {
                debug!(name, "WhatsApp account name");
            }
            Routed::Connection(ConnectionUpdate::Open {
                account: phone.as_deref().map(account_from_jid),
            })
        }
        BridgeEvent::Disconnected { code, reason } => {
            Routed::Connection(ConnectionUpdate::Closed(CloseReason::new(code, reason)))
        }
        BridgeEvent::Creds { state } => Routed::Credentials(state),
        BridgeEvent::Messages { messages } => Routed::Messages(decode_messages(messages)),
        BridgeEvent::Error { message } => {
            warn!("WhatsApp bridge error: {message}");
            Routed::Nothing
        }
    }
}

/// Decodes raw WAMessages, skipping entries without a usable key.
fn decode_messages(raw: Vec<serde_json::Value>) -> Vec<InboundMessage> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<InboundMessage>(value) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!("Skipping undecodable WhatsApp message: {e}");
                None
            }
        })
        .collect()
}

/// Reads bridge stdout until a close event or EOF, forwarding events into
/// the per-category channels. EOF without a close event is reported as a
/// recoverable transport exit.
pub(crate) async fn pump_events<R>(reader: R, senders: TransportSenders)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading bridge output: {e}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<BridgeEvent>(trimmed) {
            Ok(event) => event,
            Err(e) => {
                debug!("Ignoring bridge line ({e}): {trimmed}");
                continue;
            }
        };

        let delivered = match route_event(event) {
            Routed::Connection(update) => {
                let closed = matches!(update, ConnectionUpdate::Closed(_));
                let ok = senders.connection.send(update).await.is_ok();
                if closed {
                    return;
                }
                ok
            }
            Routed::Credentials(creds) => senders.credentials.send(creds).await.is_ok(),
            Routed::Messages(batch) if batch.is_empty() => true,
            Routed::Messages(batch) => senders.messages.send(batch).await.is_ok(),
            Routed::Nothing => true,
        };
        if !delivered {
            debug!("Session consumer gone; stopping bridge pump");
            return;
        }
    }

    let _ = senders
        .connection
        .send(ConnectionUpdate::Closed(CloseReason::transport_exited()))
        .await;
}

// ─── Helpers ───────────────────────────────────────────────

/// Strips the device suffix and server from a JID:
/// `15551234567:12@s.whatsapp.net` becomes `15551234567`.
pub fn account_from_jid(jid: &str) -> String {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user).to_string()
}

/// Returns true when the Node.js executable answers `--version`.
pub async fn node_available(node_command: &str) -> bool {
    Command::new(node_command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Runs `npm install` next to the bridge script when its dependencies are
/// missing.
pub async fn ensure_bridge_dependencies(bridge_path: &Path) -> Result<(), ChannelError> {
    let dir = bridge_path.parent().unwrap_or_else(|| Path::new("."));
    if dir.join("node_modules").exists() {
        return Ok(());
    }
    info!(dir = %dir.display(), "Installing bridge dependencies (npm install)");
    let status = Command::new("npm")
        .arg("install")
        .current_dir(dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| ChannelError::ConnectionFailed(format!("npm install: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(ChannelError::ConnectionFailed(format!(
            "npm install failed with {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::CloseKind;

    async fn pump(input: &str) -> crate::adapter::TransportEvents {
        let (senders, events) = transport_channels(16);
        pump_events(BufReader::new(input.as_bytes()), senders).await;
        events
    }

    #[test]
    fn account_from_jid_strips_device_and_server() {
        assert_eq!(account_from_jid("15551234567:12@s.whatsapp.net"), "15551234567");
        assert_eq!(account_from_jid("15551234567@s.whatsapp.net"), "15551234567");
        assert_eq!(account_from_jid("15551234567"), "15551234567");
    }

    #[test]
    fn auth_command_serializes_null_state() {
        let line = encode_command(&BridgeCommand::Auth { state: None }).expect("encode");
        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line).expect("json");
        assert_eq!(value["type"], "auth");
        assert!(value["state"].is_null());
    }

    #[test]
    fn send_command_carries_quote() {
        let line = encode_command(&BridgeCommand::Send {
            to: "123@s.whatsapp.net",
            text: "hello",
            quoted_id: Some("MSG1"),
        })
        .expect("encode");
        let value: serde_json::Value = serde_json::from_slice(&line).expect("json");
        assert_eq!(value["type"], "send");
        assert_eq!(value["to"], "123@s.whatsapp.net");
        assert_eq!(value["text"], "hello");
        assert_eq!(value["quoted_id"], "MSG1");
    }

    #[test]
    fn bridge_events_parse() {
        let qr: BridgeEvent = serde_json::from_str(r#"{"type":"qr","data":"2@abc"}"#).unwrap();
        assert_eq!(qr, BridgeEvent::Qr { data: "2@abc".into() });

        let closed: BridgeEvent =
            serde_json::from_str(r#"{"type":"disconnected","code":401,"reason":"logged out"}"#)
                .unwrap();
        assert_eq!(
            closed,
            BridgeEvent::Disconnected {
                code: Some(401),
                reason: Some("logged out".into())
            }
        );

        let expired: BridgeEvent = serde_json::from_str(r#"{"type":"qr_expired"}"#).unwrap();
        assert_eq!(expired, BridgeEvent::QrExpired);
    }

    #[tokio::test]
    async fn pump_routes_each_category() {
        let input = concat!(
            r#"{"type":"qr","data":"2@code"}"#,
            "\n",
            "not json at all\n",
            r#"{"type":"creds","state":{"me":{"id":"1@s.whatsapp.net"}}}"#,
            "\n",
            r#"{"type":"connected","phone":"15551234567:3@s.whatsapp.net","name":"Bot"}"#,
            "\n",
            r#"{"type":"messages","messages":[{"key":{"remoteJid":"1@s.whatsapp.net","fromMe":false,"id":"A"},"message":{"conversation":"!gpt hi"}},{"bogus":true}]}"#,
            "\n",
            r#"{"type":"disconnected","code":428,"reason":"connection closed"}"#,
            "\n",
            r#"{"type":"qr","data":"after close"}"#,
            "\n",
        );
        let mut events = pump(input).await;

        assert_eq!(
            events.connection.recv().await,
            Some(ConnectionUpdate::PairingCode(PairingCode("2@code".into())))
        );
        assert_eq!(
            events.connection.recv().await,
            Some(ConnectionUpdate::Open {
                account: Some("15551234567".into())
            })
        );
        match events.connection.recv().await {
            Some(ConnectionUpdate::Closed(reason)) => {
                assert_eq!(reason.code, Some(428));
                assert_eq!(reason.classify(), CloseKind::Recoverable);
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(events.connection.recv().await, None);

        let creds = events.credentials.recv().await.expect("creds");
        assert_eq!(creds.0["me"]["id"], "1@s.whatsapp.net");

        let batch = events.messages.recv().await.expect("batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key.id, "A");
    }

    #[tokio::test]
    async fn eof_without_close_reports_transport_exit() {
        let mut events = pump("{\"type\":\"authenticating\"}\n").await;
        assert_eq!(
            events.connection.recv().await,
            Some(ConnectionUpdate::Authenticating)
        );
        match events.connection.recv().await {
            Some(ConnectionUpdate::Closed(reason)) => {
                assert_eq!(reason, CloseReason::transport_exited());
                assert_eq!(reason.classify(), CloseKind::Recoverable);
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn logged_out_close_is_terminal() {
        let mut events =
            pump("{\"type\":\"disconnected\",\"code\":401,\"reason\":\"logged out\"}\n").await;
        match events.connection.recv().await {
            Some(ConnectionUpdate::Closed(reason)) => {
                assert_eq!(reason.classify(), CloseKind::Terminal)
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ensure_dependencies_skips_when_installed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        let script = dir.path().join("index.js");
        ensure_bridge_dependencies(&script).await.expect("already installed");
    }
}
