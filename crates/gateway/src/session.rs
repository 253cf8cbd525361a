//! WhatsApp session lifecycle: pairing, credential persistence, close
//! classification and reconnect scheduling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use channels::{Transport, TransportEvents, TransportLink};
use chrono::{DateTime, Utc};
use proto::{
    CloseKind, CloseReason, ConnectionUpdate, Credentials, PairingCode, SessionError,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialStore;
use crate::dispatch::{Dispatcher, LiveLink};

/// Lifecycle state of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingPairing,
    Authenticating,
    Open,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the live session, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Incremented each time a new session is created.
    pub generation: u64,
    pub state: SessionState,
    pub pairing_code: Option<PairingCode>,
    pub last_close: Option<CloseReason>,
    /// When `state` was entered.
    pub since: DateTime<Utc>,
}

impl SessionSnapshot {
    fn idle() -> Self {
        Self {
            generation: 0,
            state: SessionState::Idle,
            pairing_code: None,
            last_close: None,
            since: Utc::now(),
        }
    }
}

/// Delay schedule and attempt cap for reconnecting after a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive reconnects allowed before giving up; `None` is unbounded.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based): doubles per attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

enum SessionExit {
    Closed(CloseReason),
    Opened,
    Shutdown,
}

/// Owns the single live transport connection and restarts it on close.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    policy: ReconnectPolicy,
    dispatcher: Option<Dispatcher>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    link_tx: watch::Sender<Option<Arc<dyn TransportLink>>>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, store: CredentialStore, policy: ReconnectPolicy) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::idle());
        let (link_tx, _) = watch::channel(None);
        Self {
            transport,
            store,
            policy,
            dispatcher: None,
            snapshot_tx,
            link_tx,
        }
    }

    /// Answers inbound messages through `dispatcher` while connected.
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Link of the open session, cleared while reconnecting.
    pub fn live_link(&self) -> LiveLink {
        self.link_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Keeps a session alive until `shutdown` resolves.
    ///
    /// Returns an error only when reconnect attempts are exhausted or
    /// credentials cannot be wiped after a logout. Every close that is not
    /// followed by a session reaching Open counts as an attempt, logouts
    /// included.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        self.run_loop(false, shutdown).await
    }

    /// Connects (pairing if needed) and returns once a session is open.
    /// The connection is shut down before returning; credentials stay stored.
    pub async fn run_until_open(&self) -> Result<(), SessionError> {
        self.run_loop(true, std::future::pending()).await
    }

    async fn run_loop<F>(&self, stop_on_open: bool, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let mut attempt: u32 = 0;

        loop {
            let credentials = self.load_credentials().await;
            self.publish(|s| {
                s.generation += 1;
                s.state = SessionState::Connecting;
                s.pairing_code = None;
            });
            info!(
                generation = self.snapshot_tx.borrow().generation,
                stored_credentials = credentials.is_some(),
                "Connecting to WhatsApp"
            );

            let exit = match self.transport.connect(credentials).await {
                Ok(connection) => {
                    let link = connection.link;
                    let mut events = connection.events;
                    let exit = self
                        .drive(&link, &mut events, &mut attempt, stop_on_open, &mut shutdown)
                        .await;
                    self.link_tx.send_replace(None);
                    link.shutdown().await;
                    exit
                }
                Err(e) => {
                    warn!("Transport connect failed: {e}");
                    SessionExit::Closed(CloseReason::new(None, Some(e.to_string())))
                }
            };

            let reason = match exit {
                SessionExit::Opened => return Ok(()),
                SessionExit::Shutdown => {
                    self.publish(|s| {
                        s.state = SessionState::Closed;
                        s.pairing_code = None;
                    });
                    info!("Session shut down");
                    return Ok(());
                }
                SessionExit::Closed(reason) => reason,
            };

            self.publish(|s| {
                s.state = SessionState::Closed;
                s.pairing_code = None;
                s.last_close = Some(reason.clone());
            });

            let terminal = reason.classify() == CloseKind::Terminal;
            if terminal {
                warn!(reason = %reason, "Session logged out; wiping credentials");
                self.store.wipe().await?;
            }

            attempt += 1;
            if self.policy.exhausted(attempt) {
                error!(reason = %reason, "Reconnect attempts exhausted");
                return Err(SessionError::ReconnectExhausted {
                    attempts: attempt - 1,
                });
            }

            // The first logout in a streak re-pairs at once; repeated terminal
            // closes without reaching Open back off like any other close.
            let delay = match (terminal, attempt) {
                (true, 1) => Duration::ZERO,
                (true, n) => self.policy.delay_for(n - 1),
                (false, n) => self.policy.delay_for(n),
            };
            info!(reason = %reason, attempt, ?delay, "Connection closed; reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Session shut down");
                    return Ok(());
                }
            }
        }
    }

    /// Consumes one connection's events until it closes.
    async fn drive<F>(
        &self,
        link: &Arc<dyn TransportLink>,
        events: &mut TransportEvents,
        attempt: &mut u32,
        stop_on_open: bool,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> SessionExit
    where
        F: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.as_mut() => return SessionExit::Shutdown,
                Some(creds) = events.credentials.recv() => self.persist(&creds).await,
                update = events.connection.recv() => {
                    let Some(update) = update else {
                        return SessionExit::Closed(CloseReason::transport_exited());
                    };
                    match update {
                        ConnectionUpdate::PairingCode(code) => {
                            info!("Pairing code issued; scan it with WhatsApp");
                            self.publish(|s| {
                                s.state = SessionState::AwaitingPairing;
                                s.pairing_code = Some(code);
                            });
                        }
                        ConnectionUpdate::PairingExpired => {
                            debug!("Pairing code expired");
                            self.publish(|s| s.pairing_code = None);
                        }
                        ConnectionUpdate::Authenticating => {
                            self.publish(|s| {
                                s.state = SessionState::Authenticating;
                                s.pairing_code = None;
                            });
                        }
                        ConnectionUpdate::Open { account } => {
                            info!(account = account.as_deref().unwrap_or("unknown"), "WhatsApp connected");
                            *attempt = 0;
                            self.link_tx.send_replace(Some(Arc::clone(link)));
                            self.publish(|s| {
                                s.state = SessionState::Open;
                                s.pairing_code = None;
                            });
                            if stop_on_open {
                                return SessionExit::Opened;
                            }
                        }
                        ConnectionUpdate::Closed(reason) => return SessionExit::Closed(reason),
                    }
                }
                Some(batch) = events.messages.recv() => match &self.dispatcher {
                    Some(dispatcher) => {
                        dispatcher.dispatch(batch, &self.live_link());
                    }
                    None => debug!(count = batch.len(), "No dispatcher; ignoring messages"),
                },
            }
        }
    }

    async fn load_credentials(&self) -> Option<Credentials> {
        match self.store.load().await {
            Ok(creds) => creds,
            Err(e) => {
                warn!("Ignoring unreadable credentials, pairing from scratch: {e}");
                None
            }
        }
    }

    async fn persist(&self, creds: &Credentials) {
        if let Err(e) = self.store.save(creds).await {
            error!("Failed to persist credentials: {e}");
        }
    }

    fn publish(&self, update: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot_tx.send_modify(|snapshot| {
            let before = snapshot.state;
            update(snapshot);
            if snapshot.state != before {
                snapshot.since = Utc::now();
                debug!(from = %before, to = %snapshot.state, "Session state changed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_unbounded() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(3));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(3));
        assert_eq!(policy.delay_for(2), Duration::from_secs(6));
        assert_eq!(policy.delay_for(3), Duration::from_secs(12));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(1_000), Duration::from_secs(60));
    }

    #[test]
    fn exhaustion_counts_past_the_limit() {
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        assert!(!policy.exhausted(1));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::AwaitingPairing.to_string(), "awaiting_pairing");
        assert_eq!(SessionState::Open.as_str(), "open");
    }
}
