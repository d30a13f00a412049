//! Self-healing transport session.
//!
//! A single background task owns the physical link. It connects, pumps
//! inbound frames onto a broadcast channel, writes outbound frames handed over
//! by [`TransportSession::send`], and on close or error waits a fixed interval
//! before trying again. Retries never stop and never back off.
//!
//! `SessionState::connection_locked` is true while an attempt is running or
//! the link is up, and false while the task waits to retry. `reconnect()`
//! only fires when the lock is clear, so an attempt is never doubled up.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{Result, TpeError};
use super::lock;
use super::protocol::ConnectionStatus;
use super::state::SessionState;
use super::transport::{Connector, FrameTransport};

const EVENT_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 16;

/// Lifecycle signals and inbound frames, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    Closed,
    Error(String),
    Message(String),
}

type Outbound = (String, oneshot::Sender<Result<()>>);

/// Why the link stopped.
enum LinkEnd {
    PeerClosed,
    Failed(TpeError),
    Shutdown,
}

struct Shared {
    connector: Arc<dyn Connector>,
    state: Arc<Mutex<SessionState>>,
    status: Mutex<ConnectionStatus>,
    events: broadcast::Sender<SessionEvent>,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    wake: Notify,
    retry_interval: Duration,
}

struct SessionTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Persistent connection to the terminal.
pub struct TransportSession {
    shared: Arc<Shared>,
    task: Mutex<Option<SessionTask>>,
}

impl TransportSession {
    pub fn new(
        connector: Box<dyn Connector>,
        state: Arc<Mutex<SessionState>>,
        retry_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let endpoint = connector.description();
        Self {
            shared: Arc::new(Shared {
                connector: Arc::from(connector),
                state,
                status: Mutex::new(ConnectionStatus {
                    endpoint,
                    ..Default::default()
                }),
                events,
                outbound: Mutex::new(None),
                wake: Notify::new(),
                retry_interval,
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the connection task. A no-op while it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("TPE session already running");
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(self.shared.clone(), cancel.clone()));
        *task = Some(SessionTask { cancel, handle });
    }

    /// Trigger an immediate attempt instead of waiting for the retry timer.
    ///
    /// Returns `false` when an attempt is already running or the link is up.
    pub fn reconnect(&self) -> bool {
        let running = lock(&self.task)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished());
        if !running {
            self.connect();
            return true;
        }
        {
            let mut state = lock(&self.shared.state);
            if state.connection_locked {
                return false;
            }
            state.connection_locked = true;
        }
        self.shared.wake.notify_one();
        true
    }

    /// Write one frame and wait until the link task has written it.
    pub async fn send(&self, payload: &str) -> Result<()> {
        let tx = lock(&self.shared.outbound)
            .clone()
            .ok_or_else(TpeError::not_connected)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send((payload.to_string(), ack_tx))
            .await
            .map_err(|_| TpeError::not_connected())?;
        ack_rx.await.map_err(|_| {
            TpeError::Transport("connection closed before the frame was written".into())
        })?
    }

    /// Inbound frames and lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Stop the connection task and close the link. `connect()` may be called
    /// again afterwards.
    pub async fn close(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "TPE session task ended abnormally");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.status).connected
    }

    pub fn status(&self) -> ConnectionStatus {
        let mut status = lock(&self.shared.status).clone();
        status.connection_locked = lock(&self.shared.state).connection_locked;
        status
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

impl Shared {
    fn set_locked(&self, locked: bool) {
        lock(&self.state).connection_locked = locked;
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is normal between exchanges.
        let _ = self.events.send(event);
    }

    fn on_open(&self, link: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        *lock(&self.outbound) = Some(tx);
        self.set_locked(true);
        {
            let mut status = lock(&self.status);
            status.connected = true;
            status.reconnect_attempts = 0;
            status.last_error = None;
            status.last_opened_at = Some(Utc::now().to_rfc3339());
        }
        info!(%link, "TPE connection open");
        self.emit(SessionEvent::Opened);
        rx
    }

    fn on_down(&self, error: Option<&TpeError>) {
        *lock(&self.outbound) = None;
        self.set_locked(false);
        let mut status = lock(&self.status);
        status.connected = false;
        if let Some(e) = error {
            status.last_error = Some(e.to_string());
        }
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let endpoint = shared.connector.description();
    info!(%endpoint, "TPE session started");

    loop {
        shared.set_locked(true);
        let attempt = {
            let mut status = lock(&shared.status);
            status.reconnect_attempts += 1;
            status.reconnect_attempts
        };
        debug!(%endpoint, attempt, "Connecting to TPE");

        let connected = tokio::select! {
            r = shared.connector.connect() => r,
            _ = cancel.cancelled() => break,
        };

        match connected {
            Ok(mut link) => {
                let outbound = shared.on_open(&link.description());
                let end = drive(link.as_mut(), outbound, &shared, &cancel).await;
                match end {
                    LinkEnd::Shutdown => {
                        shared.on_down(None);
                        shared.emit(SessionEvent::Closed);
                        break;
                    }
                    LinkEnd::PeerClosed => {
                        warn!(%endpoint, "TPE connection closed");
                        shared.on_down(None);
                        shared.emit(SessionEvent::Closed);
                    }
                    LinkEnd::Failed(e) => {
                        warn!(%endpoint, error = %e, "TPE connection error");
                        link.close().await;
                        shared.on_down(Some(&e));
                        shared.emit(SessionEvent::Error(e.to_string()));
                    }
                }
            }
            Err(e) => {
                warn!(%endpoint, attempt, error = %e, "TPE connection attempt failed");
                shared.on_down(Some(&e));
                shared.emit(SessionEvent::Error(e.to_string()));
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.retry_interval) => {}
            _ = shared.wake.notified() => debug!(%endpoint, "Reconnect requested"),
            _ = cancel.cancelled() => break,
        }
    }

    shared.on_down(None);
    info!(%endpoint, "TPE session stopped");
}

async fn drive(
    link: &mut dyn FrameTransport,
    mut outbound: mpsc::Receiver<Outbound>,
    shared: &Shared,
    cancel: &CancellationToken,
) -> LinkEnd {
    loop {
        tokio::select! {
            inbound = link.recv() => match inbound {
                Some(Ok(frame)) => shared.emit(SessionEvent::Message(frame)),
                Some(Err(e)) => return LinkEnd::Failed(e),
                None => return LinkEnd::PeerClosed,
            },
            Some((frame, ack)) = outbound.recv() => {
                let result = link.send(&frame).await;
                let failure = result.as_ref().err().cloned();
                let _ = ack.send(result);
                if let Some(e) = failure {
                    return LinkEnd::Failed(e);
                }
            }
            _ = cancel.cancelled() => {
                link.close().await;
                return LinkEnd::Shutdown;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
