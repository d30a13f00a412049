//! Payment terminal: request/response correlation over the transport session.
//!
//! At most one exchange is in flight. An exchange is admitted only when the
//! terminal is idle, sends one validated request, then watches the session's
//! inbound stream until the first frame that is a checkout response. Noise
//! frames are skipped; the timeout, a dropped link, or a caller abort end the
//! wait. Whatever the exit path, the state returns to idle.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{ResponsePolicy, TpeConfig, ValidationMode};
use super::error::{Result, TpeError};
use super::lock;
use super::protocol::{ConnectionStatus, PaymentRequest, PaymentResponse};
use super::session::{SessionEvent, TransportSession};
use super::state::{SessionState, TerminalState};
use super::transport::{create_connector, Connector};
use super::validation::{classify_incoming, validate_outgoing, Inbound};

/// Handle to one payment terminal.
pub struct PaymentTerminal {
    session: TransportSession,
    state: Arc<Mutex<SessionState>>,
    /// Abort switch of the exchange in flight.
    abort: Mutex<Option<(Uuid, CancellationToken)>>,
    payment_timeout: Duration,
    validation: ValidationMode,
    response_policy: ResponsePolicy,
}

/// Returns the terminal to idle when the exchange ends, however it ends
/// (including the caller dropping the future).
struct InFlight<'a> {
    terminal: &'a PaymentTerminal,
    id: Uuid,
    abort: CancellationToken,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(&self.terminal.state).finish(self.id);
        let mut abort = lock(&self.terminal.abort);
        if abort.as_ref().is_some_and(|(id, _)| *id == self.id) {
            *abort = None;
        }
    }
}

impl PaymentTerminal {
    pub fn new(connector: Box<dyn Connector>, config: &TpeConfig) -> Result<Self> {
        config.check()?;
        let state = Arc::new(Mutex::new(SessionState::default()));
        Ok(Self {
            session: TransportSession::new(connector, state.clone(), config.reconnect_interval()),
            state,
            abort: Mutex::new(None),
            payment_timeout: config.payment_timeout(),
            validation: config.validation,
            response_policy: config.response_policy,
        })
    }

    /// Build the connector described by `config` and wrap it.
    pub fn from_config(config: &TpeConfig) -> Result<Self> {
        let connector = create_connector(&config.connection_type, &config.connection_details)?;
        Self::new(connector, config)
    }

    /// Start the (self-healing) connection. Must be called within a Tokio runtime.
    pub fn connect(&self) {
        self.session.connect();
    }

    /// Abort any exchange in flight and close the connection.
    pub async fn shutdown(&self) {
        if self.cancel() {
            info!("TPE shutdown aborted the exchange in flight");
        }
        self.session.close().await;
        info!("TPE terminal shut down");
    }

    pub fn current_state(&self) -> TerminalState {
        lock(&self.state).current_state
    }

    pub fn session_state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    /// Lifecycle events and raw inbound frames, for status displays.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Submit a raw JSON payment request and wait for the terminal's verdict.
    pub async fn submit_payment(&self, request: &Value) -> Result<PaymentResponse> {
        let mode = self.validation;
        self.exchange(TerminalState::PaymentInProgress, || {
            validate_outgoing(request, mode)
        })
        .await
    }

    /// Submit an already-typed payment request.
    pub async fn submit(&self, request: &PaymentRequest) -> Result<PaymentResponse> {
        let mode = self.validation;
        self.exchange(TerminalState::PaymentInProgress, || {
            request.validate(mode)?;
            Ok(request.clone())
        })
        .await
    }

    /// Ask the terminal to print a receipt for a checkout. Same contract as a
    /// payment, but the terminal reports `print_in_progress` meanwhile.
    pub async fn print_receipt(&self, request: &Value) -> Result<PaymentResponse> {
        let mode = self.validation;
        self.exchange(TerminalState::PrintInProgress, || {
            validate_outgoing(request, mode)
        })
        .await
    }

    /// Abort the exchange in flight; it resolves with [`TpeError::Cancelled`].
    /// Returns `false` if nothing was in flight.
    pub fn cancel(&self) -> bool {
        match lock(&self.abort).take() {
            Some((id, token)) => {
                info!(correlation_id = %id, "TPE exchange cancelled by caller");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// State gate, then validation, then transition, atomically.
    fn admit(
        &self,
        job: TerminalState,
        validate: impl FnOnce() -> Result<PaymentRequest>,
    ) -> Result<(InFlight<'_>, PaymentRequest)> {
        let mut state = lock(&self.state);
        if !state.current_state.is_idle() {
            warn!(state = ?state.current_state, "TPE busy, request rejected");
            return Err(TpeError::busy());
        }
        let request = validate().map_err(|e| {
            warn!(error = %e, "Invalid payment request");
            e
        })?;
        let id = state.begin(job)?;
        drop(state);

        let abort = CancellationToken::new();
        *lock(&self.abort) = Some((id, abort.clone()));
        Ok((
            InFlight {
                terminal: self,
                id,
                abort,
            },
            request,
        ))
    }

    async fn exchange(
        &self,
        job: TerminalState,
        validate: impl FnOnce() -> Result<PaymentRequest>,
    ) -> Result<PaymentResponse> {
        let (flight, request) = self.admit(job, validate)?;
        let correlation_id = flight.id;

        // Subscribe before sending so a fast reply cannot slip past.
        let mut events = self.session.subscribe();
        let frame = serde_json::to_string(&request)
            .map_err(|e| TpeError::Validation(format!("unserializable request: {e}")))?;

        info!(
            %correlation_id,
            action = request.action,
            checkout_id = request.data.id,
            number = %request.data.number,
            ?job,
            "Sending request to TPE"
        );
        self.session.send(&frame).await.map_err(|e| {
            warn!(%correlation_id, error = %e, "TPE send failed");
            e
        })?;

        let deadline = tokio::time::sleep(self.payment_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                // An abort must win over the close event a shutdown produces.
                biased;
                _ = flight.abort.cancelled() => return Err(TpeError::Cancelled),
                _ = &mut deadline => {
                    warn!(%correlation_id, timeout_ms = self.payment_timeout.as_millis() as u64, "TPE response timeout");
                    return Err(TpeError::Timeout(self.payment_timeout));
                }
                event = events.recv() => match event {
                    Ok(SessionEvent::Message(raw)) => match classify_incoming(&raw, self.response_policy) {
                        Inbound::Resolved(response) => {
                            info!(
                                %correlation_id,
                                checkout_state = %response.checkout_state,
                                "TPE response received"
                            );
                            return Ok(response);
                        }
                        Inbound::Pending(reason) => {
                            debug!(%correlation_id, %reason, "Ignoring inbound frame");
                        }
                        Inbound::Failed(e) => {
                            warn!(%correlation_id, error = %e, "Malformed TPE frame fails the exchange");
                            return Err(e);
                        }
                    },
                    Ok(SessionEvent::Closed) => {
                        return Err(TpeError::Transport(
                            "connection closed before a response arrived".into(),
                        ));
                    }
                    Ok(SessionEvent::Error(e)) => return Err(TpeError::Transport(e)),
                    Ok(SessionEvent::Opened) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%correlation_id, skipped, "Fell behind the TPE event stream");
                    }
                    Err(RecvError::Closed) => {
                        return Err(TpeError::Transport("session dropped".into()));
                    }
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
