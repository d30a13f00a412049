//! Terminal lifecycle state shared by the session and the correlator.

use serde::Serialize;
use uuid::Uuid;

use super::error::{Result, TpeError};

/// What the terminal is busy with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    #[default]
    Idle,
    PaymentInProgress,
    PrintInProgress,
}

impl TerminalState {
    pub fn is_idle(self) -> bool {
        self == TerminalState::Idle
    }
}

/// One per transport session. The session task owns `connection_locked`;
/// the correlator owns `current_state` and `pending_correlation_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub current_state: TerminalState,
    pub connection_locked: bool,
    pub pending_correlation_id: Option<Uuid>,
}

impl SessionState {
    /// Admit a new exchange. Fails with `busy` unless idle.
    pub(crate) fn begin(&mut self, job: TerminalState) -> Result<Uuid> {
        if !self.current_state.is_idle() {
            return Err(TpeError::busy());
        }
        let id = Uuid::new_v4();
        self.current_state = job;
        self.pending_correlation_id = Some(id);
        Ok(id)
    }

    /// Return to idle if `id` is still the exchange in flight.
    pub(crate) fn finish(&mut self, id: Uuid) -> bool {
        if self.pending_correlation_id != Some(id) {
            return false;
        }
        self.current_state = TerminalState::Idle;
        self.pending_correlation_id = None;
        true
    }
}
