//! TPE (payment terminal) adapter.
//!
//! Turns a persistent, message-oriented link to the terminal into a single-shot
//! request/response call: validate the payment, send it, wait for the first
//! frame that is a checkout response (or a timeout), report the outcome. The
//! link heals itself across drops.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod state;
pub mod terminal;
pub mod transport;
pub mod validation;

pub use config::{ResponsePolicy, TpeConfig, ValidationMode};
pub use error::{Result, TpeError};
pub use protocol::{ConnectionStatus, Extra, Item, PaymentData, PaymentRequest, PaymentResponse};
pub use session::{SessionEvent, TransportSession};
pub use state::{SessionState, TerminalState};
pub use terminal::PaymentTerminal;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
