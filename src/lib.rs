//! TPE Ingenico adapter.
//!
//! Drives a payment terminal over a persistent socket: one payment in flight,
//! validated on the way out, matched against the first checkout frame on the
//! way back, bounded by a timeout, with the connection re-established
//! automatically whenever it drops.
//!
//! ```no_run
//! use tpe_ingenico::tpe::{PaymentTerminal, TpeConfig};
//!
//! # async fn demo() -> tpe_ingenico::tpe::Result<()> {
//! let terminal = PaymentTerminal::from_config(&TpeConfig::default())?;
//! terminal.connect();
//! let response = terminal
//!     .submit_payment(&serde_json::json!({
//!         "action": 1,
//!         "data": {
//!             "id": 42,
//!             "number": "A1",
//!             "total_ttc": 19.90,
//!             "items": [{"name": "Coffee", "total_ttc": 19.90, "quantity": 1}]
//!         }
//!     }))
//!     .await?;
//! println!("{}: {}", response.checkout_state, response.checkout_details);
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod tpe;

pub use tpe::{PaymentTerminal, TpeConfig, TpeError};
