//! Adapter settings.
//!
//! Hosts hand settings over as JSON (terminal settings synced from the admin
//! dashboard), so keys are accepted in camelCase or snake_case.

use serde::Deserialize;
use std::time::Duration;

use super::error::{Result, TpeError};

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8787";
pub const DEFAULT_PAYMENT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

/// How hard the outgoing validator looks at a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Mandatory fields only; wrongly typed optional fields are dropped.
    #[default]
    Lenient,
    /// `delivery` is mandatory and every optional field and item is type-checked.
    Strict,
}

/// What to do with an inbound frame that cannot be a payment response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePolicy {
    /// Discard it and keep waiting.
    #[default]
    IgnoreAndWait,
    /// Fail the in-flight exchange on a frame that is not JSON.
    FailOnMalformed,
}

/// Adapter configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TpeConfig {
    #[serde(alias = "connection_type")]
    pub connection_type: String,
    #[serde(alias = "connection_details")]
    pub connection_details: serde_json::Value,
    #[serde(alias = "payment_timeout_ms", alias = "timeoutMs")]
    pub payment_timeout_ms: u64,
    #[serde(alias = "reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    pub validation: ValidationMode,
    #[serde(alias = "response_policy")]
    pub response_policy: ResponsePolicy,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            connection_type: "websocket".into(),
            connection_details: serde_json::json!({ "url": DEFAULT_ENDPOINT }),
            payment_timeout_ms: DEFAULT_PAYMENT_TIMEOUT_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            validation: ValidationMode::default(),
            response_policy: ResponsePolicy::default(),
        }
    }
}

impl TpeConfig {
    /// Parse settings from a JSON value; missing keys take their defaults.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| TpeError::Config(format!("invalid TPE settings: {e}")))?;
        config.check()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| TpeError::Config(format!("invalid TPE settings: {e}")))?;
        Self::from_value(&value)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_millis(self.payment_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Reject settings that would make the timers degenerate.
    pub(crate) fn check(&self) -> Result<()> {
        if self.payment_timeout_ms == 0 {
            return Err(TpeError::Config("paymentTimeoutMs must be positive".into()));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(TpeError::Config(
                "reconnectIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}
