//! Wire types exchanged with the payment terminal.
//!
//! Both directions are JSON text frames. Outgoing frames are a serialized
//! [`PaymentRequest`]; a frame coming back from the terminal is a payment
//! response only if it carries top-level `checkout_state` and
//! `checkout_details` strings. Anything else on the wire is noise.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Outgoing request
// ---------------------------------------------------------------------------

/// Request sent to the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Terminal opcode.
    pub action: i64,
    pub data: PaymentData,
}

/// Checkout being paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentData {
    pub id: i64,
    pub number: String,
    pub total_ttc: f64,
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ht: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tva3: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reseted: Option<bool>,
}

impl PaymentData {
    /// Minimal checkout with every optional field unset.
    pub fn new(id: i64, number: impl Into<String>, total_ttc: f64, items: Vec<Item>) -> Self {
        Self {
            id,
            number: number.into(),
            total_ttc,
            items,
            total_ht: None,
            tva1: None,
            tva2: None,
            tva3: None,
            create_at: None,
            checkout_state: None,
            delivery: None,
            confirmed: None,
            reseted: None,
        }
    }
}

/// A receipt line. Bundles (menus, combos) nest their components in `items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub total_ttc: f64,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Vec<Extra>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

impl Item {
    pub fn new(name: impl Into<String>, total_ttc: f64, quantity: i64) -> Self {
        Self {
            name: name.into(),
            total_ttc,
            quantity,
            extras: None,
            items: None,
        }
    }
}

/// Free-form modifier attached to an item ("no sugar", "extra shot").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extra {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Incoming response
// ---------------------------------------------------------------------------

/// Terminal verdict on a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub checkout_state: String,
    pub checkout_details: String,
    /// Any other top-level fields the terminal attached (receipt, references).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Snapshot of the terminal link, for status screens and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub connection_locked: bool,
    pub reconnect_attempts: u64,
    pub endpoint: String,
    pub last_error: Option<String>,
    /// RFC 3339 timestamp of the last successful open.
    pub last_opened_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_unset_optionals() {
        let req = PaymentRequest {
            action: 1,
            data: PaymentData::new(42, "A1", 19.90, vec![Item::new("Coffee", 19.90, 1)]),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "action": 1,
                "data": {
                    "id": 42,
                    "number": "A1",
                    "total_ttc": 19.90,
                    "items": [{"name": "Coffee", "total_ttc": 19.90, "quantity": 1}]
                }
            })
        );
    }

    #[test]
    fn test_nested_bundle_items_deserialize() {
        let v = json!({
            "name": "Menu",
            "total_ttc": 12.5,
            "quantity": 1,
            "extras": [{"name": "large"}],
            "items": [
                {"name": "Burger", "total_ttc": 0.0, "quantity": 1},
                {"name": "Fries", "total_ttc": 0.0, "quantity": 1,
                 "items": [{"name": "Ketchup", "total_ttc": 0.0, "quantity": 2}]}
            ]
        });
        let item: Item = serde_json::from_value(v).unwrap();
        let children = item.items.as_ref().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].items.as_ref().unwrap()[0].quantity, 2);
        assert_eq!(item.extras.unwrap()[0].name, "large");
    }

    #[test]
    fn test_response_keeps_extra_fields() {
        let resp: PaymentResponse = serde_json::from_str(
            r#"{"checkout_state":"paid","checkout_details":"ok","auth_code":"A7"}"#,
        )
        .unwrap();
        assert_eq!(resp.checkout_state, "paid");
        assert_eq!(resp.extra.get("auth_code"), Some(&json!("A7")));
    }

    #[test]
    fn test_connection_status_default_is_disconnected() {
        let s = ConnectionStatus::default();
        assert!(!s.connected);
        assert!(!s.connection_locked);
        assert_eq!(s.reconnect_attempts, 0);
    }
}
