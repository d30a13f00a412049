//! Payment validator.
//!
//! Pure checks applied at the adapter boundary: outgoing requests before they
//! touch the transport, inbound frames before they can resolve an exchange.
//! Outgoing validation is fail-fast and reports the first violated rule.
//! Nothing here logs or touches shared state.

use serde_json::{Map, Value};
use super::config::{ResponsePolicy, ValidationMode};
use super::error::{Result, TpeError};
use super::protocol::{Extra, Item, PaymentData, PaymentRequest, PaymentResponse};

const MANDATORY_FIELDS: [&str; 4] = ["id", "number", "total_ttc", "items"];

fn invalid(msg: impl Into<String>) -> TpeError {
    TpeError::Validation(msg.into())
}

/// Present and not `null`.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// Validate a raw JSON payment request and lift it into a [`PaymentRequest`].
pub fn validate_outgoing(value: &Value, mode: ValidationMode) -> Result<PaymentRequest> {
    let query = value
        .as_object()
        .ok_or_else(|| invalid("payment request is not an object"))?;

    let action = present(query, "action").ok_or_else(|| invalid("attribute action is missing"))?;
    let action = action
        .as_i64()
        .ok_or_else(|| invalid("attribute action must be an integer"))?;

    let data = present(query, "data").ok_or_else(|| invalid("attribute data is missing"))?;
    let data = data
        .as_object()
        .ok_or_else(|| invalid("attribute data is not an object"))?;

    let strict = mode == ValidationMode::Strict;
    let mandatory = MANDATORY_FIELDS
        .iter()
        .copied()
        .chain(strict.then_some("delivery"));
    for field in mandatory {
        if present(data, field).is_none() {
            return Err(invalid(format!("mandatory field is missing: {field}")));
        }
    }

    let id = data
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid("id must be an integer"))?;
    let number = data
        .get("number")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("number must be a string"))?;
    let total_ttc = data
        .get("total_ttc")
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid("total_ttc must be a number"))?;
    let raw_items = data
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("items must be an array"))?;

    check_amounts(id, total_ttc, raw_items.len())?;

    let items = raw_items
        .iter()
        .enumerate()
        .map(|(i, v)| parse_item(v, &format!("items[{i}]"), mode))
        .collect::<Result<Vec<_>>>()?;

    let mut payment = PaymentData::new(id, number, total_ttc, items);
    payment.total_ht = optional(data, "total_ht", mode, Value::as_f64, "a number")?;
    payment.tva1 = optional(data, "tva1", mode, Value::as_f64, "a number")?;
    payment.tva2 = optional(data, "tva2", mode, Value::as_f64, "a number")?;
    payment.tva3 = optional(data, "tva3", mode, Value::as_f64, "a number")?;
    payment.create_at = optional(data, "create_at", mode, as_string, "a string")?;
    payment.checkout_state = optional(data, "checkout_state", mode, as_string, "a string")?;
    payment.delivery = optional(data, "delivery", mode, as_string, "a string")?;
    payment.confirmed = optional(data, "confirmed", mode, Value::as_bool, "a boolean")?;
    payment.reseted = optional(data, "reseted", mode, Value::as_bool, "a boolean")?;

    Ok(PaymentRequest {
        action,
        data: payment,
    })
}

impl PaymentRequest {
    /// Value checks for a request that is already typed.
    pub fn validate(&self, mode: ValidationMode) -> Result<()> {
        if mode == ValidationMode::Strict && self.data.delivery.is_none() {
            return Err(invalid("mandatory field is missing: delivery"));
        }
        check_amounts(self.data.id, self.data.total_ttc, self.data.items.len())
    }
}

fn check_amounts(id: i64, total_ttc: f64, item_count: usize) -> Result<()> {
    if id <= 0 {
        return Err(invalid("id can't be null"));
    }
    // Negated so NaN is rejected too.
    if !(total_ttc > 0.0) {
        return Err(invalid("total_ttc can't be null"));
    }
    if item_count == 0 {
        return Err(invalid("items can't be null"));
    }
    Ok(())
}

fn as_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

/// Optional field: strict mode rejects a wrong type, lenient mode drops it.
fn optional<T>(
    obj: &Map<String, Value>,
    key: &str,
    mode: ValidationMode,
    extract: impl Fn(&Value) -> Option<T>,
    expected: &str,
) -> Result<Option<T>> {
    let Some(v) = present(obj, key) else {
        return Ok(None);
    };
    match extract(v) {
        Some(t) => Ok(Some(t)),
        None if mode == ValidationMode::Strict => Err(invalid(format!("{key} must be {expected}"))),
        None => Ok(None),
    }
}

fn parse_item(value: &Value, path: &str, mode: ValidationMode) -> Result<Item> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(format!("{path} is not an object")))?;

    let name = present(obj, "name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{path}.name must be a string")))?;
    let total_ttc = present(obj, "total_ttc")
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid(format!("{path}.total_ttc must be a number")))?;
    let quantity = present(obj, "quantity")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid(format!("{path}.quantity must be an integer")))?;

    let mut item = Item::new(name, total_ttc, quantity);

    let field = format!("{path}.extras");
    if let Some(raw) = optional_array(obj, "extras", &field, mode)? {
        item.extras = Some(parse_extras(raw, &field, mode)?);
    }

    let field = format!("{path}.items");
    if let Some(raw) = optional_array(obj, "items", &field, mode)? {
        let children = raw
            .iter()
            .enumerate()
            .map(|(i, v)| parse_item(v, &format!("{field}[{i}]"), mode))
            .collect::<Result<Vec<_>>>()?;
        item.items = Some(children);
    }

    Ok(item)
}

fn optional_array<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    mode: ValidationMode,
) -> Result<Option<&'a Vec<Value>>> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::Array(raw)) => Ok(Some(raw)),
        Some(_) if mode == ValidationMode::Strict => {
            Err(invalid(format!("{path} must be an array")))
        }
        Some(_) => Ok(None),
    }
}

fn parse_extras(raw: &[Value], path: &str, mode: ValidationMode) -> Result<Vec<Extra>> {
    let mut extras = Vec::with_capacity(raw.len());
    for (i, v) in raw.iter().enumerate() {
        match v.get("name").and_then(Value::as_str) {
            Some(name) => extras.push(Extra {
                name: name.to_string(),
            }),
            None if mode == ValidationMode::Strict => {
                return Err(invalid(format!("{path}[{i}].name must be a string")))
            }
            None => {}
        }
    }
    Ok(extras)
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Outcome of looking at one inbound frame while an exchange is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The frame resolves the exchange.
    Resolved(PaymentResponse),
    /// Not a payment response; keep waiting. Carries the reason for logging.
    Pending(TpeError),
    /// The frame fails the exchange.
    Failed(TpeError),
}

/// Parse an inbound frame as a [`PaymentResponse`].
pub fn validate_incoming(raw: &str) -> Result<PaymentResponse> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| TpeError::Parse(format!("parsing error: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| TpeError::Parse("payment response is not an object".into()))?;

    for field in ["checkout_state", "checkout_details"] {
        match present(obj, field) {
            None => return Err(invalid(format!("{field} is missing"))),
            Some(v) if !v.is_string() => {
                return Err(invalid(format!("{field} must be a string")))
            }
            Some(_) => {}
        }
    }

    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}

/// Apply the response policy to one inbound frame.
pub fn classify_incoming(raw: &str, policy: ResponsePolicy) -> Inbound {
    match validate_incoming(raw) {
        Ok(response) => Inbound::Resolved(response),
        Err(e @ TpeError::Parse(_)) if policy == ResponsePolicy::FailOnMalformed => {
            Inbound::Failed(e)
        }
        Err(e) => Inbound::Pending(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
