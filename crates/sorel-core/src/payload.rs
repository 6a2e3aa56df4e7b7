// ── Register payload parsing ──
//
// Devices have shipped three payload shapes over time. They are tried in
// a fixed order: JSON object, `address=value`, bare integer.

use serde_json::Value;

/// Result of parsing one register payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// A register value, with the address when the payload carries one.
    Parsed { address: Option<u16>, value: i64 },
    Unparsed,
}

type Attempt = fn(&str) -> Option<Payload>;

const ATTEMPTS: [Attempt; 3] = [parse_json, parse_assignment, parse_bare];

/// Parse a raw MQTT payload.
pub fn parse_payload(bytes: &[u8]) -> Payload {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return Payload::Unparsed;
    }
    ATTEMPTS
        .iter()
        .find_map(|attempt| attempt(text))
        .unwrap_or(Payload::Unparsed)
}

/// `{"value": 489}` or `{"address": 43001, "value": 489}`.
fn parse_json(text: &str) -> Option<Payload> {
    if !text.starts_with('{') {
        return None;
    }
    let Value::Object(obj) = serde_json::from_str::<Value>(text).ok()? else {
        return None;
    };
    let value = json_integer(obj.get("value")?)?;
    let address = obj
        .get("address")
        .and_then(json_integer)
        .and_then(|a| u16::try_from(a).ok());
    Some(Payload::Parsed { address, value })
}

/// `43001=489`.
fn parse_assignment(text: &str) -> Option<Payload> {
    let (address, value) = text.split_once('=')?;
    let address = address.trim().parse::<u16>().ok()?;
    let value = value.trim().parse::<i64>().ok()?;
    Some(Payload::Parsed {
        address: Some(address),
        value,
    })
}

/// `489`.
fn parse_bare(text: &str) -> Option<Payload> {
    text.parse::<i64>().ok().map(|value| Payload::Parsed {
        address: None,
        value,
    })
}

/// Integers, integral floats (truncated), and numeric strings.
fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .and_then(|f| format!("{:.0}", f.trunc()).parse().ok())
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
