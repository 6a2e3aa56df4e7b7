// ── Datapoint decoding ──
//
// Pure functions from register words to a `DecodedValue`. Everything is
// big-endian. 32-bit types declared narrower than four bytes are padded
// with zero bytes on the right before conversion.

use tracing::{debug, warn};

use crate::model::datapoint::MAX_INTEGER_BYTES;
use crate::model::{DataType, DatapointDef, DecodedValue, LabelFormat, Step};

/// Numeric value before step and label handling.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Raw {
    Unsigned(u32),
    Signed(i32),
    Float(f32),
}

/// Concatenate 16-bit words big-endian and cut to `length_bytes`.
pub fn assemble(words: &[u16], length_bytes: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    bytes.truncate(length_bytes);
    bytes
}

/// Decode assembled bytes according to a datapoint definition.
///
/// `None` means the bytes cannot form a value of the declared type; the
/// caller treats that like a missing register.
pub fn decode(def: &DatapointDef, bytes: &[u8]) -> Option<DecodedValue> {
    let raw = match def.data_type {
        DataType::UInt8 | DataType::UInt16 => Raw::Unsigned(be_unsigned(bytes, &def.name)?),
        DataType::Int16 => Raw::Signed(be_signed(bytes, &def.name)?),
        DataType::UInt32 => Raw::Unsigned(be_unsigned(&pad_right(bytes, 4), &def.name)?),
        DataType::Int32 => Raw::Signed(be_signed(&pad_right(bytes, 4), &def.name)?),
        DataType::Float32 => {
            let Some(word) = bytes.first_chunk::<4>() else {
                debug!(datapoint = %def.name, bytes = bytes.len(), "float32 needs 4 bytes");
                return None;
            };
            Raw::Float(f32::from_be_bytes(*word))
        }
        DataType::Bool => {
            return bytes.first().map(|b| DecodedValue::Bool(b & 0x01 == 1));
        }
        DataType::String => return Some(DecodedValue::Text(decode_text(bytes))),
        DataType::Unknown(ref name) => {
            let hex = hex::encode(bytes);
            warn!(datapoint = %def.name, data_type = %name, raw = %hex, "unknown data type, keeping hex");
            return Some(DecodedValue::Hex(hex));
        }
    };

    let value = scale(raw, def.step);
    Some(match def.format {
        Some(ref format) => apply_format(value, format, &def.name),
        None => value,
    })
}

fn scale(raw: Raw, step: Step) -> DecodedValue {
    match (raw, step) {
        (Raw::Unsigned(v), Step::Int(s)) => DecodedValue::Integer(i64::from(v) * i64::from(s)),
        (Raw::Signed(v), Step::Int(s)) => DecodedValue::Integer(i64::from(v) * i64::from(s)),
        (Raw::Unsigned(v), Step::Float(s)) => DecodedValue::Float(f64::from(v) * s),
        (Raw::Signed(v), Step::Float(s)) => DecodedValue::Float(f64::from(v) * s),
        (Raw::Float(v), Step::Int(s)) => DecodedValue::Float(f64::from(v) * f64::from(s)),
        (Raw::Float(v), Step::Float(s)) => DecodedValue::Float(f64::from(v) * s),
    }
}

/// Replace a numeric value by its label when the mapping has one.
fn apply_format(value: DecodedValue, format: &LabelFormat, name: &str) -> DecodedValue {
    let Some(key) = value.mapping_key() else {
        return value;
    };
    match format {
        LabelFormat::Mapping(map) => match map.get(&key) {
            Some(label) => DecodedValue::Label(label.clone()),
            None => {
                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                warn!(datapoint = name, value = %key, available = ?keys, "value not in format mapping, keeping raw value");
                value
            }
        },
        LabelFormat::Malformed(raw) => {
            warn!(datapoint = name, format = %raw, "format is not a mapping, keeping raw value");
            value
        }
    }
}

fn pad_right(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut padded = bytes.to_vec();
    if padded.len() < width {
        padded.resize(width, 0);
    }
    padded
}

fn be_unsigned(bytes: &[u8], name: &str) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > usize::from(MAX_INTEGER_BYTES) {
        debug!(datapoint = name, bytes = bytes.len(), "integer width out of range");
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn be_signed(bytes: &[u8], name: &str) -> Option<i32> {
    let unsigned = be_unsigned(bytes, name)?;
    let bits = u32::try_from(bytes.len()).ok()? * 8;
    let value = i64::from(unsigned);
    let signed = if (unsigned >> (bits - 1)) & 1 == 1 {
        value - (1i64 << bits)
    } else {
        value
    };
    i32::try_from(signed).ok()
}

/// UTF-8 with invalid sequences dropped and NUL padding trimmed.
fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim_end_matches('\0')
        .to_owned()
}
