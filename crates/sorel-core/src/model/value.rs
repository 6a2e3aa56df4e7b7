// ── Decoded datapoint values ──

use serde::Serialize;
use std::fmt;

/// A decoded datapoint value, ready for presentation.
///
/// Serializes untagged: numbers as JSON numbers, everything else as
/// strings or booleans.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// Integer type with an integer (or absent) step.
    Integer(i64),
    /// `float32`, or any integer type scaled by a fractional step.
    Float(f64),
    Bool(bool),
    /// NUL-trimmed string datapoint.
    Text(String),
    /// Label looked up from the datapoint's format mapping.
    Label(String),
    /// Lowercase hex of the raw bytes for unrecognized types.
    Hex(String),
}

impl DecodedValue {
    /// Numeric view, when the value is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The key used to look a numeric value up in a label mapping.
    ///
    /// Integral floats keep a trailing `.0` (`93.0`), so a mapping keyed
    /// by `"93"` only matches integer-typed values.
    pub fn mapping_key(&self) -> Option<String> {
        match self {
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_float(*f)),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) | Self::Label(s) | Self::Hex(s) => f.write_str(s),
        }
    }
}

/// Shortest round-trip form, with `.0` kept on integral values.
fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract().abs() < f64::EPSILON && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
