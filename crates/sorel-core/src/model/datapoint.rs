// ── Datapoint definitions ──
//
// Typed view of the metadata service's datapoint list. Raw entries are
// validated once, when a catalog is built; the decode path only sees
// well-formed definitions.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use sorel_api::{MetadataDocument, RawDatapoint};

// ── DataType ────────────────────────────────────────────────────────

/// Widest integer datapoint the decoder folds into a value.
pub const MAX_INTEGER_BYTES: u16 = 4;

/// Decode type of a datapoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    UInt8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Bool,
    String,
    /// Anything else; decoded as hex.
    Unknown(String),
}

impl DataType {
    /// Parse a service type name, accepting the legacy aliases
    /// (`uns16`, `sig32`, `boolean`, `char[8]`, ...).
    pub fn parse(raw: &str) -> Self {
        let name = raw.trim().to_lowercase();
        match name.as_str() {
            "uns8" | "uint8" => Self::UInt8,
            "uns16" | "uint16" => Self::UInt16,
            "int16" | "sig16" => Self::Int16,
            "uns32" | "uint32" => Self::UInt32,
            "int32" | "sig32" => Self::Int32,
            "float32" | "float" => Self::Float32,
            "bool" | "boolean" => Self::Bool,
            s if s.starts_with("str") || s.starts_with("char") => Self::String,
            _ => Self::Unknown(name),
        }
    }

    /// Integer types, decoded from at most [`MAX_INTEGER_BYTES`].
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::Int16 | Self::UInt32 | Self::Int32
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Unknown(name) => name,
        };
        f.write_str(name)
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Step ────────────────────────────────────────────────────────────

/// Scale factor applied to numeric types.
///
/// Integer steps keep integer values integral; a fractional step (or
/// `float32`) yields a float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Step {
    Int(i32),
    Float(f64),
}

impl Default for Step {
    fn default() -> Self {
        Self::Int(1)
    }
}

impl Step {
    fn from_value(value: &Value, name: &str) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Number(n) => Self::from_number(n).unwrap_or_else(|| {
                warn!(datapoint = name, step = %n, "unusable step, using 1");
                Self::default()
            }),
            Value::String(s) if s.trim().is_empty() => Self::default(),
            Value::String(s) => {
                let trimmed = s.trim();
                let parsed = trimmed.parse::<i32>().map(Self::Int).ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Self::Float)
                });
                parsed.unwrap_or_else(|| {
                    warn!(datapoint = name, step = %s, "unparseable step, using 1");
                    Self::default()
                })
            }
            other => {
                warn!(datapoint = name, step = %other, "unexpected step type, using 1");
                Self::default()
            }
        }
    }

    fn from_number(n: &serde_json::Number) -> Option<Self> {
        if let Some(i) = n.as_i64() {
            return i32::try_from(i).ok().map(Self::Int);
        }
        n.as_f64().filter(|f| f.is_finite()).map(Self::Float)
    }
}

// ── LabelFormat ─────────────────────────────────────────────────────

/// Value-to-label table attached to a datapoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LabelFormat {
    /// Keys are stringified decoded values (`"0"`, `"1"`, ...).
    Mapping(HashMap<String, String>),
    /// The format was present but is not a JSON object. Kept so the
    /// decode path can report it and fall back to the numeric value.
    Malformed(String),
}

impl LabelFormat {
    /// Parse the `format` field. Empty or absent means no format.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Self::Mapping(label_map(map)),
                _ => Self::Malformed(s.clone()),
            }),
            Value::Object(map) => Some(Self::Mapping(label_map(map.clone()))),
            other => Some(Self::Malformed(other.to_string())),
        }
    }

    /// Look a key up, if this is a usable mapping.
    pub fn label(&self, key: &str) -> Option<&str> {
        match self {
            Self::Mapping(map) => map.get(key).map(String::as_str),
            Self::Malformed(_) => None,
        }
    }
}

fn label_map(map: serde_json::Map<String, Value>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(k, v)| {
            let label = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, label)
        })
        .collect()
}

// ── DatapointDef ────────────────────────────────────────────────────

/// One validated datapoint definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatapointDef {
    /// First register address.
    pub address: u16,
    /// Declared width in bytes; always > 0.
    pub length_bytes: u16,
    pub data_type: DataType,
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LabelFormat>,
    pub name: String,
}

impl DatapointDef {
    /// Number of 16-bit registers backing this datapoint.
    pub fn registers_needed(&self) -> u16 {
        self.length_bytes.div_ceil(2)
    }

    /// Whether `address` is one of this datapoint's backing registers.
    pub fn covers(&self, address: u16) -> bool {
        let start = u32::from(self.address);
        let end = start + u32::from(self.registers_needed());
        (start..end).contains(&u32::from(address))
    }

    /// An integer datapoint declared wider than the decoder can fold.
    /// Such a datapoint never yields a value.
    pub fn exceeds_integer_width(&self) -> bool {
        self.data_type.is_integer() && self.length_bytes > MAX_INTEGER_BYTES
    }

    /// Validate a raw service entry. Returns `None` (and logs) when the
    /// address or length is missing or out of range.
    pub fn from_raw(raw: &RawDatapoint) -> Option<Self> {
        let name = raw.name.clone().unwrap_or_else(|| "?".into());

        let Some(address) = as_u64(&raw.address).and_then(|a| u16::try_from(a).ok()) else {
            warn!(datapoint = %name, address = %raw.address, "skipping datapoint with invalid address");
            return None;
        };
        let Some(length_bytes) = as_u64(&raw.length)
            .and_then(|l| u16::try_from(l).ok())
            .filter(|l| *l > 0)
        else {
            warn!(datapoint = %name, length = %raw.length, "skipping datapoint with invalid length");
            return None;
        };

        let data_type = DataType::parse(raw.data_type.as_deref().unwrap_or_default());
        let step = Step::from_value(&raw.step, &name);
        let format = LabelFormat::from_value(&raw.format);

        let def = Self {
            address,
            length_bytes,
            data_type,
            step,
            format,
            name,
        };
        if def.exceeds_integer_width() {
            warn!(
                datapoint = %def.name,
                data_type = %def.data_type,
                length = def.length_bytes,
                max = MAX_INTEGER_BYTES,
                "integer datapoint wider than supported, it will not be decoded"
            );
        }
        Some(def)
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Catalog ─────────────────────────────────────────────────────────

/// Ordered datapoint definitions for one device model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    datapoints: Vec<DatapointDef>,
}

impl Catalog {
    pub fn new(datapoints: Vec<DatapointDef>) -> Self {
        Self { datapoints }
    }

    /// Build a catalog from a fetched document, skipping invalid entries.
    pub fn from_document(document: &MetadataDocument) -> Self {
        let datapoints: Vec<_> = document
            .datapoints
            .iter()
            .filter_map(DatapointDef::from_raw)
            .collect();
        let skipped = document.datapoints.len() - datapoints.len();
        if skipped > 0 {
            warn!(skipped, kept = datapoints.len(), "metadata contained invalid datapoints");
        }
        Self { datapoints }
    }

    pub fn datapoints(&self) -> &[DatapointDef] {
        &self.datapoints
    }

    /// Definitions whose register range includes `address`, in catalog order.
    pub fn covering(&self, address: u16) -> impl Iterator<Item = &DatapointDef> {
        self.datapoints.iter().filter(move |d| d.covers(address))
    }

    pub fn get(&self, start_address: u16) -> Option<&DatapointDef> {
        self.datapoints.iter().find(|d| d.address == start_address)
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawDatapoint {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn type_aliases() {
        assert_eq!(DataType::parse("uns16"), DataType::UInt16);
        assert_eq!(DataType::parse("SIG16"), DataType::Int16);
        assert_eq!(DataType::parse("sig32"), DataType::Int32);
        assert_eq!(DataType::parse("float"), DataType::Float32);
        assert_eq!(DataType::parse("boolean"), DataType::Bool);
        assert_eq!(DataType::parse("char[16]"), DataType::String);
        assert_eq!(DataType::parse("string"), DataType::String);
        assert_eq!(
            DataType::parse("bcd16"),
            DataType::Unknown("bcd16".into())
        );
    }

    #[test]
    fn oversized_integers_are_flagged() {
        let wide = DatapointDef::from_raw(&raw(json!({
            "address": 100, "length": 6, "type": "uint16", "name": "wide"
        })))
        .unwrap();
        assert!(wide.exceeds_integer_width());

        let full = DatapointDef::from_raw(&raw(json!({
            "address": 100, "length": 4, "type": "uns32", "name": "full"
        })))
        .unwrap();
        assert!(!full.exceeds_integer_width());

        let text = DatapointDef::from_raw(&raw(json!({
            "address": 100, "length": 16, "type": "char[16]", "name": "text"
        })))
        .unwrap();
        assert!(!text.exceeds_integer_width());
    }

    #[test]
    fn registers_needed_rounds_up() {
        let def = DatapointDef::from_raw(&raw(json!({
            "address": 100, "length": 3, "type": "uns32", "name": "x"
        })))
        .unwrap();
        assert_eq!(def.registers_needed(), 2);
        assert!(!def.covers(99));
        assert!(def.covers(100));
        assert!(def.covers(101));
        assert!(!def.covers(102));
    }

    #[test]
    fn covers_does_not_overflow_at_top_of_address_space() {
        let def = DatapointDef::from_raw(&raw(json!({
            "address": 65535, "length": 4, "type": "uns32", "name": "edge"
        })))
        .unwrap();
        assert!(def.covers(65535));
    }

    #[test]
    fn step_parsing() {
        let with = |step: Value| {
            DatapointDef::from_raw(&raw(json!({
                "address": 1, "length": 2, "type": "uns16", "step": step
            })))
            .unwrap()
            .step
        };
        assert_eq!(with(Value::Null), Step::Int(1));
        assert_eq!(with(json!("")), Step::Int(1));
        assert_eq!(with(json!(10)), Step::Int(10));
        assert_eq!(with(json!(0.1)), Step::Float(0.1));
        assert_eq!(with(json!("0.5")), Step::Float(0.5));
        assert_eq!(with(json!("abc")), Step::Int(1));
    }

    #[test]
    fn format_parsing() {
        let with = |format: Value| {
            DatapointDef::from_raw(&raw(json!({
                "address": 1, "length": 2, "type": "uns16", "format": format
            })))
            .unwrap()
            .format
        };

        assert_eq!(with(json!("")), None);
        assert_eq!(with(Value::Null), None);

        let mapped = with(json!("{\r\n    \"0\": \"Off\",\r\n    \"1\": \"Daily\"\r\n}")).unwrap();
        assert_eq!(mapped.label("1"), Some("Daily"));
        assert_eq!(mapped.label("5"), None);

        let object = with(json!({"0": "Off", "1": 2})).unwrap();
        assert_eq!(object.label("1"), Some("2"));

        assert!(matches!(with(json!("[1,2]")), Some(LabelFormat::Malformed(_))));
        assert!(matches!(with(json!("{oops")), Some(LabelFormat::Malformed(_))));
    }

    #[test]
    fn catalog_skips_invalid_entries() {
        let doc: MetadataDocument = serde_json::from_value(json!({
            "datapoints": [
                {"address": 44003, "length": 2, "type": "uns16", "step": 0.1, "name": "T1"},
                {"address": -1, "length": 2, "type": "uns16", "name": "bad address"},
                {"address": 10, "length": 0, "type": "uns16", "name": "zero length"},
                {"address": "43010", "length": "4", "type": "float32", "name": "P"}
            ]
        }))
        .unwrap();

        let catalog = Catalog::from_document(&doc);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.datapoints()[1].address, 43010);
        assert_eq!(catalog.covering(43011).count(), 1);
        assert_eq!(catalog.get(44003).unwrap().name, "T1");
    }
}
