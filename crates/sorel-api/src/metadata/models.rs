// Wire models for the metadata service.
//
// Datapoint fields are kept loosely typed here: the service has shipped
// numbers as strings and formats as both objects and JSON-encoded
// strings. `sorel-core` validates them into typed definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::NOT_FOUND_ERROR;

/// A successfully fetched metadata document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub datapoints: Vec<RawDatapoint>,

    /// Anything else the service sends along (device name, revision, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One datapoint entry exactly as the service describes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDatapoint {
    #[serde(default)]
    pub address: Value,
    #[serde(default)]
    pub length: Value,
    #[serde(rename = "type", default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub step: Value,
    #[serde(default)]
    pub format: Value,
    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Outcome of a metadata request that reached the service.
#[derive(Debug, Clone)]
pub enum MetadataResponse {
    /// The service described the model. `body` is the raw response text,
    /// suitable for persisting verbatim.
    Found {
        body: String,
        document: MetadataDocument,
    },
    /// The service answered with the "Device not found" sentinel.
    NotFound { body: String },
}

impl MetadataResponse {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Whether a JSON value is the service's `{"error": "Device not found"}`
/// sentinel.
pub fn is_not_found_body(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("error"))
        .and_then(Value::as_str)
        .is_some_and(|msg| msg == NOT_FOUND_ERROR)
}
