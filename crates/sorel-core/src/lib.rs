//! Register aggregation and metadata layer for Sorel Connect devices.
//!
//! Devices publish one Modbus-style holding register per MQTT message.
//! This crate turns that stream into typed datapoint values:
//!
//! - **[`Coordinator`]**: Facade fed with `(topic, payload)` pairs. Tracks
//!   devices, resolves their metadata on first sight, and broadcasts
//!   [`GatewayEvent`]s for discovered devices and changed values.
//!
//! - **[`DecodeEngine`]**: Reassembles multi-register datapoints from the
//!   per-device [`RegisterStore`], rejects stale combinations, and applies
//!   type, scale, and label decoding. Emits a change only when the decoded
//!   value differs from the last one.
//!
//! - **[`MetadataCache`]**: Disk-backed cache in front of the metadata
//!   service with poll throttling, exponential-backoff retry tasks, and
//!   permanent "device not found" short-circuiting.
//!
//! - **Domain model** ([`model`]): [`DeviceKey`], [`DatapointDef`],
//!   [`Catalog`], and [`DecodedValue`].

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod event;
pub mod metadata;
pub mod model;
pub mod payload;
pub mod store;
pub mod topic;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{GatewayConfig, MetadataConfig, TlsVerification};
pub use coordinator::{Coordinator, DatapointReading, DeviceSnapshot};
pub use engine::{DatapointChange, DecodeEngine, DeviceState};
pub use error::CoreError;
pub use event::GatewayEvent;
pub use metadata::{CacheEntry, MetadataCache, MetadataCacheKey, MetadataStatus, StatusDetail};
pub use model::{Catalog, DataType, DatapointDef, DecodedValue, DeviceKey, LabelFormat, Step};
pub use payload::{Payload, parse_payload};
pub use store::{Register, RegisterStore};
pub use topic::{DeviceIdentity, ParsedTopic};
