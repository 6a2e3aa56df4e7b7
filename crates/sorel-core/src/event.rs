// ── Gateway events ──
//
// Broadcast by the coordinator. Consumers (the CLI's `run` command, a
// publishing layer) subscribe through `Coordinator::events`.

use serde::Serialize;

use crate::model::{DecodedValue, DeviceKey};
use crate::topic::DeviceIdentity;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// First message seen from a device.
    DeviceDiscovered { device: DeviceIdentity },
    /// A datapoint decoded to a value different from the last one.
    DatapointChanged {
        device: DeviceKey,
        /// Start address of the datapoint.
        address: u16,
        name: String,
        value: DecodedValue,
    },
    /// Broker connectivity flipped.
    ConnectivityChanged { connected: bool },
}

impl GatewayEvent {
    /// Device the event concerns, if any.
    pub fn device(&self) -> Option<&DeviceKey> {
        match self {
            Self::DeviceDiscovered { device } => Some(&device.key),
            Self::DatapointChanged { device, .. } => Some(device),
            Self::ConnectivityChanged { .. } => None,
        }
    }
}
