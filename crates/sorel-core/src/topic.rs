// ── Topic identity ──
//
// Register topics look like
//
//   Sorel:0000/device/f412faccda84/id/00100000/TDC_Smart_Basic:00a6/dp/00/43001
//   {oemName}:{oemId}/device/{mac}/{tag}/{networkId}/{deviceName}:{deviceId}/dp/{unitId}/{address}
//
// The OEM id doubles as the metadata organization id and the device id
// as the metadata model id.

use serde::Serialize;

use crate::model::DeviceKey;

/// MQTT subscription filter matching every register topic.
pub const TOPIC_FILTER: &str = "+/device/+/+/+/+/dp/+/+";

/// A register topic split into its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub oem_name: String,
    pub oem_id: String,
    pub mac: String,
    pub tag: String,
    pub network_id: String,
    pub device_name: String,
    pub device_id: String,
    pub unit_id: String,
    /// Register address segment, unparsed.
    pub address: String,
}

impl ParsedTopic {
    /// Split a topic. Returns `None` for anything that is not a register
    /// topic.
    pub fn parse(topic: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        let [oem, device_lit, mac, tag, network_id, device, dp_lit, unit_id, address] =
            parts.as_slice()
        else {
            return None;
        };
        if *device_lit != "device" || *dp_lit != "dp" {
            return None;
        }
        let (oem_name, oem_id) = oem.split_once(':')?;
        let (device_name, device_id) = device.split_once(':')?;

        Some(Self {
            oem_name: oem_name.to_owned(),
            oem_id: oem_id.to_owned(),
            mac: (*mac).to_owned(),
            tag: (*tag).to_owned(),
            network_id: (*network_id).to_owned(),
            device_name: device_name.to_owned(),
            device_id: device_id.to_owned(),
            unit_id: (*unit_id).to_owned(),
            address: (*address).to_owned(),
        })
    }

    pub fn device_key(&self) -> DeviceKey {
        DeviceKey::new(&self.mac, &self.network_id)
    }

    /// The register address segment as a number.
    pub fn register_address(&self) -> Option<u16> {
        self.address.trim().parse().ok()
    }

    /// Identity of the device this topic belongs to.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            key: self.device_key(),
            oem_name: self.oem_name.clone(),
            organization_id: self.oem_id.clone(),
            device_name: self.device_name.clone(),
            device_id: self.device_id.clone(),
            mac: self.mac.to_lowercase(),
            network_id: self.network_id.clone(),
        }
    }
}

/// Who a device is, as announced by its topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub key: DeviceKey,
    pub oem_name: String,
    /// Metadata organization id (the OEM id).
    pub organization_id: String,
    pub device_name: String,
    /// Metadata device model id.
    pub device_id: String,
    pub mac: String,
    pub network_id: String,
}
