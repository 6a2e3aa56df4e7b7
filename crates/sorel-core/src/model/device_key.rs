// ── Device identity ──
//
// A device is identified by its gateway MAC and the bus network id it
// sits on, both lowercased: `f412faccda84::00100000`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier for one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Build the key from its MAC and network id segments.
    pub fn new(mac: &str, network_id: &str) -> Self {
        Self(format!(
            "{}::{}",
            mac.to_lowercase(),
            network_id.to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for DeviceKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
