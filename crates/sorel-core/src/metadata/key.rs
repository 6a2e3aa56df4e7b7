// ── Metadata cache key ──

use std::fmt;

use serde::Serialize;

/// `(organization, device model, language, firmware)` identifying one
/// metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetadataCacheKey {
    pub organization_id: String,
    pub device_id: String,
    pub language: String,
    pub firmware: String,
}

impl MetadataCacheKey {
    pub fn new(
        organization_id: impl Into<String>,
        device_id: impl Into<String>,
        language: impl Into<String>,
        firmware: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            device_id: device_id.into(),
            language: language.into(),
            firmware: firmware.into(),
        }
    }

    /// Cache file name: `meta_{org}_{device}_{language}_{firmware}.json`.
    ///
    /// Characters outside `[A-Za-z0-9.-]` are replaced so ids taken from
    /// MQTT topics can never escape the cache directory.
    pub fn file_name(&self) -> String {
        format!(
            "meta_{}_{}_{}_{}.json",
            sanitize(&self.organization_id),
            sanitize(&self.device_id),
            sanitize(&self.language),
            sanitize(&self.firmware)
        )
    }
}

impl fmt::Display for MetadataCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.organization_id, self.device_id, self.language, self.firmware
        )
    }
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "-".into()
    } else {
        cleaned
    }
}
