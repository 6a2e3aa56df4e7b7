// ── Metadata status reporting ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

/// Coarse metadata state of one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetadataStatus {
    /// Loaded, or never failed.
    Ok,
    /// The service does not know this model; no more requests are made.
    NotFound,
    /// Last attempt failed and a retry task is scheduled.
    RetryPending,
    /// Last attempt failed and nothing is scheduled.
    Error,
}

/// Status plus the numbers behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDetail {
    pub status: MetadataStatus,
    pub message: String,
    /// Consecutive failed attempts; 0 when ok or not found.
    pub retry_count: u32,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl StatusDetail {
    pub(crate) fn new(
        status: MetadataStatus,
        failed_count: u32,
        last_error_time: Option<DateTime<Utc>>,
    ) -> Self {
        let message = match status {
            MetadataStatus::Ok => "Metadata available".to_owned(),
            MetadataStatus::NotFound => {
                "Device not found (404) - device type not supported by API".to_owned()
            }
            MetadataStatus::RetryPending => {
                format!("Temporary error - retry scheduled (attempt {failed_count})")
            }
            MetadataStatus::Error => format!("Failed to fetch metadata ({failed_count} attempts)"),
        };
        let retry_count = match status {
            MetadataStatus::NotFound => 0,
            _ => failed_count,
        };
        Self {
            status,
            message,
            retry_count,
            last_error_time,
        }
    }
}
