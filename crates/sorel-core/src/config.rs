// ── Runtime configuration ──
//
// These types describe how the gateway decodes registers and how it talks
// to the metadata service. They never touch disk; `sorel-config` (or a
// test) builds them and hands them in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use sorel_api::TlsMode;
pub use sorel_api::metadata::{DEFAULT_API_SERVER, DEFAULT_URL_TEMPLATE};

use crate::error::CoreError;

/// Maximum arrival skew between registers that back one datapoint.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(10);

/// At most one proactive metadata poll per key within this window.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Backoff schedule after the 1st, 2nd, 3rd, and 4th+ failure.
pub const DEFAULT_RETRY_INTERVALS: [Duration; 4] = [
    Duration::from_secs(300),
    Duration::from_secs(600),
    Duration::from_secs(1800),
    Duration::from_secs(3600),
];

pub const DEFAULT_LANGUAGE: &str = "en";

/// The service does not version metadata by firmware yet; this fills the
/// firmware slot of every cache key.
pub const DEFAULT_FIRMWARE: &str = "latest";

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification.
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Metadata service and cache settings.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Host name of the metadata service, reached over HTTPS.
    pub api_server: String,
    /// Full base URL; overrides `api_server` when set (plain-HTTP mirrors, tests).
    pub base_url: Option<Url>,
    /// Path template with `{organizationId}`, `{deviceEnumId}`, `{language}`.
    pub url_template: String,
    pub language: String,
    pub firmware: String,
    /// Directory holding one JSON file per cache key.
    pub cache_dir: PathBuf,
    /// Request timeout.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retry_intervals: Vec<Duration>,
    pub tls: TlsVerification,
}

impl MetadataConfig {
    /// Defaults for everything except the cache location.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_server: DEFAULT_API_SERVER.into(),
            base_url: None,
            url_template: DEFAULT_URL_TEMPLATE.into(),
            language: DEFAULT_LANGUAGE.into(),
            firmware: DEFAULT_FIRMWARE.into(),
            cache_dir: cache_dir.into(),
            timeout: sorel_api::transport::DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_intervals: DEFAULT_RETRY_INTERVALS.to_vec(),
            tls: TlsVerification::default(),
        }
    }

    /// Resolve the service base URL.
    pub fn resolved_base_url(&self) -> Result<Url, CoreError> {
        if let Some(ref url) = self.base_url {
            return Ok(url.clone());
        }
        let server = self.api_server.trim().trim_end_matches('/');
        if server.is_empty() {
            return Err(CoreError::Config {
                message: "metadata api_server must not be empty".into(),
            });
        }
        Url::parse(&format!("https://{server}")).map_err(|e| CoreError::Config {
            message: format!("invalid metadata api_server '{server}': {e}"),
        })
    }

    /// Backoff interval after `failed_count` consecutive failures.
    ///
    /// The first failure waits `retry_intervals[0]`; the schedule plateaus
    /// at its last entry.
    pub fn retry_interval(&self, failed_count: u32) -> Duration {
        let intervals: &[Duration] = if self.retry_intervals.is_empty() {
            &DEFAULT_RETRY_INTERVALS
        } else {
            &self.retry_intervals
        };
        let slot = usize::try_from(failed_count.saturating_sub(1)).unwrap_or(usize::MAX);
        let last = intervals.len() - 1;
        intervals[slot.min(last)]
    }
}

/// Everything the [`Coordinator`](crate::Coordinator) needs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub metadata: MetadataConfig,
    /// Registers older than this (relative to now) block decoding.
    pub staleness: Duration,
    /// Broadcast channel capacity for [`GatewayEvent`](crate::GatewayEvent)s.
    pub event_capacity: usize,
}

impl GatewayConfig {
    pub fn new(metadata: MetadataConfig) -> Self {
        Self {
            metadata,
            staleness: DEFAULT_STALENESS,
            event_capacity: 256,
        }
    }
}
