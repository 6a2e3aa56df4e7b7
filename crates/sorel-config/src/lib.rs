//! Shared configuration for the Sorel bridge.
//!
//! TOML profiles (one MQTT broker plus metadata service settings each),
//! credential resolution for the broker (env + keyring + plaintext), and
//! translation to `sorel_core::GatewayConfig`. The CLI layers its flag
//! overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sorel_core::config::{
    DEFAULT_API_SERVER, DEFAULT_FIRMWARE, DEFAULT_LANGUAGE, DEFAULT_URL_TEMPLATE,
};
use sorel_core::topic::TOPIC_FILTER;
use sorel_core::{GatewayConfig, MetadataConfig, TlsVerification};

const KEYRING_SERVICE: &str = "sorel";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no broker password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named broker profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The named profile, or built-in defaults when it is not configured.
    pub fn profile_or_default(&self, name: &str) -> Profile {
        self.profiles.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Metadata request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Metadata cache directory shared by all profiles.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            cache_dir: None,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    15
}

/// A named profile: where to read registers from, and how to decode them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub metadata: MetadataSettings,

    /// Maximum register age (seconds) when combining multi-register values.
    pub staleness_secs: Option<f64>,
}

/// `[profiles.<name>.broker]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BrokerSettings {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    pub username: Option<String>,

    /// Broker password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the broker password.
    pub password_env: Option<String>,

    /// MQTT client id; a random one is generated when absent.
    pub client_id: Option<String>,

    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Connect over TLS, verifying the broker against the system roots.
    #[serde(default)]
    pub tls: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            password_env: None,
            client_id: None,
            topic_filter: default_topic_filter(),
            keep_alive_secs: default_keep_alive(),
            tls: false,
        }
    }
}

fn default_broker_host() -> String {
    "localhost".into()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_topic_filter() -> String {
    TOPIC_FILTER.into()
}
fn default_keep_alive() -> u64 {
    30
}

/// `[profiles.<name>.metadata]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetadataSettings {
    #[serde(default = "default_api_server")]
    pub api_server: String,

    /// Full base URL (e.g. a plain-HTTP mirror); overrides `api_server`.
    pub base_url: Option<String>,

    #[serde(default = "default_url_template")]
    pub url_template: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_firmware")]
    pub firmware: String,

    /// Override the shared cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Override the default timeout.
    pub timeout: Option<u64>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_retry_intervals")]
    pub retry_intervals_secs: Vec<u64>,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            base_url: None,
            url_template: default_url_template(),
            language: default_language(),
            firmware: default_firmware(),
            cache_dir: None,
            ca_cert: None,
            insecure: false,
            timeout: None,
            poll_interval_secs: default_poll_interval(),
            retry_intervals_secs: default_retry_intervals(),
        }
    }
}

fn default_api_server() -> String {
    DEFAULT_API_SERVER.into()
}
fn default_url_template() -> String {
    DEFAULT_URL_TEMPLATE.into()
}
fn default_language() -> String {
    DEFAULT_LANGUAGE.into()
}
fn default_firmware() -> String {
    DEFAULT_FIRMWARE.into()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_retry_intervals() -> Vec<u64> {
    vec![300, 600, 1800, 3600]
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("de", "sorel", "sorel")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default metadata cache directory.
pub fn default_cache_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".cache").join("metadata"),
        |dirs| dirs.cache_dir().join("metadata"),
    )
}

fn dirs_fallback(kind: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(kind);
    p.push("sorel");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Environment variables use the `SOREL_` prefix with `__` between
/// nesting levels, e.g. `SOREL_PROFILES__HOME__BROKER__HOST`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SOREL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account under which a profile's broker password is stored.
pub fn keyring_account(profile_name: &str) -> String {
    format!("{profile_name}/broker-password")
}

/// Resolve the broker password from the credential chain.
pub fn resolve_broker_password(
    broker: &BrokerSettings,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = broker.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_account(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = broker.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Username and password for the broker, or `None` for anonymous access.
pub fn resolve_broker_credentials(
    broker: &BrokerSettings,
    profile_name: &str,
) -> Result<Option<(String, SecretString)>, ConfigError> {
    let Some(ref username) = broker.username else {
        return Ok(None);
    };
    let password = resolve_broker_password(broker, profile_name)?;
    Ok(Some((username.clone(), password)))
}

// ── Runtime translation ─────────────────────────────────────────────

/// MQTT connection parameters resolved from a profile.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, SecretString)>,
    pub topic_filter: String,
    pub keep_alive: Duration,
    pub tls: bool,
}

/// Build a `BrokerConfig` from a profile, without CLI flag overrides.
pub fn profile_to_broker_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<BrokerConfig, ConfigError> {
    let broker = &profile.broker;
    if broker.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "broker.host".into(),
            reason: "must not be empty".into(),
        });
    }
    if broker.topic_filter.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "broker.topic_filter".into(),
            reason: "must not be empty".into(),
        });
    }

    let client_id = broker
        .client_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("sorel-{}", uuid::Uuid::new_v4().simple()));

    Ok(BrokerConfig {
        host: broker.host.trim().to_owned(),
        port: broker.port,
        client_id,
        credentials: resolve_broker_credentials(broker, profile_name)?,
        topic_filter: broker.topic_filter.clone(),
        keep_alive: Duration::from_secs(broker.keep_alive_secs.max(1)),
        tls: broker.tls,
    })
}

/// Build a `MetadataConfig` from a profile and the global defaults.
pub fn profile_to_metadata_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<MetadataConfig, ConfigError> {
    let settings = &profile.metadata;

    let cache_dir = settings
        .cache_dir
        .clone()
        .or_else(|| defaults.cache_dir.clone())
        .unwrap_or_else(default_cache_dir);

    let base_url = settings
        .base_url
        .as_deref()
        .map(|raw| {
            raw.parse::<url::Url>().map_err(|_| ConfigError::Validation {
                field: "metadata.base_url".into(),
                reason: format!("invalid URL: {raw}"),
            })
        })
        .transpose()?;

    if settings.retry_intervals_secs.is_empty() {
        return Err(ConfigError::Validation {
            field: "metadata.retry_intervals_secs".into(),
            reason: "at least one interval is required".into(),
        });
    }

    let tls = if settings.insecure {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = settings.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = MetadataConfig::new(cache_dir);
    config.api_server.clone_from(&settings.api_server);
    config.base_url = base_url;
    config.url_template.clone_from(&settings.url_template);
    config.language.clone_from(&settings.language);
    config.firmware.clone_from(&settings.firmware);
    config.timeout = Duration::from_secs(settings.timeout.unwrap_or(defaults.timeout));
    config.poll_interval = Duration::from_secs(settings.poll_interval_secs);
    config.retry_intervals = settings
        .retry_intervals_secs
        .iter()
        .copied()
        .map(Duration::from_secs)
        .collect();
    config.tls = tls;
    Ok(config)
}

/// Build a `GatewayConfig` from a profile and the global defaults.
pub fn profile_to_gateway_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::new(profile_to_metadata_config(profile, defaults)?);
    if let Some(secs) = profile.staleness_secs {
        config.staleness = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::Validation {
                field: "staleness_secs".into(),
                reason: format!("expected a positive number of seconds, got {secs}"),
            })?;
    }
    Ok(config)
}
