//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use sorel_config::ConfigError;
use sorel_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(sorel::connection_failed),
        help(
            "Check that the host is reachable.\n\
             URL: {url}"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("MQTT client error: {message}")]
    #[diagnostic(
        code(sorel::mqtt),
        help("Check the broker host and port, or override them with --broker / --port.")
    )]
    Mqtt { message: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("No broker password configured for profile '{profile}'")]
    #[diagnostic(
        code(sorel::no_credentials),
        help(
            "Set broker.password_env to the name of an environment variable,\n\
             store the password in the system keyring (service 'sorel',\n\
             account '{profile}/broker-password'), or set broker.password."
        )
    )]
    NoCredentials { profile: String },

    // ── Metadata ─────────────────────────────────────────────────────

    #[error("Device model {organization}/{device} is not known to the metadata service")]
    #[diagnostic(
        code(sorel::metadata_not_found),
        help(
            "The service answered \"Device not found\"; this is remembered in the cache.\n\
             Run: sorel cache clear   to ask again."
        )
    )]
    MetadataNotFound {
        organization: String,
        device: String,
    },

    #[error("No metadata available for {key}: {message}")]
    #[diagnostic(
        code(sorel::metadata_unavailable),
        help("Retry later, or run with -v to see the failed requests.")
    )]
    MetadataUnavailable { key: String, message: String },

    #[error("Metadata service error: {message}")]
    #[diagnostic(code(sorel::metadata))]
    Metadata { message: String },

    #[error("Metadata cache error at {path}")]
    #[diagnostic(
        code(sorel::cache),
        help("Check permissions, or point --cache-dir somewhere writable.")
    )]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(sorel::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(sorel::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(sorel::config))]
    Config(Box<figment::Error>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(sorel::timeout),
        help("Increase timeout with --timeout or check the metadata service.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(sorel::json), help("Check the file contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Mqtt { .. } => exit_code::CONNECTION,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::MetadataNotFound { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::Metadata { message, status: _ } | CoreError::InvalidDocument { message } => {
                CliError::Metadata { message }
            }

            CoreError::Cache { path, source } => CliError::Cache { path, source },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}
