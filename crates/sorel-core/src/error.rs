// ── Core error types ──
//
// Errors surfaced by sorel-core's fallible entry points: construction,
// cache maintenance, and explicit metadata lookups. The message path
// (`Coordinator::handle_message`) never returns one of these; failures
// there become log lines and "no value" outcomes.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Metadata service ─────────────────────────────────────────────
    #[error("Cannot reach metadata service at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Metadata request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Metadata service error: {message}")]
    Metadata {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Local state ──────────────────────────────────────────────────
    #[error("Metadata cache I/O failed at {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata document: {message}")]
    InvalidDocument { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<sorel_api::Error> for CoreError {
    fn from(err: sorel_api::Error) -> Self {
        match err {
            sorel_api::Error::Transport(ref e) if e.is_connect() => CoreError::ConnectionFailed {
                url: e
                    .url()
                    .map_or_else(|| "(unknown)".into(), ToString::to_string),
                reason: e.to_string(),
            },
            sorel_api::Error::Transport(e) => CoreError::Metadata {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            sorel_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            sorel_api::Error::Http { status, message } => CoreError::Metadata {
                message: format!("HTTP {status}: {message}"),
                status: Some(status),
            },
            sorel_api::Error::Deserialization { message, body: _ } => {
                CoreError::InvalidDocument { message }
            }
            sorel_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid metadata URL: {e}"),
            },
            sorel_api::Error::Tls(message) => CoreError::Config { message },
        }
    }
}
