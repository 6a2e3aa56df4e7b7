//! CLI configuration: thin wrapper around `sorel_config` shared types.
//!
//! Re-exports the shared types and adds CLI-specific resolution that
//! respects `GlobalOpts` flag overrides (--broker, --cache-dir, etc.).

use std::path::PathBuf;

use sorel_core::GatewayConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use sorel_config::{BrokerConfig, Config, Profile, save_config_to};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Config file in effect: `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(sorel_config::config_path)
}

/// Load the config file in effect. A missing file yields defaults; a
/// malformed one is an error.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(sorel_config::load_config_from(&config_file(global))?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// The active profile with CLI flag overrides applied.
pub fn active_profile(global: &GlobalOpts, config: &Config) -> (String, Profile) {
    let name = active_profile_name(global, config);
    let mut profile = config.profile_or_default(&name);

    // Flags > env > profile
    if let Some(ref host) = global.broker {
        profile.broker.host.clone_from(host);
    }
    if let Some(port) = global.port {
        profile.broker.port = port;
    }
    if let Some(ref url) = global.api_url {
        profile.metadata.base_url = Some(url.clone());
    }
    if let Some(ref dir) = global.cache_dir {
        profile.metadata.cache_dir = Some(dir.clone());
    }
    if global.insecure {
        profile.metadata.insecure = true;
    }
    if let Some(timeout) = global.timeout {
        profile.metadata.timeout = Some(timeout);
    }

    (name, profile)
}

/// Load config and translate the active profile into a `GatewayConfig`.
pub fn resolve_gateway(global: &GlobalOpts) -> Result<GatewayConfig, CliError> {
    let cfg = load(global)?;
    let (_, profile) = active_profile(global, &cfg);
    Ok(sorel_config::profile_to_gateway_config(
        &profile,
        &cfg.defaults,
    )?)
}

/// Load config and translate the active profile into broker and gateway
/// settings.
pub fn resolve_bridge(global: &GlobalOpts) -> Result<(BrokerConfig, GatewayConfig), CliError> {
    let cfg = load(global)?;
    let (name, profile) = active_profile(global, &cfg);
    let broker = sorel_config::profile_to_broker_config(&profile, &name)?;
    let gateway = sorel_config::profile_to_gateway_config(&profile, &cfg.defaults)?;
    Ok((broker, gateway))
}
