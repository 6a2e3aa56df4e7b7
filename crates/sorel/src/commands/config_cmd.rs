//! Config subcommand handlers.

use std::collections::HashMap;

use serde::Serialize;
use tabled::Tabled;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with plaintext broker passwords masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.broker.password.is_some() {
            profile.broker.password = Some("****".into());
        }
    }
    cfg
}

fn to_toml(cfg: &Config) -> String {
    toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("# failed to render config: {e}\n"))
}

#[derive(Serialize)]
struct ProfileSummary {
    name: String,
    active: bool,
    broker: String,
    topic_filter: String,
    language: String,
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Profile")]
    name: String,
    #[tabled(rename = "Broker")]
    broker: String,
    #[tabled(rename = "Topic")]
    topic_filter: String,
    #[tabled(rename = "Language")]
    language: String,
}

impl From<&ProfileSummary> for ProfileRow {
    fn from(p: &ProfileSummary) -> Self {
        Self {
            marker: if p.active { "*" } else { "" },
            name: p.name.clone(),
            broker: p.broker.clone(),
            topic_filter: p.topic_filter.clone(),
            language: p.language.clone(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = config::config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let mut profiles = HashMap::new();
            profiles.insert("default".to_owned(), Profile::default());
            let cfg = Config {
                profiles,
                ..Config::default()
            };
            config::save_config_to(&cfg, &path)?;

            if !global.quiet {
                eprintln!("Configuration written to {}", path.display());
                eprintln!("  Edit [profiles.default.broker] to point at your broker,");
                eprintln!("  then run: sorel run");
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(&config::load(global)?);
            let out = output::render_single(&global.output, &cfg, to_toml, to_toml);
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_file(global).display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let active = config::active_profile_name(global, &cfg);

            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort();
            let summaries: Vec<ProfileSummary> = names
                .into_iter()
                .map(|name| {
                    let p = &cfg.profiles[name];
                    ProfileSummary {
                        active: *name == active,
                        name: name.clone(),
                        broker: format!("{}:{}", p.broker.host, p.broker.port),
                        topic_filter: p.broker.topic_filter.clone(),
                        language: p.metadata.language.clone(),
                    }
                })
                .collect();

            let out = output::render_list(&global.output, &summaries, |p| ProfileRow::from(p), |p| {
                p.name.clone()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
