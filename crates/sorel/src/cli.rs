//! Clap derive structures for the `sorel` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// sorel -- decode Sorel Connect device registers from MQTT
#[derive(Debug, Parser)]
#[command(
    name = "sorel",
    version,
    about = "Decode Sorel Connect device registers from MQTT",
    long_about = "Subscribes to the per-register MQTT topics published by Sorel Connect\n\
        controllers, fetches each device model's datapoint metadata, and turns\n\
        raw Modbus-style registers into named, typed, scaled values.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "SOREL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Profile to use
    #[arg(long, short = 'p', env = "SOREL_PROFILE", global = true)]
    pub profile: Option<String>,

    /// MQTT broker host (overrides profile)
    #[arg(long, short = 'b', env = "SOREL_BROKER", global = true)]
    pub broker: Option<String>,

    /// MQTT broker port (overrides profile)
    #[arg(long, env = "SOREL_BROKER_PORT", global = true)]
    pub port: Option<u16>,

    /// Metadata service base URL, e.g. https://connect.sorel.de (overrides profile)
    #[arg(long, env = "SOREL_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Metadata cache directory (overrides config)
    #[arg(long, env = "SOREL_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SOREL_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept invalid TLS certificates from the metadata service
    #[arg(long, short = 'k', env = "SOREL_INSECURE", global = true)]
    pub insecure: bool,

    /// Metadata request timeout in seconds (overrides config)
    #[arg(long, env = "SOREL_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON (one object per line for `run`)
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the broker and print decoded datapoints as they change
    Run(RunArgs),

    /// Decode a register snapshot offline against a metadata file
    #[command(alias = "dec")]
    Decode(DecodeArgs),

    /// Query the metadata service through the local cache
    #[command(alias = "meta")]
    Metadata(MetadataArgs),

    /// Inspect or clear the metadata cache
    Cache(CacheArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// MQTT topic filter (overrides profile)
    #[arg(long, short = 't')]
    pub topic: Option<String>,

    /// MQTT client id (overrides profile)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Connect to the broker over TLS (overrides profile)
    #[arg(long)]
    pub tls: bool,

    /// Delay between reconnect attempts, e.g. "5s" or "1m"
    #[arg(long, default_value = "5s")]
    pub reconnect_delay: String,
}

// ── Decode ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Metadata JSON file (as returned by the metadata service)
    #[arg(long, short = 'm')]
    pub metadata: PathBuf,

    /// Register value as ADDRESS=VALUE (repeatable)
    #[arg(long = "register", short = 'r', value_name = "ADDRESS=VALUE", required = true)]
    pub registers: Vec<String>,

    /// Also list datapoints that could not be decoded
    #[arg(long, short = 'a')]
    pub all: bool,
}

// ── Metadata ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct MetadataArgs {
    #[command(subcommand)]
    pub command: MetadataCommand,
}

#[derive(Debug, Subcommand)]
pub enum MetadataCommand {
    /// Resolve a device model's metadata (cache first, then the service)
    Fetch {
        /// Organization (OEM) id, e.g. 0000
        organization: String,

        /// Device model id, e.g. 00a6
        device: String,

        /// Metadata language (overrides profile)
        #[arg(long, short = 'l')]
        language: Option<String>,
    },

    /// Print the request URL for a device model
    Url {
        /// Organization (OEM) id
        organization: String,

        /// Device model id
        device: String,

        /// Metadata language (overrides profile)
        #[arg(long, short = 'l')]
        language: Option<String>,
    },
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached metadata files
    #[command(alias = "ls")]
    List,

    /// Delete every cached metadata file
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
