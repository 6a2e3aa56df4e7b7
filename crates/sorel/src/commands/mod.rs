//! Command handlers: bridge CLI args -> core operations -> output formatting.

pub mod cache;
pub mod config_cmd;
pub mod decode;
pub mod metadata;
pub mod run;
