//! Metadata cache command handlers.

use std::time::Duration;

use chrono::Utc;
use tabled::Tabled;

use sorel_core::{CacheEntry, MetadataCache};

use crate::cli::{CacheArgs, CacheCommand, GlobalOpts};
use crate::config::resolve_gateway;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Age")]
    age: String,
}

impl From<&CacheEntry> for CacheRow {
    fn from(e: &CacheEntry) -> Self {
        Self {
            file: e.file_name.clone(),
            size: format!("{} B", e.size_bytes),
            age: format_age(e),
        }
    }
}

fn format_age(entry: &CacheEntry) -> String {
    let Some(modified) = entry.modified else {
        return "-".into();
    };
    let secs = (Utc::now() - modified).num_seconds().max(0);
    let secs = u64::try_from(secs).unwrap_or_default();
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

pub async fn handle(args: CacheArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let gateway = resolve_gateway(global)?;
    let cache = MetadataCache::from_config(gateway.metadata)?;

    match args.command {
        CacheCommand::List => {
            let entries = cache.cached_entries().await?;
            let out = output::render_list(&global.output, &entries, |e| CacheRow::from(e), |e| {
                cache.cache_dir().join(&e.file_name).display().to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        CacheCommand::Clear => {
            let removed = cache.clear_cache().await?;
            if !global.quiet {
                eprintln!(
                    "Removed {removed} cached file(s) from {}",
                    cache.cache_dir().display()
                );
            }
            Ok(())
        }
    }
}
