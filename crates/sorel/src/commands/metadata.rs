//! Metadata command handlers.

use std::fmt::Write as _;

use serde::Serialize;
use tabled::Tabled;

use sorel_core::{DatapointDef, MetadataCache, MetadataStatus, Step};

use crate::cli::{GlobalOpts, MetadataArgs, MetadataCommand};
use crate::config::resolve_gateway;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct MetadataReport {
    organization: String,
    device: String,
    language: String,
    file: String,
    status: MetadataStatus,
    datapoints: Vec<DatapointDef>,
}

#[derive(Tabled)]
struct DatapointRow {
    #[tabled(rename = "Address")]
    address: u16,
    #[tabled(rename = "Bytes")]
    length: u16,
    #[tabled(rename = "Type")]
    data_type: String,
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Labels")]
    labels: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<&DatapointDef> for DatapointRow {
    fn from(d: &DatapointDef) -> Self {
        Self {
            address: d.address,
            length: d.length_bytes,
            data_type: d.data_type.to_string(),
            step: format_step(d.step),
            labels: if d.format.is_some() { "yes".into() } else { String::new() },
            name: d.name.clone(),
        }
    }
}

fn format_step(step: Step) -> String {
    match step {
        Step::Int(i) => i.to_string(),
        Step::Float(f) => f.to_string(),
    }
}

fn detail(report: &MetadataReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Device model: {}/{}", report.organization, report.device);
    let _ = writeln!(out, "Language:     {}", report.language);
    let _ = writeln!(out, "Cache file:   {}", report.file);
    let _ = writeln!(out, "Status:       {}", report.status);
    let _ = writeln!(out, "Datapoints:   {}", report.datapoints.len());
    if !report.datapoints.is_empty() {
        let rows: Vec<DatapointRow> = report.datapoints.iter().map(DatapointRow::from).collect();
        out.push('\n');
        out.push_str(&output::render_table(&rows));
    }
    out
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: MetadataArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut gateway = resolve_gateway(global)?;

    match args.command {
        MetadataCommand::Fetch {
            organization,
            device,
            language,
        } => {
            if let Some(language) = language {
                gateway.metadata.language = language;
            }
            let cache = MetadataCache::from_config(gateway.metadata)?;
            let catalog = cache.get_catalog(&organization, &device).await;
            // A one-shot fetch has no later message to wait for; stop any
            // retry task so the status reflects this attempt only.
            cache.close().await;

            let key = cache.key(&organization, &device);
            let status = cache.status_detail(&organization, &device);
            let Some(catalog) = catalog else {
                return Err(match status.status {
                    MetadataStatus::NotFound => CliError::MetadataNotFound {
                        organization,
                        device,
                    },
                    _ => CliError::MetadataUnavailable {
                        key: key.to_string(),
                        message: status.message,
                    },
                });
            };

            let report = MetadataReport {
                file: cache.cache_dir().join(key.file_name()).display().to_string(),
                language: key.language,
                organization,
                device,
                status: status.status,
                datapoints: catalog.datapoints().to_vec(),
            };
            let out = output::render_single(&global.output, &report, detail, |r| {
                r.datapoints
                    .iter()
                    .map(|d| format!("{}\t{}\t{}", d.address, d.data_type, d.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        MetadataCommand::Url {
            organization,
            device,
            language,
        } => {
            if let Some(language) = language {
                gateway.metadata.language = language;
            }
            let cache = MetadataCache::from_config(gateway.metadata)?;
            let url = cache.request_url(&organization, &device)?;
            output::print_output(url.as_str(), global.quiet);
            Ok(())
        }
    }
}
