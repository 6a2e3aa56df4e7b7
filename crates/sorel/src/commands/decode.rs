//! Offline decode: run a register snapshot through the decode engine
//! against a metadata file, without a broker or the metadata service.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tabled::Tabled;

use sorel_core::metadata::{MetadataDocument, is_not_found_body};
use sorel_core::{Catalog, DecodeEngine, DecodedValue, DeviceState, Payload, parse_payload};

use crate::cli::{DecodeArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Result rows ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct DecodedDatapoint {
    address: u16,
    name: String,
    data_type: String,
    value: Option<DecodedValue>,
}

#[derive(Tabled)]
struct DecodedRow {
    #[tabled(rename = "Address")]
    address: u16,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    data_type: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl From<&DecodedDatapoint> for DecodedRow {
    fn from(d: &DecodedDatapoint) -> Self {
        Self {
            address: d.address,
            name: d.name.clone(),
            data_type: d.data_type.clone(),
            value: d
                .value
                .as_ref()
                .map_or_else(|| "-".into(), ToString::to_string),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &DecodeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let catalog = Arc::new(load_catalog(args)?);

    let now = Instant::now();
    let mut state = DeviceState::with_catalog(Arc::clone(&catalog));
    for raw in &args.registers {
        let (address, value) = parse_register(raw)?;
        state.registers.update(address, value, now);
    }
    DecodeEngine::default().reevaluate_all(&mut state, now);

    let results: Vec<DecodedDatapoint> = catalog
        .datapoints()
        .iter()
        .filter_map(|def| {
            let value = state.value(def.address).cloned();
            if value.is_none() && !args.all {
                return None;
            }
            Some(DecodedDatapoint {
                address: def.address,
                name: def.name.clone(),
                data_type: def.data_type.to_string(),
                value,
            })
        })
        .collect();

    let out = output::render_list(&global.output, &results, |d| DecodedRow::from(d), |d| {
        let value = d.value.as_ref().map(ToString::to_string).unwrap_or_default();
        format!("{}\t{}", d.name, value)
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

fn load_catalog(args: &DecodeArgs) -> Result<Catalog, CliError> {
    let body = std::fs::read_to_string(&args.metadata)?;
    let value: serde_json::Value = serde_json::from_str(&body)?;
    if is_not_found_body(&value) {
        return Err(CliError::Validation {
            field: "metadata".into(),
            reason: "holds the \"Device not found\" marker".into(),
        });
    }
    let document: MetadataDocument = serde_json::from_value(value)?;

    let catalog = Catalog::from_document(&document);
    if catalog.is_empty() {
        return Err(CliError::Validation {
            field: "metadata".into(),
            reason: format!("no usable datapoints in {}", args.metadata.display()),
        });
    }
    Ok(catalog)
}

/// `ADDRESS=VALUE`, with the same leniency as MQTT payloads.
fn parse_register(raw: &str) -> Result<(u16, i64), CliError> {
    match parse_payload(raw.as_bytes()) {
        Payload::Parsed {
            address: Some(address),
            value,
        } => Ok((address, value)),
        _ => Err(CliError::Validation {
            field: "register".into(),
            reason: format!("expected ADDRESS=VALUE, got '{raw}'"),
        }),
    }
}
