// ── Decode engine ──
//
// Runs after every register write: finds the datapoints whose register
// range covers the written address, reassembles them from the store, and
// reports the ones whose decoded value changed. Values are keyed by the
// datapoint's start address so multi-register datapoints have one
// identity no matter which register arrived last.

pub mod decode;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::DEFAULT_STALENESS;
use crate::model::{Catalog, DatapointDef, DecodedValue};
use crate::store::RegisterStore;

/// A datapoint whose decoded value changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatapointChange {
    /// Start address of the datapoint.
    pub address: u16,
    pub name: String,
    pub value: DecodedValue,
}

/// Mutable decode state of one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub registers: RegisterStore,
    catalog: Option<Arc<Catalog>>,
    /// Last reported value per datapoint start address.
    values: HashMap<u16, DecodedValue>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog: Some(catalog),
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> Option<&Arc<Catalog>> {
        self.catalog.as_ref()
    }

    /// Install (or replace) the device's catalog. Reported values are
    /// dropped since their definitions may have changed.
    pub fn set_catalog(&mut self, catalog: Arc<Catalog>) {
        self.catalog = Some(catalog);
        self.values.clear();
    }

    /// Last reported value for the datapoint starting at `address`.
    pub fn value(&self, address: u16) -> Option<&DecodedValue> {
        self.values.get(&address)
    }

    /// All reported values, in ascending address order.
    pub fn values(&self) -> Vec<(u16, &DecodedValue)> {
        let mut all: Vec<_> = self.values.iter().map(|(a, v)| (*a, v)).collect();
        all.sort_unstable_by_key(|(a, _)| *a);
        all
    }
}

/// Turns register writes into datapoint changes.
#[derive(Debug, Clone, Copy)]
pub struct DecodeEngine {
    staleness: Duration,
}

impl Default for DecodeEngine {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl DecodeEngine {
    pub fn new(staleness: Duration) -> Self {
        Self { staleness }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Store a register and return the datapoints whose value changed,
    /// in catalog order.
    pub fn apply_update(
        &self,
        state: &mut DeviceState,
        address: u16,
        raw: i64,
        now: Instant,
    ) -> Vec<DatapointChange> {
        state.registers.update(address, raw, now);

        let Some(catalog) = state.catalog.clone() else {
            trace!(address, "no catalog yet, register kept for later");
            return Vec::new();
        };

        catalog
            .covering(address)
            .filter_map(|def| self.refresh(state, def, now))
            .collect()
    }

    /// Evaluate every datapoint against the stored registers. Used once a
    /// catalog arrives for a device that has already been publishing.
    pub fn reevaluate_all(&self, state: &mut DeviceState, now: Instant) -> Vec<DatapointChange> {
        let Some(catalog) = state.catalog.clone() else {
            return Vec::new();
        };
        catalog
            .datapoints()
            .iter()
            .filter_map(|def| self.refresh(state, def, now))
            .collect()
    }

    /// Decode without touching reported values.
    pub fn evaluate(
        &self,
        registers: &RegisterStore,
        def: &DatapointDef,
        now: Instant,
    ) -> Option<DecodedValue> {
        let mut words = Vec::with_capacity(usize::from(def.registers_needed()));
        for offset in 0..def.registers_needed() {
            let Some(address) = def.address.checked_add(offset) else {
                debug!(datapoint = %def.name, start = def.address, "register range exceeds address space");
                return None;
            };
            let Some(register) = registers.get(address) else {
                debug!(
                    datapoint = %def.name,
                    missing = address,
                    start = def.address,
                    needed = def.registers_needed(),
                    "cannot decode yet: register missing"
                );
                return None;
            };
            let age = now.saturating_duration_since(register.observed_at);
            if age > self.staleness {
                debug!(
                    datapoint = %def.name,
                    address,
                    age_secs = age.as_secs_f64(),
                    max_secs = self.staleness.as_secs_f64(),
                    "cannot decode: register is stale"
                );
                return None;
            }
            words.push(register.value);
        }

        let bytes = decode::assemble(&words, usize::from(def.length_bytes));
        let value = decode::decode(def, &bytes)?;
        trace!(datapoint = %def.name, data_type = %def.data_type, %value, "decoded");
        Some(value)
    }

    /// Decode one datapoint and record it if it changed.
    fn refresh(
        &self,
        state: &mut DeviceState,
        def: &DatapointDef,
        now: Instant,
    ) -> Option<DatapointChange> {
        let value = self.evaluate(&state.registers, def, now)?;
        if state.values.get(&def.address) == Some(&value) {
            trace!(datapoint = %def.name, %value, "value unchanged");
            return None;
        }
        state.values.insert(def.address, value.clone());
        Some(DatapointChange {
            address: def.address,
            name: def.name.clone(),
            value,
        })
    }
}
