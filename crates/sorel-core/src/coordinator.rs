// ── Coordinator ──
//
// Entry point for the message path. Takes `(topic, payload)` pairs from
// the broker, keeps one decode state per device, resolves each device's
// catalog through the metadata cache, and broadcasts the resulting
// events. Nothing on this path returns an error; bad input is logged
// and dropped.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::engine::{DatapointChange, DecodeEngine, DeviceState};
use crate::error::CoreError;
use crate::event::GatewayEvent;
use crate::metadata::{MetadataCache, MetadataStatus, StatusDetail};
use crate::model::{DecodedValue, DeviceKey};
use crate::payload::{Payload, parse_payload};
use crate::topic::{DeviceIdentity, ParsedTopic};

// ── Query results ────────────────────────────────────────────────────

/// Point-in-time view of one tracked device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    #[serde(flatten)]
    pub identity: DeviceIdentity,
    pub metadata: MetadataStatus,
    pub catalog_loaded: bool,
    /// Datapoints in the loaded catalog.
    pub datapoints: usize,
    /// Registers held in the register store.
    pub registers: usize,
    /// Datapoints that have produced a value.
    pub values: usize,
    pub messages: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A datapoint's current value with its catalog name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatapointReading {
    pub address: u16,
    pub name: String,
    pub value: DecodedValue,
}

// ── Coordinator ──────────────────────────────────────────────────────

/// Message-handling facade.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`. Messages for different
/// devices are processed concurrently; messages for the same device are
/// serialized by that device's lock.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: GatewayConfig,
    engine: DecodeEngine,
    metadata: MetadataCache,
    devices: DashMap<DeviceKey, Arc<Mutex<DeviceSlot>>>,
    event_tx: broadcast::Sender<Arc<GatewayEvent>>,
    connected: watch::Sender<bool>,
}

struct DeviceSlot {
    identity: DeviceIdentity,
    state: DeviceState,
    messages: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl DeviceSlot {
    fn new(identity: DeviceIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            state: DeviceState::new(),
            messages: 0,
            first_seen: now,
            last_seen: now,
        }
    }
}

impl Coordinator {
    /// Build the coordinator and its metadata cache from configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, CoreError> {
        let metadata = MetadataCache::from_config(config.metadata.clone())?;
        Ok(Self::with_metadata(config, metadata))
    }

    /// Build around an existing metadata cache.
    pub fn with_metadata(config: GatewayConfig, metadata: MetadataCache) -> Self {
        let engine = DecodeEngine::new(config.staleness);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (connected, _) = watch::channel(false);

        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                engine,
                metadata,
                devices: DashMap::new(),
                event_tx,
                connected,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.inner.metadata
    }

    // ── Message path ─────────────────────────────────────────────────

    /// Process one MQTT message and return the datapoints it changed.
    ///
    /// Every returned change has also been broadcast as
    /// [`GatewayEvent::DatapointChanged`].
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Vec<DatapointChange> {
        let Some(parsed) = ParsedTopic::parse(topic) else {
            debug!(topic, "ignoring message on unrecognized topic");
            return Vec::new();
        };
        let key = parsed.device_key();
        let (slot, discovered) = self.inner.slot(&parsed);
        let mut slot = slot.lock().await;
        slot.messages = slot.messages.saturating_add(1);
        slot.last_seen = Utc::now();

        let mut changes = Vec::new();

        // Devices keep asking until a catalog arrives; the cache throttles.
        if slot.state.catalog().is_none() {
            if let Some(catalog) = self
                .inner
                .metadata
                .get_catalog(&parsed.oem_id, &parsed.device_id)
                .await
            {
                info!(device = %key, datapoints = catalog.len(), "catalog loaded");
                slot.state.set_catalog(Arc::new(catalog));
                changes.extend(
                    self.inner
                        .engine
                        .reevaluate_all(&mut slot.state, Instant::now()),
                );
            }
        }

        if discovered {
            info!(
                device = %key,
                name = %parsed.device_name,
                organization = %parsed.oem_id,
                model = %parsed.device_id,
                "new device discovered"
            );
            self.inner.emit(GatewayEvent::DeviceDiscovered {
                device: slot.identity.clone(),
            });
        }

        match parse_payload(payload) {
            Payload::Parsed { address, value } => {
                match address.or_else(|| parsed.register_address()) {
                    Some(address) => changes.extend(self.inner.engine.apply_update(
                        &mut slot.state,
                        address,
                        value,
                        Instant::now(),
                    )),
                    None => debug!(device = %key, topic, "no register address in topic or payload"),
                }
            }
            Payload::Unparsed => {
                debug!(device = %key, topic, "ignoring unparseable payload");
            }
        }

        // Emitted under the device lock so subscribers see per-device
        // changes in the order they were applied.
        for change in &changes {
            self.inner.emit(GatewayEvent::DatapointChanged {
                device: key.clone(),
                address: change.address,
                name: change.name.clone(),
                value: change.value.clone(),
            });
        }
        drop(slot);
        changes
    }

    // ── Connectivity ─────────────────────────────────────────────────

    /// Record broker connectivity. Broadcasts only on transitions.
    pub fn set_connected(&self, connected: bool) {
        let changed = self.inner.connected.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            info!(connected, "broker connectivity changed");
            self.inner
                .emit(GatewayEvent::ConnectivityChanged { connected });
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Subscribe to connectivity changes.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Subscribe to the event broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.inner.event_tx.subscribe()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// All tracked devices, ordered by key.
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        let slots: Vec<_> = self
            .inner
            .devices
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot = slot.lock().await;
            snapshots.push(self.inner.snapshot(&slot));
        }
        snapshots.sort_by(|a, b| a.identity.key.cmp(&b.identity.key));
        snapshots
    }

    /// Current value of the datapoint starting at `address`.
    pub async fn datapoint_value(&self, device: &DeviceKey, address: u16) -> Option<DecodedValue> {
        let slot = self.inner.find(device)?;
        let slot = slot.lock().await;
        slot.state.value(address).cloned()
    }

    /// Every datapoint value a device has produced, by address.
    pub async fn datapoint_values(&self, device: &DeviceKey) -> Vec<DatapointReading> {
        let Some(slot) = self.inner.find(device) else {
            return Vec::new();
        };
        let slot = slot.lock().await;
        let catalog = slot.state.catalog();
        slot.state
            .values()
            .into_iter()
            .map(|(address, value)| DatapointReading {
                address,
                name: catalog
                    .and_then(|c| c.get(address))
                    .map(|def| def.name.clone())
                    .unwrap_or_default(),
                value: value.clone(),
            })
            .collect()
    }

    /// Metadata status of the device's model, if the device is known.
    pub async fn metadata_status(&self, device: &DeviceKey) -> Option<StatusDetail> {
        let slot = self.inner.find(device)?;
        let slot = slot.lock().await;
        Some(self.inner.metadata.status_detail(
            &slot.identity.organization_id,
            &slot.identity.device_id,
        ))
    }

    /// Whether the device's model currently has metadata available.
    pub async fn is_device_metadata_available(&self, device: &DeviceKey) -> bool {
        self.metadata_status(device)
            .await
            .is_some_and(|detail| detail.status == MetadataStatus::Ok)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Stop background metadata retries and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.metadata.close().await;
        info!(devices = self.inner.devices.len(), "coordinator shut down");
    }
}

impl CoordinatorInner {
    /// The device's slot, created on first sight. The flag is true when
    /// this call created it.
    fn slot(&self, parsed: &ParsedTopic) -> (Arc<Mutex<DeviceSlot>>, bool) {
        match self.devices.entry(parsed.device_key()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let slot = Arc::new(Mutex::new(DeviceSlot::new(parsed.identity())));
                entry.insert(Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    fn find(&self, device: &DeviceKey) -> Option<Arc<Mutex<DeviceSlot>>> {
        self.devices.get(device).map(|entry| Arc::clone(entry.value()))
    }

    fn emit(&self, event: GatewayEvent) {
        // No receivers is fine.
        let _ = self.event_tx.send(Arc::new(event));
    }

    fn snapshot(&self, slot: &DeviceSlot) -> DeviceSnapshot {
        let catalog = slot.state.catalog();
        DeviceSnapshot {
            identity: slot.identity.clone(),
            metadata: self
                .metadata
                .status(&slot.identity.organization_id, &slot.identity.device_id),
            catalog_loaded: catalog.is_some(),
            datapoints: catalog.map_or(0, |c| c.len()),
            registers: slot.state.registers.len(),
            values: slot.state.values().len(),
            messages: slot.messages,
            first_seen: slot.first_seen,
            last_seen: slot.last_seen,
        }
    }
}
