#![allow(clippy::unwrap_used)]
// End-to-end tests for the `Coordinator` message path: topic parsing,
// metadata resolution, register aggregation and event broadcast.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sorel_core::{
    Coordinator, DecodedValue, DeviceKey, GatewayConfig, GatewayEvent, MetadataConfig,
    MetadataStatus,
};

// ── Helpers ─────────────────────────────────────────────────────────

const METADATA_PATH: &str = "/api/public/0000/device/00a6/metadata";

fn topic(address: u16) -> String {
    format!("Sorel:0000/device/F412FACCDA84/id/00100000/TDC_Smart_Basic:00a6/dp/00/{address}")
}

fn device() -> DeviceKey {
    DeviceKey::new("f412faccda84", "00100000")
}

fn document() -> serde_json::Value {
    json!({
        "datapoints": [
            {"address": 44003, "length": 2, "type": "uns16", "step": 0.1, "name": "Sensor 1"},
            {"address": 43010, "length": 4, "type": "float32", "name": "Power"},
            {"address": 43020, "length": 2, "type": "uint16", "name": "Mode",
             "format": {"0": "Off", "1": "Auto", "2": "Manual"}}
        ]
    })
}

async fn setup(server: &MockServer) -> (TempDir, Coordinator) {
    let dir = TempDir::new().unwrap();
    let mut metadata = MetadataConfig::new(dir.path());
    metadata.base_url = Some(Url::parse(&server.uri()).unwrap());
    metadata.timeout = Duration::from_secs(2);
    let coordinator = Coordinator::new(GatewayConfig::new(metadata)).unwrap();
    (dir, coordinator)
}

async fn serve_document(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .expect(1)
        .mount(server)
        .await;
}

fn drain(rx: &mut broadcast::Receiver<Arc<GatewayEvent>>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((*event).clone());
    }
    events
}

// ── Decoding ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scaled_register_decodes() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    let changes = coordinator
        .handle_message(&topic(44003), br#"{"value": 930}"#)
        .await;

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].name, "Sensor 1");
    assert_eq!(changes[0].value, DecodedValue::Float(93.0));
    assert_eq!(
        coordinator.datapoint_value(&device(), 44003).await,
        Some(DecodedValue::Float(93.0))
    );
    assert!(coordinator.is_device_metadata_available(&device()).await);
}

#[tokio::test]
async fn test_float_waits_for_both_registers() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    let first = coordinator.handle_message(&topic(43010), b"16968").await;
    assert!(first.is_empty(), "half a float must not decode");

    let second = coordinator.handle_message(&topic(43011), b"0").await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].address, 43010);
    assert_eq!(second[0].value, DecodedValue::Float(50.0));
}

#[tokio::test]
async fn test_unchanged_value_is_not_reported_twice() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    let first = coordinator.handle_message(&topic(44003), b"930").await;
    let repeat = coordinator.handle_message(&topic(44003), b"930").await;
    let changed = coordinator.handle_message(&topic(44003), b"931").await;

    assert_eq!(first.len(), 1);
    assert!(repeat.is_empty());
    assert_eq!(changed.len(), 1);
}

#[tokio::test]
async fn test_label_mapping_applies() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    let changes = coordinator.handle_message(&topic(43020), b"1").await;
    assert_eq!(changes[0].value, DecodedValue::Label("Auto".into()));

    let readings = coordinator.datapoint_values(&device()).await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].name, "Mode");
}

#[tokio::test]
async fn test_payload_address_overrides_topic() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    let changes = coordinator
        .handle_message(&topic(1), b"44003=930")
        .await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].address, 44003);
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_and_change_events() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;
    let mut rx = coordinator.subscribe();

    coordinator.handle_message(&topic(44003), b"930").await;
    coordinator.handle_message(&topic(43020), b"2").await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    match &events[0] {
        GatewayEvent::DeviceDiscovered { device: identity } => {
            assert_eq!(identity.key, device());
            assert_eq!(identity.organization_id, "0000");
            assert_eq!(identity.device_id, "00a6");
            assert_eq!(identity.device_name, "TDC_Smart_Basic");
        }
        other => panic!("expected DeviceDiscovered, got {other:?}"),
    }
    assert!(matches!(
        &events[2],
        GatewayEvent::DatapointChanged { address: 43020, value: DecodedValue::Label(label), .. }
            if label == "Manual"
    ));

    let devices = coordinator.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].messages, 2);
    assert!(devices[0].catalog_loaded);
    assert_eq!(devices[0].datapoints, 3);
    assert_eq!(devices[0].metadata, MetadataStatus::Ok);
}

#[tokio::test]
async fn test_connectivity_reported_on_transitions_only() {
    let server = MockServer::start().await;
    let (_dir, coordinator) = setup(&server).await;
    let mut rx = coordinator.subscribe();

    coordinator.set_connected(true);
    coordinator.set_connected(true);
    coordinator.set_connected(false);

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            GatewayEvent::ConnectivityChanged { connected: true },
            GatewayEvent::ConnectivityChanged { connected: false },
        ]
    );
    assert!(!coordinator.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_broadcast_in_apply_order() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    // Load the catalog first so every task below decodes.
    coordinator.handle_message(&topic(44003), b"0").await;
    let mut rx = coordinator.subscribe();

    let mut tasks = tokio::task::JoinSet::new();
    for value in 1..=64u32 {
        let coordinator = coordinator.clone();
        tasks.spawn(async move {
            coordinator
                .handle_message(&topic(44003), value.to_string().as_bytes())
                .await
        });
    }
    while tasks.join_next().await.is_some() {}

    let last = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            GatewayEvent::DatapointChanged { address: 44003, value, .. } => Some(value),
            _ => None,
        })
        .last();
    assert!(last.is_some());
    assert_eq!(last, coordinator.datapoint_value(&device(), 44003).await);
}

// ── Input that is ignored ───────────────────────────────────────────

#[tokio::test]
async fn test_foreign_topic_and_garbage_payload_are_ignored() {
    let server = MockServer::start().await;
    serve_document(&server).await;
    let (_dir, coordinator) = setup(&server).await;

    let changes = coordinator
        .handle_message("homeassistant/sensor/x/state", b"930")
        .await;
    assert!(changes.is_empty());
    assert!(coordinator.devices().await.is_empty());

    let changes = coordinator
        .handle_message(&topic(44003), b"not a number")
        .await;
    assert!(changes.is_empty());
    assert_eq!(coordinator.devices().await.len(), 1);
}

// ── Late metadata ───────────────────────────────────────────────────

#[tokio::test]
async fn test_registers_before_metadata_are_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut metadata = MetadataConfig::new(dir.path());
    metadata.base_url = Some(Url::parse(&server.uri()).unwrap());
    metadata.retry_intervals = vec![Duration::from_millis(100)];
    let coordinator = Coordinator::new(GatewayConfig::new(metadata)).unwrap();

    let early = coordinator.handle_message(&topic(44003), b"930").await;
    assert!(early.is_empty());
    assert_eq!(
        coordinator.metadata_status(&device()).await.unwrap().status,
        MetadataStatus::RetryPending
    );

    // Let the background retry land the document on disk.
    for _ in 0..100 {
        if coordinator.is_device_metadata_available(&device()).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(coordinator.is_device_metadata_available(&device()).await);

    // The next message loads the catalog and replays what was stored.
    let late = coordinator.handle_message(&topic(43020), b"0").await;
    let addresses: Vec<u16> = late.iter().map(|c| c.address).collect();
    assert_eq!(addresses, vec![44003, 43020]);
    assert_eq!(late[0].value, DecodedValue::Float(93.0));
    assert_eq!(late[1].value, DecodedValue::Label("Off".into()));

    coordinator.shutdown().await;
}
