#![allow(clippy::unwrap_used)]
// Integration tests for `MetadataCache` against a wiremock metadata
// service and a temporary cache directory.

use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sorel_core::{MetadataCache, MetadataConfig, MetadataStatus};

// ── Helpers ─────────────────────────────────────────────────────────

const METADATA_PATH: &str = "/api/public/0000/device/00a6/metadata";

fn document() -> serde_json::Value {
    json!({
        "datapoints": [
            {"address": 44003, "length": 2, "type": "uns16", "step": 0.1, "name": "Sensor 1"}
        ]
    })
}

fn cache_for(server: &MockServer, dir: &Path, retry: Duration) -> MetadataCache {
    let mut config = MetadataConfig::new(dir);
    config.base_url = Some(Url::parse(&server.uri()).unwrap());
    config.timeout = Duration::from_secs(2);
    config.retry_intervals = vec![retry];
    MetadataCache::from_config(config).unwrap()
}

/// Poll `check` for up to five seconds.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ── Cache hits ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_cached_document_skips_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_secs(300));
    let file = dir.path().join(cache.key("0000", "00a6").file_name());
    std::fs::write(&file, document().to_string()).unwrap();

    let doc = cache.get_metadata("0000", "00a6").await.unwrap();
    assert_eq!(doc.datapoints.len(), 1);
    assert_eq!(cache.status("0000", "00a6"), MetadataStatus::Ok);
}

#[tokio::test]
async fn test_fetched_document_is_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_secs(300));

    assert!(cache.get_metadata("0000", "00a6").await.is_some());
    // Second lookup is served from disk.
    assert!(cache.get_metadata("0000", "00a6").await.is_some());

    let entries = cache.cached_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_name, "meta_0000_00a6_en_latest.json");
}

#[tokio::test]
async fn test_corrupt_cache_file_is_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_secs(300));
    let file = dir.path().join(cache.key("0000", "00a6").file_name());
    std::fs::write(&file, "{ not json").unwrap();

    let doc = cache.get_metadata("0000", "00a6").await.unwrap();
    assert_eq!(doc.datapoints.len(), 1);
    let rewritten: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    assert_eq!(rewritten, document());
}

#[tokio::test]
async fn test_concurrent_first_fetch_issues_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(document())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_secs(300));

    let (a, b) = tokio::join!(
        cache.get_metadata("0000", "00a6"),
        cache.get_metadata("0000", "00a6"),
    );
    assert!(a.is_some());
    assert!(b.is_some());
}

// ── Permanent failure ───────────────────────────────────────────────

#[tokio::test]
async fn test_not_found_is_permanent_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "Device not found"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_millis(50));

    assert!(cache.get_metadata("0000", "00a6").await.is_none());
    assert!(cache.get_metadata("0000", "00a6").await.is_none());
    assert!(!cache.has_retry_task("0000", "00a6"));

    let detail = cache.status_detail("0000", "00a6");
    assert_eq!(detail.status, MetadataStatus::NotFound);
    assert_eq!(detail.retry_count, 0);
    assert_eq!(
        detail.message,
        "Device not found (404) - device type not supported by API"
    );

    // A fresh process over the same directory short-circuits from disk.
    let restarted = cache_for(&server, dir.path(), Duration::from_millis(50));
    assert!(restarted.get_metadata("0000", "00a6").await.is_none());
    assert_eq!(restarted.status("0000", "00a6"), MetadataStatus::NotFound);
}

#[tokio::test]
async fn test_clear_cache_lifts_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"error": "Device not found"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_secs(300));

    assert!(cache.get_metadata("0000", "00a6").await.is_none());
    assert_eq!(cache.status("0000", "00a6"), MetadataStatus::NotFound);

    let removed = cache.clear_cache().await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(cache.status("0000", "00a6"), MetadataStatus::Ok);

    // Asked again after the clear.
    assert!(cache.get_metadata("0000", "00a6").await.is_none());
}

// ── Transient failure & retry ───────────────────────────────────────

#[tokio::test]
async fn test_transient_failure_retries_in_background() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(document()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_millis(300));

    assert!(cache.get_metadata("0000", "00a6").await.is_none());
    let detail = cache.status_detail("0000", "00a6");
    assert_eq!(detail.status, MetadataStatus::RetryPending);
    assert_eq!(detail.retry_count, 1);
    assert_eq!(
        detail.message,
        "Temporary error - retry scheduled (attempt 1)"
    );
    assert!(detail.last_error_time.is_some());
    assert!(cache.has_retry_task("0000", "00a6"));

    // The retry task owns the key; callers do not fetch meanwhile.
    assert!(cache.get_metadata("0000", "00a6").await.is_none());

    let settled = eventually(|| {
        cache.status("0000", "00a6") == MetadataStatus::Ok && !cache.has_retry_task("0000", "00a6")
    })
    .await;
    assert!(settled, "retry task never succeeded");

    let doc = cache.get_metadata("0000", "00a6").await.unwrap();
    assert_eq!(doc.datapoints.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_close_cancels_retry_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = cache_for(&server, dir.path(), Duration::from_secs(60));

    assert!(cache.get_metadata("0000", "00a6").await.is_none());
    assert!(cache.has_retry_task("0000", "00a6"));

    cache.close().await;
    assert!(!cache.has_retry_task("0000", "00a6"));

    let detail = cache.status_detail("0000", "00a6");
    assert_eq!(detail.status, MetadataStatus::Error);
    assert_eq!(detail.message, "Failed to fetch metadata (1 attempts)");

    // Inside both the poll window and the backoff interval: no request.
    assert!(cache.get_metadata("0000", "00a6").await.is_none());
    assert!(!cache.has_retry_task("0000", "00a6"));
}
