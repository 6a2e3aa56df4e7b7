// ── Metadata fetch & retry cache ──
//
// Resolves a device model's metadata document through three layers: the
// on-disk cache, a throttled request to the metadata service, and a
// background retry task per failing key. A "device not found" answer is
// final until the cache is cleared.
//
// Per-key state machine:
//
//   ok ──fail──▶ retry_pending ──task exits w/o success──▶ error
//    ▲               │  │
//    └───success─────┘  └──"Device not found"──▶ not_found (terminal)

pub mod disk;
pub mod key;
pub mod status;

pub use disk::{CacheEntry, CacheRead, DiskCache};
pub use key::MetadataCacheKey;
pub use status::{MetadataStatus, StatusDetail};

pub use sorel_api::MetadataDocument;
pub use sorel_api::metadata::is_not_found_body;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sorel_api::{MetadataClient, MetadataResponse, TlsMode, TransportConfig};
use url::Url;

use crate::config::MetadataConfig;
use crate::error::CoreError;
use crate::model::Catalog;

// ── Bookkeeping ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum FailureState {
    Transient {
        failed_count: u32,
        last_failed: Instant,
        last_failed_at: DateTime<Utc>,
    },
    Permanent {
        at: DateTime<Utc>,
    },
}

struct RetryTask {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct CacheState {
    last_poll: HashMap<MetadataCacheKey, Instant>,
    failures: HashMap<MetadataCacheKey, FailureState>,
    /// At most one entry per key; inserted under the state lock.
    tasks: HashMap<MetadataCacheKey, RetryTask>,
    next_task_id: u64,
}

enum FetchOutcome {
    Stored(MetadataDocument),
    NotFound,
    Failed,
}

// ── MetadataCache ───────────────────────────────────────────────────

/// Disk-backed metadata cache with throttled fetching and background
/// retries. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    client: MetadataClient,
    disk: DiskCache,
    config: MetadataConfig,
    state: Mutex<CacheState>,
    /// Serializes fetches of the same key.
    gates: DashMap<MetadataCacheKey, Arc<tokio::sync::Mutex<()>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCache")
            .field("base_url", &self.inner.client.base_url().as_str())
            .field("cache_dir", &self.inner.disk.dir())
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    pub fn new(client: MetadataClient, config: MetadataConfig) -> Self {
        let disk = DiskCache::new(config.cache_dir.clone());
        Self {
            inner: Arc::new(CacheInner {
                client,
                disk,
                config,
                state: Mutex::new(CacheState::default()),
                gates: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build the HTTP client from the config and wrap it.
    pub fn from_config(config: MetadataConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: TlsMode::from(&config.tls),
            timeout: config.timeout,
        };
        let client = MetadataClient::new(
            config.resolved_base_url()?,
            config.url_template.clone(),
            &transport,
        )?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.inner.config
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.disk.dir()
    }

    /// Cache key for a device model, using the configured language and
    /// firmware placeholder.
    pub fn key(&self, organization_id: &str, device_id: &str) -> MetadataCacheKey {
        MetadataCacheKey::new(
            organization_id,
            device_id,
            self.inner.config.language.clone(),
            self.inner.config.firmware.clone(),
        )
    }

    /// The service URL a fetch for this device model would request.
    pub fn request_url(&self, organization_id: &str, device_id: &str) -> Result<Url, CoreError> {
        let key = self.key(organization_id, device_id);
        Ok(self
            .inner
            .client
            .metadata_url(&key.organization_id, &key.device_id, &key.language)?)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    /// Resolve the metadata document for a device model.
    ///
    /// Returns `None` when nothing is available right now: the model is
    /// unknown to the service, the request failed (a retry task takes
    /// over), or fetching is throttled. Never fails loudly.
    pub async fn get_metadata(
        &self,
        organization_id: &str,
        device_id: &str,
    ) -> Option<MetadataDocument> {
        let key = self.key(organization_id, device_id);
        self.inner.resolve(&key).await
    }

    /// [`get_metadata`](Self::get_metadata), validated into a catalog.
    pub async fn get_catalog(&self, organization_id: &str, device_id: &str) -> Option<Catalog> {
        self.get_metadata(organization_id, device_id)
            .await
            .map(|doc| Catalog::from_document(&doc))
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn status(&self, organization_id: &str, device_id: &str) -> MetadataStatus {
        let key = self.key(organization_id, device_id);
        self.inner.status_detail(&key).status
    }

    pub fn status_detail(&self, organization_id: &str, device_id: &str) -> StatusDetail {
        let key = self.key(organization_id, device_id);
        self.inner.status_detail(&key)
    }

    /// Whether a background retry task is scheduled for the model.
    pub fn has_retry_task(&self, organization_id: &str, device_id: &str) -> bool {
        let key = self.key(organization_id, device_id);
        self.inner.lock().tasks.contains_key(&key)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Empty the cache directory and return how many files were removed.
    ///
    /// Also lifts "not found" markers and poll throttles, so cleared
    /// models are fetched again on next use.
    pub async fn clear_cache(&self) -> Result<usize, CoreError> {
        let removed = self
            .inner
            .disk
            .clear()
            .await
            .map_err(|source| CoreError::Cache {
                path: self.inner.disk.dir().display().to_string(),
                source,
            })?;

        {
            let mut state = self.inner.lock();
            state
                .failures
                .retain(|_, failure| !matches!(failure, FailureState::Permanent { .. }));
            state.last_poll.clear();
        }

        info!(removed, dir = %self.inner.disk.dir().display(), "metadata cache cleared");
        Ok(removed)
    }

    /// Files currently held in the cache directory.
    pub async fn cached_entries(&self) -> Result<Vec<CacheEntry>, CoreError> {
        match self.inner.disk.entries().await {
            Ok(entries) => Ok(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(CoreError::Cache {
                path: self.inner.disk.dir().display().to_string(),
                source,
            }),
        }
    }

    /// Cancel every retry task and wait for all of them to finish. No new
    /// tasks are started afterwards.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();

        let tasks: Vec<RetryTask> = {
            let mut state = self.inner.lock();
            state.tasks.drain().map(|(_, task)| task).collect()
        };

        let count = tasks.len();
        for task in tasks {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!(task = task.id, error = %e, "retry task ended abnormally");
                }
            }
        }
        debug!(count, "metadata cache closed");
    }
}

// ── Internals ───────────────────────────────────────────────────────

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, key: &MetadataCacheKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.gates.entry(key.clone()).or_default().value())
    }

    fn is_permanent(&self, key: &MetadataCacheKey) -> bool {
        matches!(
            self.lock().failures.get(key),
            Some(FailureState::Permanent { .. })
        )
    }

    async fn resolve(self: &Arc<Self>, key: &MetadataCacheKey) -> Option<MetadataDocument> {
        if self.is_permanent(key) {
            debug!(key = %key, "device model marked not found, skipping");
            return None;
        }

        let gate = self.gate(key);
        let _guard = gate.lock().await;

        // Another caller may have settled the key while we waited.
        if self.is_permanent(key) {
            return None;
        }

        match self.disk.read(key).await {
            CacheRead::Document(doc) => {
                debug!(key = %key, "metadata loaded from cache");
                return Some(doc);
            }
            CacheRead::NotFound => {
                self.record_permanent(key);
                return None;
            }
            CacheRead::Missing | CacheRead::Corrupt => {}
        }

        if !self.begin_poll(key) {
            debug!(key = %key, "poll and retry limits reached, not fetching");
            return None;
        }

        match self.fetch_direct(key).await {
            FetchOutcome::Stored(doc) => Some(doc),
            FetchOutcome::NotFound => None,
            FetchOutcome::Failed => {
                self.ensure_retry_task(key);
                match self.disk.read(key).await {
                    CacheRead::Document(doc) => {
                        info!(key = %key, "falling back to previously cached metadata");
                        Some(doc)
                    }
                    CacheRead::NotFound => {
                        self.record_permanent(key);
                        None
                    }
                    CacheRead::Missing | CacheRead::Corrupt => None,
                }
            }
        }
    }

    /// Decide whether a proactive fetch may go out now, and if so record
    /// the poll time. A scheduled retry task suppresses proactive fetches.
    fn begin_poll(&self, key: &MetadataCacheKey) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        if state.tasks.contains_key(key) {
            return false;
        }

        let can_poll = state
            .last_poll
            .get(key)
            .is_none_or(|last| now.duration_since(*last) > self.config.poll_interval);
        let can_retry = match state.failures.get(key) {
            None => true,
            Some(FailureState::Permanent { .. }) => false,
            Some(FailureState::Transient {
                failed_count,
                last_failed,
                ..
            }) => now.duration_since(*last_failed) > self.config.retry_interval(*failed_count),
        };

        if !can_poll && !can_retry {
            return false;
        }
        state.last_poll.insert(key.clone(), now);
        true
    }

    /// One request to the service, bypassing cache and throttles.
    async fn fetch_direct(&self, key: &MetadataCacheKey) -> FetchOutcome {
        let result = self
            .client
            .fetch(&key.organization_id, &key.device_id, &key.language)
            .await;

        match result {
            Ok(MetadataResponse::Found { body, document }) => {
                if let Err(e) = self.disk.write(key, &body).await {
                    warn!(key = %key, error = %e, "could not persist metadata");
                }
                self.record_success(key);
                info!(key = %key, datapoints = document.datapoints.len(), "metadata fetched");
                FetchOutcome::Stored(document)
            }
            Ok(MetadataResponse::NotFound { body }) => {
                if let Err(e) = self.disk.write(key, &body).await {
                    warn!(key = %key, error = %e, "could not persist not-found marker");
                }
                self.record_permanent(key);
                info!(key = %key, "device model not found, no metadata available");
                FetchOutcome::NotFound
            }
            Err(e) => {
                let attempt = self.record_failure(key);
                if e.is_transient() {
                    warn!(key = %key, attempt, error = %e, "metadata fetch failed");
                } else {
                    error!(key = %key, attempt, error = %e, "metadata fetch failed");
                }
                FetchOutcome::Failed
            }
        }
    }

    fn record_success(&self, key: &MetadataCacheKey) {
        let task = {
            let mut state = self.lock();
            state.failures.remove(key);
            state.tasks.remove(key)
        };
        if let Some(task) = task {
            task.cancel.cancel();
        }
    }

    fn record_permanent(&self, key: &MetadataCacheKey) {
        let task = {
            let mut state = self.lock();
            state
                .failures
                .insert(key.clone(), FailureState::Permanent { at: Utc::now() });
            state.tasks.remove(key)
        };
        if let Some(task) = task {
            task.cancel.cancel();
        }
    }

    /// Count one failed attempt. Returns the new failure count.
    fn record_failure(&self, key: &MetadataCacheKey) -> u32 {
        let mut state = self.lock();
        let failed_count = match state.failures.get(key) {
            Some(FailureState::Permanent { .. }) => return 0,
            Some(FailureState::Transient { failed_count, .. }) => failed_count.saturating_add(1),
            None => 1,
        };
        state.failures.insert(
            key.clone(),
            FailureState::Transient {
                failed_count,
                last_failed: Instant::now(),
                last_failed_at: Utc::now(),
            },
        );
        failed_count
    }

    /// Start the key's retry task unless one is running, the key is not
    /// in a transient failure, or the cache is shutting down.
    fn ensure_retry_task(self: &Arc<Self>, key: &MetadataCacheKey) {
        let mut state = self.lock();
        if self.shutdown.is_cancelled() || state.tasks.contains_key(key) {
            return;
        }
        if !matches!(
            state.failures.get(key),
            Some(FailureState::Transient { .. })
        ) {
            return;
        }

        let id = state.next_task_id;
        state.next_task_id = state.next_task_id.wrapping_add(1);
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(retry_loop(
            Arc::clone(self),
            key.clone(),
            id,
            cancel.clone(),
        ));
        state
            .tasks
            .insert(key.clone(), RetryTask { id, cancel, handle });
        debug!(key = %key, task = id, "retry task started");
    }

    /// When the next retry is due, if the key is still failing.
    fn next_retry_at(&self, key: &MetadataCacheKey) -> Option<Instant> {
        match self.lock().failures.get(key) {
            Some(FailureState::Transient {
                failed_count,
                last_failed,
                ..
            }) => Some(*last_failed + self.config.retry_interval(*failed_count)),
            _ => None,
        }
    }

    fn unregister_task(&self, key: &MetadataCacheKey, id: u64) {
        let mut state = self.lock();
        if state.tasks.get(key).is_some_and(|task| task.id == id) {
            state.tasks.remove(key);
        }
    }

    fn status_detail(&self, key: &MetadataCacheKey) -> StatusDetail {
        let state = self.lock();
        match state.failures.get(key) {
            None => StatusDetail::new(MetadataStatus::Ok, 0, None),
            Some(FailureState::Permanent { at }) => {
                StatusDetail::new(MetadataStatus::NotFound, 0, Some(*at))
            }
            Some(FailureState::Transient {
                failed_count,
                last_failed_at,
                ..
            }) => {
                let status = if state.tasks.contains_key(key) {
                    MetadataStatus::RetryPending
                } else {
                    MetadataStatus::Error
                };
                StatusDetail::new(status, *failed_count, Some(*last_failed_at))
            }
        }
    }
}

// ── Retry task ──────────────────────────────────────────────────────

/// Sleep until the backoff interval has passed, try once, repeat until
/// the key stops failing or the task is cancelled.
async fn retry_loop(
    inner: Arc<CacheInner>,
    key: MetadataCacheKey,
    id: u64,
    cancel: CancellationToken,
) {
    while let Some(due) = inner.next_retry_at(&key) {
        let wait = due.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(key = %key, wait_secs = wait.as_secs_f64(), "waiting for next metadata retry");
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(key = %key, "retry task cancelled");
                break;
            }
            () = tokio::time::sleep_until(due) => {}
        }

        info!(key = %key, "automatic metadata retry");
        let gate = inner.gate(&key);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(key = %key, "retry task cancelled");
                break;
            }
            outcome = async {
                let _guard = gate.lock().await;
                inner.fetch_direct(&key).await
            } => outcome,
        };

        match outcome {
            FetchOutcome::Stored(_) => {
                info!(key = %key, "metadata retry succeeded");
                break;
            }
            FetchOutcome::NotFound => break,
            FetchOutcome::Failed => warn!(key = %key, "metadata retry failed"),
        }
    }

    inner.unregister_task(&key, id);
}
