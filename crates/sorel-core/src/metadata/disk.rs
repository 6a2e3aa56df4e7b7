// ── On-disk metadata cache ──
//
// One JSON file per cache key, holding the service response verbatim
// (including the not-found sentinel). Writes go through a temp file and
// a rename so readers never see half a document.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use sorel_api::MetadataDocument;
use sorel_api::metadata::is_not_found_body;

use super::key::MetadataCacheKey;

/// What a cache lookup found.
#[derive(Debug, Clone)]
pub enum CacheRead {
    Missing,
    Document(MetadataDocument),
    /// The persisted not-found sentinel.
    NotFound,
    /// Present but unreadable or not a metadata document.
    Corrupt,
}

/// One file in the cache directory.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub file_name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// File-per-key metadata cache.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &MetadataCacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub async fn read(&self, key: &MetadataCacheKey) -> CacheRead {
        let path = self.path(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return CacheRead::Missing,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read metadata cache file");
                return CacheRead::Corrupt;
            }
        };

        let value = match serde_json::from_str::<Value>(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt metadata cache file, ignoring");
                return CacheRead::Corrupt;
            }
        };
        if is_not_found_body(&value) {
            return CacheRead::NotFound;
        }
        match serde_json::from_value::<MetadataDocument>(value) {
            Ok(doc) => CacheRead::Document(doc),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cached metadata has unexpected shape, ignoring");
                CacheRead::Corrupt
            }
        }
    }

    /// Persist a response body for `key`.
    pub async fn write(&self, key: &MetadataCacheKey, body: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), bytes = body.len(), "metadata cached");
        Ok(())
    }

    /// Remove the whole directory and recreate it empty. Returns the
    /// number of files that were removed.
    pub async fn clear(&self) -> io::Result<usize> {
        let count = match self.entries().await {
            Ok(entries) => entries.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(count)
    }

    /// Files currently in the cache directory, sorted by name.
    pub async fn entries(&self) -> io::Result<Vec<CacheEntry>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            entries.push(CacheEntry {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key() -> MetadataCacheKey {
        MetadataCacheKey::new("0000", "00a6", "en", "latest")
    }

    #[tokio::test]
    async fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        assert!(matches!(cache.read(&key()).await, CacheRead::Missing));
    }

    #[tokio::test]
    async fn write_then_read_document() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().join("nested"));
        cache
            .write(&key(), r#"{"datapoints":[{"address":1,"length":2,"type":"uns16"}]}"#)
            .await
            .unwrap();

        match cache.read(&key()).await {
            CacheRead::Document(doc) => assert_eq!(doc.datapoints.len(), 1),
            other => panic!("expected document, got {other:?}"),
        }
        assert!(!cache.path(&key()).with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn sentinel_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());

        cache.write(&key(), r#"{"error":"Device not found"}"#).await.unwrap();
        assert!(matches!(cache.read(&key()).await, CacheRead::NotFound));

        std::fs::write(cache.path(&key()), "{not json").unwrap();
        assert!(matches!(cache.read(&key()).await, CacheRead::Corrupt));
    }

    #[tokio::test]
    async fn clear_counts_and_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().join("meta"));
        assert_eq!(cache.clear().await.unwrap(), 0);

        cache.write(&key(), "{}").await.unwrap();
        cache
            .write(&MetadataCacheKey::new("1", "2", "en", "latest"), "{}")
            .await
            .unwrap();
        assert_eq!(cache.entries().await.unwrap().len(), 2);

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.dir().is_dir());
        assert!(cache.entries().await.unwrap().is_empty());
    }
}
