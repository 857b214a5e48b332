//! Native engine backed by the local image store and a registry puller.

use std::sync::Arc;

use async_trait::async_trait;
use chartscan_core::error::{Result, ScanError};
use chartscan_core::EngineConfig;
use oci_spec::image::History;

use super::{ContainerEngine, HistoryEntry, ImageSummary, PullHandle};
use crate::oci::layout::{layer_sizes, load_image_configuration};
use crate::oci::{ImageReference, ImageStore, RegistryPuller, StoredImage};

/// Cache-first engine: images already in the store are not pulled again.
#[derive(Clone)]
pub struct OciEngine {
    store: Arc<ImageStore>,
    puller: Arc<RegistryPuller>,
}

impl OciEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let store = ImageStore::new(&config.store_dir, config.max_store_bytes)?;
        Ok(Self::with_store(Arc::new(store)))
    }

    pub fn with_store(store: Arc<ImageStore>) -> Self {
        Self {
            store,
            puller: Arc::new(RegistryPuller::new()),
        }
    }

    /// Pull `reference` unless the store already has it.
    pub async fn pull(&self, reference: &str) -> Result<StoredImage> {
        let parsed = ImageReference::parse(reference)?;
        let full_ref = parsed.full_reference();

        if let Some(stored) = self.store.get(&full_ref).await {
            tracing::info!(reference = %full_ref, digest = %stored.digest, "Using cached image");
            return Ok(stored);
        }

        let digest = self.puller.pull_manifest_digest(&parsed).await?;

        // Same content under another tag.
        if let Some(stored) = self.store.get_by_digest(&digest).await {
            tracing::info!(
                reference = %full_ref,
                digest = %digest,
                "Image content already cached under different reference"
            );
            return self.store.put(&full_ref, &digest, &stored.path).await;
        }

        let tmp_dir = self
            .store
            .store_dir()
            .join("tmp")
            .join(digest.replace(':', "-"));
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir).map_err(|e| {
                ScanError::EngineError(format!(
                    "Failed to clean temp directory {}: {}",
                    tmp_dir.display(),
                    e
                ))
            })?;
        }

        let pulled_digest = self.puller.pull(&parsed, &tmp_dir).await?;
        let stored = self.store.put(&full_ref, &pulled_digest, &tmp_dir).await?;
        if let Err(e) = std::fs::remove_dir_all(&tmp_dir) {
            tracing::warn!(path = %tmp_dir.display(), error = %e, "Failed to remove temp directory");
        }

        let evicted = self.store.evict().await?;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), references = ?evicted, "Evicted images from store");
        }

        Ok(stored)
    }

    async fn stored(&self, reference: &str) -> Result<StoredImage> {
        let full_ref = ImageReference::parse(reference)?.full_reference();
        self.store
            .get(&full_ref)
            .await
            .ok_or_else(|| ScanError::EngineError(format!("Image not found: {}", reference)))
    }
}

#[async_trait]
impl ContainerEngine for OciEngine {
    async fn pull_image(&self, reference: &str) -> Result<PullHandle> {
        // Reject malformed references before spawning.
        ImageReference::parse(reference)?;

        let engine = self.clone();
        let owned = reference.to_string();
        let task = tokio::spawn(async move {
            let stored = engine.pull(&owned).await;
            if let Err(e) = &stored {
                tracing::warn!(reference = %owned, error = %e, "Image pull failed");
            }
            stored.map(|s| s.digest)
        });
        Ok(PullHandle::new(reference, task))
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        Ok(self
            .store
            .list()
            .await
            .into_iter()
            .map(|image| ImageSummary {
                repo_tags: vec![image.reference],
                digest: image.digest,
                size: image.size_bytes,
            })
            .collect())
    }

    async fn image_history(&self, reference: &str) -> Result<Vec<HistoryEntry>> {
        let stored = self.stored(reference).await?;
        let config = load_image_configuration(&stored.path)?;
        let sizes = layer_sizes(&stored.path)?;
        Ok(history_entries(config.history(), &sizes))
    }
}

/// Pair config history with manifest layer sizes.
///
/// Non-empty steps consume layer sizes in order. Images without recorded
/// history get one entry per layer.
fn history_entries(history: &[History], sizes: &[u64]) -> Vec<HistoryEntry> {
    if history.is_empty() {
        return sizes
            .iter()
            .map(|&size| HistoryEntry {
                created_by: String::new(),
                size,
                empty_layer: false,
            })
            .collect();
    }

    let mut layers = sizes.iter().copied();
    history
        .iter()
        .map(|entry| {
            let empty_layer = entry.empty_layer().unwrap_or(false);
            let size = if empty_layer {
                0
            } else {
                layers.next().unwrap_or(0)
            };
            HistoryEntry {
                created_by: entry
                    .created_by()
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                size,
                empty_layer,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::summarize;
    use crate::oci::layout::testing::write_layout;
    use tempfile::TempDir;

    async fn engine_with(tmp: &TempDir, reference: &str, sizes: &[u64], history: serde_json::Value) -> OciEngine {
        let source = tmp.path().join("source");
        let digest = write_layout(&source, sizes, history);
        let store = ImageStore::new(&tmp.path().join("store"), u64::MAX).unwrap();
        let full_ref = ImageReference::parse(reference).unwrap().full_reference();
        store.put(&full_ref, &digest, &source).await.unwrap();
        OciEngine::with_store(Arc::new(store))
    }

    #[tokio::test]
    async fn test_list_images() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, "mysql:5.7.30", &[10], serde_json::json!([])).await;

        let images = engine.list_images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].repo_tags, vec!["docker.io/library/mysql:5.7.30"]);
        assert!(images[0].repo_tags[0].contains("mysql:5.7.30"));
        assert_eq!(images[0].digest, "sha256:manifest1");
    }

    #[tokio::test]
    async fn test_image_history_pairs_layer_sizes() {
        let tmp = TempDir::new().unwrap();
        let history = serde_json::json!([
            {"created_by": "/bin/sh -c #(nop) ADD file:abc in / "},
            {"created_by": "/bin/sh -c #(nop)  ENV MYSQL_MAJOR=5.7", "empty_layer": true},
            {"created_by": "/bin/sh -c apt-get update"},
            {"created_by": "/bin/sh -c #(nop)  CMD [\"mysqld\"]", "empty_layer": true}
        ]);
        let engine = engine_with(&tmp, "mysql:5.7.30", &[27_000_000, 4_500_000], history).await;

        let entries = engine.image_history("mysql:5.7.30").await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].size, 27_000_000);
        assert!(entries[1].empty_layer);
        assert_eq!(entries[1].size, 0);
        assert_eq!(entries[2].size, 4_500_000);
        assert_eq!(entries[2].created_by, "/bin/sh -c apt-get update");

        let summary = summarize("mysql:5.7.30", &entries);
        assert_eq!(summary.layer_count, 4);
        assert_eq!(summary.total_size_bytes, 31_500_000);
    }

    #[tokio::test]
    async fn test_image_history_without_recorded_history() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, "busybox:1.31.1", &[700_000, 300], serde_json::json!([])).await;

        let entries = engine.image_history("busybox:1.31.1").await.unwrap();
        assert_eq!(
            entries.iter().map(|e| e.size).collect::<Vec<_>>(),
            vec![700_000, 300]
        );
    }

    #[tokio::test]
    async fn test_image_history_unknown_image() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, "busybox:1.31.1", &[1], serde_json::json!([])).await;
        let err = engine.image_history("mysql:5.7.30").await.unwrap_err();
        assert!(err.to_string().contains("Image not found: mysql:5.7.30"));
    }

    #[tokio::test]
    async fn test_pull_cached_image_skips_registry() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, "mysql:5.7.30", &[10], serde_json::json!([])).await;

        let handle = engine.pull_image("mysql:5.7.30").await.unwrap();
        assert_eq!(handle.join().await.unwrap(), "sha256:manifest1");
    }

    #[tokio::test]
    async fn test_pull_rejects_bad_reference() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(&tmp, "mysql:5.7.30", &[10], serde_json::json!([])).await;
        assert!(engine.pull_image("mysql@nodigest").await.is_err());
    }
}
