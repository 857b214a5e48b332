//! Disk-based image store with LRU eviction.
//!
//! Pulled images live under `<store>/sha256/<digest>/` as OCI layouts. An
//! in-memory index keyed by reference is persisted to `<store>/index.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chartscan_core::error::{Result, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::fs::copy_dir_recursive;

/// Metadata for a stored image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Fully qualified reference (e.g. "docker.io/library/mysql:5.7.30")
    pub reference: String,
    /// Manifest digest
    pub digest: String,
    /// Bytes on disk
    pub size_bytes: u64,
    pub pulled_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// OCI layout directory
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

pub struct ImageStore {
    store_dir: PathBuf,
    index: RwLock<HashMap<String, StoredImage>>,
    max_size_bytes: u64,
}

impl ImageStore {
    /// Open (or create) a store, loading any persisted index.
    pub fn new(store_dir: &Path, max_size_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            ScanError::EngineError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            index: RwLock::new(Self::load_index(store_dir)?),
            store_dir: store_dir.to_path_buf(),
            max_size_bytes,
        })
    }

    /// Look up an image by reference, marking it used.
    pub async fn get(&self, reference: &str) -> Option<StoredImage> {
        let mut index = self.index.write().await;
        let image = index.get_mut(reference)?;
        image.last_used = Utc::now();
        let updated = image.clone();
        drop(index);
        if let Err(e) = self.save_index().await {
            tracing::warn!(error = %e, "Failed to persist image store index");
        }
        Some(updated)
    }

    /// Look up an image by manifest digest, marking it used.
    pub async fn get_by_digest(&self, digest: &str) -> Option<StoredImage> {
        let mut index = self.index.write().await;
        let image = index.values_mut().find(|img| img.digest == digest)?;
        image.last_used = Utc::now();
        let updated = image.clone();
        drop(index);
        if let Err(e) = self.save_index().await {
            tracing::warn!(error = %e, "Failed to persist image store index");
        }
        Some(updated)
    }

    /// Store the layout at `source_dir` under `reference`.
    ///
    /// Content is moved into `sha256/<digest>/` unless that digest is already
    /// present.
    pub async fn put(&self, reference: &str, digest: &str, source_dir: &Path) -> Result<StoredImage> {
        let digest_hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        let target_dir = self.store_dir.join("sha256").join(digest_hex);

        if !target_dir.exists() && source_dir != target_dir {
            copy_dir_recursive(source_dir, &target_dir).map_err(|e| {
                ScanError::EngineError(format!("Failed to copy image to store: {}", e))
            })?;
        }

        let now = Utc::now();
        let stored = StoredImage {
            reference: reference.to_string(),
            digest: digest.to_string(),
            size_bytes: dir_size(&target_dir),
            pulled_at: now,
            last_used: now,
            path: target_dir,
        };

        self.index
            .write()
            .await
            .insert(reference.to_string(), stored.clone());
        self.save_index().await?;

        Ok(stored)
    }

    /// Remove an image; its content goes once no other reference uses it.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let mut index = self.index.write().await;
        let image = index
            .remove(reference)
            .ok_or_else(|| ScanError::EngineError(format!("Image not found: {}", reference)))?;
        let digest_still_used = index.values().any(|img| img.digest == image.digest);
        drop(index);

        if !digest_still_used && image.path.exists() {
            std::fs::remove_dir_all(&image.path).map_err(|e| {
                ScanError::EngineError(format!(
                    "Failed to remove image directory {}: {}",
                    image.path.display(),
                    e
                ))
            })?;
        }

        self.save_index().await
    }

    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        let mut images: Vec<StoredImage> = index.values().cloned().collect();
        images.sort_by(|a, b| a.reference.cmp(&b.reference));
        images
    }

    /// Evict least-recently-used images until the store fits its limit.
    ///
    /// Returns the evicted references.
    pub async fn evict(&self) -> Result<Vec<String>> {
        let mut evicted = Vec::new();

        while self.total_size().await > self.max_size_bytes {
            let lru = {
                let index = self.index.read().await;
                index
                    .values()
                    .min_by_key(|img| img.last_used)
                    .map(|img| img.reference.clone())
            };
            let Some(reference) = lru else { break };
            self.remove(&reference).await?;
            evicted.push(reference);
        }

        Ok(evicted)
    }

    /// Total size of stored images; shared content counts once.
    pub async fn total_size(&self) -> u64 {
        let index = self.index.read().await;
        let mut by_digest: HashMap<&str, u64> = HashMap::new();
        for image in index.values() {
            by_digest.insert(image.digest.as_str(), image.size_bytes);
        }
        by_digest.values().sum()
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
        let index_path = store_dir.join("index.json");
        if !index_path.exists() {
            return Ok(HashMap::new());
        }

        let data = std::fs::read_to_string(&index_path).map_err(|e| {
            ScanError::EngineError(format!(
                "Failed to read image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
            ScanError::EngineError(format!("Failed to parse image store index: {}", e))
        })?;

        // Entries whose content vanished are dropped.
        Ok(store_index
            .images
            .into_iter()
            .filter(|image| image.path.exists())
            .map(|image| (image.reference.clone(), image))
            .collect())
    }

    async fn save_index(&self) -> Result<()> {
        let store_index = StoreIndex {
            images: self.list().await,
        };
        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");

        tokio::fs::write(&index_path, data).await.map_err(|e| {
            ScanError::EngineError(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })
    }
}

fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path);
            } else if let Ok(meta) = path.metadata() {
                total += meta.len();
            }
        }
    }
    total
}
