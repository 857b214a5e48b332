//! Reading and writing OCI image layout directories.
//!
//! ```text
//! image/
//! ├── oci-layout
//! ├── index.json
//! └── blobs/sha256/<manifest | config | layers>
//! ```

use std::path::{Path, PathBuf};

use chartscan_core::error::{Result, ScanError};
use oci_spec::image::ImageConfiguration;

pub(crate) const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Path of a blob inside a layout, from its `algorithm:hex` digest.
pub fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
    let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
    root_dir.join("blobs").join(algorithm).join(hash)
}

pub(crate) fn write_blob(root_dir: &Path, digest: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let path = blob_path(root_dir, digest);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, data)?;
    Ok(path)
}

fn read_json(path: &Path, what: &str) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScanError::EngineError(format!("Failed to read {what}: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| ScanError::EngineError(format!("Failed to parse {what}: {e}")))
}

/// The image manifest referenced by the layout's `index.json`.
fn load_manifest(image_dir: &Path) -> Result<serde_json::Value> {
    let index = read_json(&image_dir.join("index.json"), "index.json")?;
    let manifest_digest = index["manifests"][0]["digest"]
        .as_str()
        .ok_or_else(|| ScanError::EngineError("No manifest digest in index.json".to_string()))?;
    read_json(&blob_path(image_dir, manifest_digest), "manifest")
}

/// Image configuration of the layout's manifest.
pub fn load_image_configuration(image_dir: &Path) -> Result<ImageConfiguration> {
    let manifest = load_manifest(image_dir)?;
    let config_digest = manifest["config"]["digest"]
        .as_str()
        .ok_or_else(|| ScanError::EngineError("No config digest in manifest".to_string()))?;
    let config = read_json(&blob_path(image_dir, config_digest), "config")?;
    serde_json::from_value(config)
        .map_err(|e| ScanError::EngineError(format!("Failed to parse config: {e}")))
}

/// Compressed layer sizes, in manifest order.
pub fn layer_sizes(image_dir: &Path) -> Result<Vec<u64>> {
    let manifest = load_manifest(image_dir)?;
    Ok(manifest["layers"]
        .as_array()
        .map(|layers| layers.iter().map(|l| l["size"].as_u64().unwrap_or(0)).collect())
        .unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::testing::write_layout;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blob_path() {
        let root = Path::new("/img");
        assert_eq!(blob_path(root, "sha256:abc"), PathBuf::from("/img/blobs/sha256/abc"));
        assert_eq!(blob_path(root, "abc"), PathBuf::from("/img/blobs/sha256/abc"));
    }

    #[test]
    fn test_layer_sizes() {
        let tmp = TempDir::new().unwrap();
        write_layout(tmp.path(), &[100, 2048, 0], serde_json::json!([]));
        assert_eq!(layer_sizes(tmp.path()).unwrap(), vec![100, 2048, 0]);
    }

    #[test]
    fn test_load_image_configuration() {
        let tmp = TempDir::new().unwrap();
        write_layout(
            tmp.path(),
            &[100],
            serde_json::json!([{"created_by": "/bin/sh -c #(nop) ADD file:abc in / "}]),
        );
        let config = load_image_configuration(tmp.path()).unwrap();
        assert_eq!(config.history().len(), 1);
    }

    #[test]
    fn test_missing_index() {
        let tmp = TempDir::new().unwrap();
        let err = layer_sizes(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("index.json"));
    }
}
