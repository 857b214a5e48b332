//! Registry client for pulling images.
//!
//! Uses `oci-distribution` with anonymous access, writing each pulled image
//! as an OCI image layout directory.

use std::path::{Path, PathBuf};

use chartscan_core::error::{Result, ScanError};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};

use super::layout::{write_blob, MANIFEST_MEDIA_TYPE};
use super::reference::ImageReference;

/// Pulls images from container registries.
pub struct RegistryPuller {
    client: Client,
}

impl Default for RegistryPuller {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryPuller {
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Pull an image into an OCI image layout at `target_dir`.
    ///
    /// Returns the manifest digest.
    pub async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let registry_error = |message: String| ScanError::RegistryError {
            registry: reference.registry.clone(),
            message,
        };

        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image from registry"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir)
            .map_err(|e| registry_error(format!("Failed to create blobs directory: {}", e)))?;

        // Multi-arch indexes resolve to the linux manifest for this host.
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| registry_error(format!("Failed to pull manifest: {}", e)))?;

        let manifest_json = serde_json::to_vec(&manifest)?;
        write_blob(target_dir, &manifest_digest, &manifest_json)
            .map_err(|e| registry_error(format!("Failed to write manifest: {}", e)))?;

        self.pull_blob(&oci_ref, &manifest.config, target_dir, &reference.registry)
            .await?;
        for layer in &manifest.layers {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");
            self.pull_blob(&oci_ref, layer, target_dir, &reference.registry)
                .await?;
        }

        std::fs::write(
            target_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .map_err(|e| registry_error(format!("Failed to write oci-layout: {}", e)))?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": MANIFEST_MEDIA_TYPE,
                "digest": manifest_digest,
                "size": manifest_json.len()
            }]
        });
        std::fs::write(
            target_dir.join("index.json"),
            serde_json::to_string_pretty(&index)?,
        )
        .map_err(|e| registry_error(format!("Failed to write index.json: {}", e)))?;

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            layers = manifest.layers.len(),
            "Image pulled"
        );
        Ok(manifest_digest)
    }

    /// Resolve the manifest digest for a reference without pulling blobs.
    pub async fn pull_manifest_digest(&self, reference: &ImageReference) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let (_manifest, digest): (OciImageManifest, String) = self
            .client
            .pull_image_manifest(&oci_ref, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| ScanError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to pull manifest: {}", e),
            })?;
        Ok(digest)
    }

    async fn pull_blob(
        &self,
        oci_ref: &Reference,
        descriptor: &OciDescriptor,
        target_dir: &Path,
        registry: &str,
    ) -> Result<PathBuf> {
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, descriptor, &mut data)
            .await
            .map_err(|e| ScanError::RegistryError {
                registry: registry.to_string(),
                message: format!("Failed to pull blob {}: {}", descriptor.digest, e),
            })?;
        write_blob(target_dir, &descriptor.digest, &data).map_err(|e| ScanError::RegistryError {
            registry: registry.to_string(),
            message: format!("Failed to write blob {}: {}", descriptor.digest, e),
        })
    }
}

/// Convert to an `oci-distribution` reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.tag, &reference.digest) {
        (_, Some(digest)) => format!("{}/{}@{}", reference.registry, reference.repository, digest),
        (Some(tag), None) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
        (None, None) => format!("{}/{}:latest", reference.registry, reference.repository),
    };

    ref_str.parse::<Reference>().map_err(|e| {
        ScanError::EngineError(format!("Invalid image reference '{}': {}", ref_str, e))
    })
}

/// Select the linux manifest matching the host CPU architecture.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
