//! Image reference parsing.
//!
//! Turns strings such as `mysql:5.7.30` or `ghcr.io/org/app@sha256:...`
//! into registry, repository, tag and digest.

use chartscan_core::error::{Result, ScanError};

/// Registry used when the reference names none.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when the reference carries neither tag nor digest.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, with port when given (e.g. "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "library/mysql")
    pub repository: String,
    pub tag: Option<String>,
    /// Content digest (e.g. "sha256:abc...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference.
    ///
    /// - `mysql` → docker.io/library/mysql:latest
    /// - `busybox:1.31.1` → docker.io/library/busybox:1.31.1
    /// - `bitnami/mysql` → docker.io/bitnami/mysql:latest
    /// - `quay.io/org/image:tag` → quay.io/org/image:tag
    /// - `localhost:5000/image` → localhost:5000/image:latest
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ScanError::EngineError("Empty image reference".to_string()));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(ScanError::EngineError(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag can only follow the last path component; a colon before the
        // first slash belongs to a registry port.
        let last_component = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_component..].rfind(':') {
            Some(colon) => {
                let colon = last_component + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if tag.as_deref() == Some("") {
            return Err(ScanError::EngineError(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        if name.is_empty() {
            return Err(ScanError::EngineError(
                "Empty repository in image reference".to_string(),
            ));
        }

        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if rest.is_empty() {
                    return Err(ScanError::EngineError(format!(
                        "Empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), rest.to_string()));
            }
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// Fully qualified reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}
