//! Image reference extraction from rendered release manifests.

use serde::{Deserialize, Serialize};

/// Field marker identifying a container image line.
const IMAGE_FIELD: &str = "image:";

/// Extract every `image:` value from rendered manifest text.
///
/// Each line is trimmed; lines starting with `image:` contribute the trimmed
/// text after the first marker. Empty values and values starting with `#`
/// are skipped. Order follows the input and duplicates are kept. Values are
/// returned verbatim, quotes included.
pub fn extract_images(manifest: &str) -> Vec<String> {
    manifest
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(IMAGE_FIELD))
        .filter_map(|line| line.split_once(IMAGE_FIELD))
        .map(|(_, rest)| rest.trim())
        .filter(|value| !value.is_empty() && !value.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Layer summary for one pulled image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLayerSummary {
    /// Image reference as it appeared in the manifest
    pub name: String,
    /// Sum of all layer sizes in bytes
    pub total_size_bytes: u64,
    /// Number of history entries
    pub layer_count: usize,
}

impl ImageLayerSummary {
    /// Total size in mebibytes.
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / 1024.0 / 1024.0
    }
}

impl std::fmt::Display for ImageLayerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Image: {}", self.name)?;
        writeln!(f, "Number of layers: {}", self.layer_count)?;
        write!(
            f,
            "Total size layers: {} bytes ({:.2} MB)",
            self.total_size_bytes,
            self.total_size_mb()
        )
    }
}
