//! Chart repository index (`index.yaml`).

use std::collections::BTreeMap;
use std::path::Path;

use chartscan_core::error::{Result, ScanError};
use serde::{Deserialize, Serialize};

/// A dependency declared by a chart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// One published chart version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartVersion {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "appVersion")]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub chart_type: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,
}

impl ChartVersion {
    fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(self.version.trim_start_matches('v')).ok()
    }
}

/// Parsed repository index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub generated: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

impl IndexFile {
    /// Parse index bytes, rejecting documents without an `apiVersion`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut index: IndexFile = serde_yaml::from_slice(data)?;
        if index.api_version.is_empty() {
            return Err(ScanError::SerializationError(
                "no API version specified in index".to_string(),
            ));
        }
        index.sort_entries();
        Ok(index)
    }

    /// Load an index from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            ScanError::ConfigError(format!("failed to read index {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&data)
    }

    /// Sort each chart's versions newest first; unparsable versions go last.
    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| match (a.semver(), b.semver()) {
                (Some(va), Some(vb)) => vb.cmp(&va),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }
    }

    /// Chart names, sorted.
    pub fn chart_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Select a chart version.
    ///
    /// With no `version`, the newest stable release is chosen, or the newest
    /// of any kind when `devel` is set. A `version` matches exactly first and
    /// is otherwise read as a semver requirement.
    pub fn get(&self, name: &str, version: Option<&str>, devel: bool) -> Result<&ChartVersion> {
        let versions = self
            .entries
            .get(name)
            .ok_or_else(|| ScanError::ChartNotFound(format!("no chart name found: {name}")))?;

        let wanted = version.map(str::trim).filter(|v| !v.is_empty());
        let found = match wanted {
            None => versions.iter().find(|cv| {
                cv.semver()
                    .map(|v| devel || v.pre.is_empty())
                    .unwrap_or(false)
            }),
            Some(v) => {
                if let Some(exact) = versions.iter().find(|cv| cv.version == v) {
                    Some(exact)
                } else {
                    let req = semver::VersionReq::parse(v).map_err(|e| {
                        ScanError::ChartNotFound(format!("invalid version constraint {v}: {e}"))
                    })?;
                    versions
                        .iter()
                        .find(|cv| cv.semver().map(|sv| req.matches(&sv)).unwrap_or(false))
                }
            }
        };

        found.ok_or_else(|| {
            ScanError::ChartNotFound(format!(
                "no chart version found for {}-{}",
                name,
                wanted.unwrap_or("")
            ))
        })
    }
}
