//! The repositories file (`repositories.yaml`).

use std::path::Path;

use chartscan_core::error::{Result, ScanError};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A registered chart repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "caFile")]
    pub ca_file: String,
    #[serde(default, rename = "certFile")]
    pub cert_file: String,
    #[serde(default, rename = "keyFile")]
    pub key_file: String,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default)]
    pub pass_credentials_all: bool,
}

impl RepoEntry {
    /// Entry with only a name and URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Contents of the repositories file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoFile {
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub generated: String,
    #[serde(default)]
    pub repositories: Vec<RepoEntry>,
}

impl RepoFile {
    /// Load the file, failing if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanError::RepositoryError {
                    name: path.display().to_string(),
                    message: "repositories file does not exist".to_string(),
                }
            } else {
                ScanError::IoError(e)
            }
        })?;
        Self::parse(&data)
    }

    /// Load the file, treating a missing file as empty.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => Self::parse(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn parse(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Whether a repository with this name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a repository by name.
    pub fn get(&self, name: &str) -> Option<&RepoEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Replace the entry with the same name, or append it.
    pub fn update(&mut self, entry: RepoEntry) {
        match self.repositories.iter_mut().find(|r| r.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.repositories.push(entry),
        }
    }

    /// Remove an entry by name. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.name != name);
        self.repositories.len() != before
    }

    /// Write the file with mode 0644, creating the parent directory.
    pub fn write(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScanError::ConfigError(format!(
                    "failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        self.generated = Utc::now().to_rfc3339();
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
        }

        Ok(())
    }
}
