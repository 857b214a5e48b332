//! Explicit settings for the chart and image clients.
//!
//! Settings are read once from the process environment and then passed by
//! reference to every component that needs them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Namespace used when `HELM_NAMESPACE` is unset.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default maximum image store size: 10 GB.
pub const DEFAULT_IMAGE_STORE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Chart and cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Namespace releases are installed into
    pub namespace: String,

    /// Path to the repositories file (`repositories.yaml`)
    pub repository_config: PathBuf,

    /// Directory holding downloaded indexes and chart archives
    pub repository_cache: PathBuf,

    /// Release storage driver handed to the cluster client
    pub driver: Option<String>,

    /// Enable debug output
    pub debug: bool,

    /// Kubernetes context override
    pub kube_context: Option<String>,

    /// Kubeconfig path override
    pub kube_config: Option<PathBuf>,

    /// Cluster client binary
    pub helm_bin: PathBuf,

    /// Container engine settings
    pub engine: EngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            repository_config: config_home().join("helm").join("repositories.yaml"),
            repository_cache: cache_home().join("helm").join("repository"),
            driver: None,
            debug: false,
            kube_context: None,
            kube_config: None,
            helm_bin: PathBuf::from("helm"),
            engine: EngineConfig::default(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut settings = Self::default();

        if let Some(ns) = var("HELM_NAMESPACE") {
            settings.namespace = ns;
        }
        if let Some(path) = var("HELM_REPOSITORY_CONFIG") {
            settings.repository_config = PathBuf::from(path);
        }
        if let Some(path) = var("HELM_REPOSITORY_CACHE") {
            settings.repository_cache = PathBuf::from(path);
        }
        settings.driver = var("HELM_DRIVER");
        settings.debug = var("HELM_DEBUG")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        settings.kube_context = var("HELM_KUBECONTEXT");
        settings.kube_config = var("KUBECONFIG").map(PathBuf::from);
        if let Some(bin) = var("HELM_BIN") {
            settings.helm_bin = PathBuf::from(bin);
        }
        if let Some(dir) = var("CHARTSCAN_IMAGE_DIR") {
            settings.engine.store_dir = PathBuf::from(dir);
        }

        tracing::debug!(
            namespace = %settings.namespace,
            repository_config = %settings.repository_config.display(),
            repository_cache = %settings.repository_cache.display(),
            "Loaded settings"
        );

        settings
    }

    /// Return a copy targeting a different namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Path of the advisory lock guarding the repositories file.
    ///
    /// `repositories.yaml` → `repositories.lock`, next to it.
    pub fn repository_lock(&self) -> PathBuf {
        lock_path_for(&self.repository_config)
    }

    /// Cached index path for a named repository.
    pub fn index_cache_path(&self, repo_name: &str) -> PathBuf {
        self.repository_cache.join(format!("{repo_name}-index.yaml"))
    }

    /// Cached chart-name list for a named repository.
    pub fn charts_cache_path(&self, repo_name: &str) -> PathBuf {
        self.repository_cache.join(format!("{repo_name}-charts.txt"))
    }
}

/// Container engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Local image store directory
    pub store_dir: PathBuf,

    /// Maximum image store size in bytes before LRU eviction
    pub max_store_bytes: u64,

    /// Interval between image list polls while waiting for a pull
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Upper bound on waiting for a pulled image to appear
    #[serde(with = "duration_millis")]
    pub pull_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: dirs::home_dir()
                .map(|h| h.join(".chartscan"))
                .unwrap_or_else(|| PathBuf::from(".chartscan"))
                .join("images"),
            max_store_bytes: DEFAULT_IMAGE_STORE_SIZE,
            poll_interval: Duration::from_secs(1),
            pull_timeout: Duration::from_secs(600),
        }
    }
}

fn config_home() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"))
}

fn cache_home() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"))
}

fn lock_path_for(file: &Path) -> PathBuf {
    match file.extension() {
        Some(_) => file.with_extension("lock"),
        None => {
            let mut name = file.as_os_str().to_os_string();
            name.push(".lock");
            PathBuf::from(name)
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "on"
    )
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
