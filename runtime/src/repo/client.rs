//! Repository registration and index refresh.

use std::fmt;
use std::path::PathBuf;

use chartscan_core::error::{Result, ScanError};
use chartscan_core::Settings;
use futures::stream::{FuturesUnordered, StreamExt};

use super::file::{RepoEntry, RepoFile};
use super::repository::{http_client, ChartRepository};
use crate::lock::{FileLock, LOCK_RETRY_DELAY, LOCK_TIMEOUT};

/// Result of registering a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The repository was added and its index cached.
    Added(String),
    /// A repository with the same name was already registered.
    AlreadyExists(String),
}

impl fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddOutcome::Added(name) => write!(f, "\"{name}\" has been added to your repositories"),
            AddOutcome::AlreadyExists(name) => {
                write!(f, "repository name ({name}) already exists")
            }
        }
    }
}

/// Per-repository refresh result.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub name: String,
    pub url: String,
    pub result: std::result::Result<PathBuf, String>,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(_) => write!(
                f,
                "...Successfully got an update from the \"{}\" chart repository",
                self.name
            ),
            Err(e) => write!(
                f,
                "...Unable to get an update from the \"{}\" chart repository ({}):\n\t{}",
                self.name, self.url, e
            ),
        }
    }
}

/// Outcome of refreshing every registered repository.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub outcomes: Vec<RefreshOutcome>,
}

impl RefreshReport {
    /// Number of repositories that failed to refresh.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}

/// Client for the repositories file and the remote indexes it names.
pub struct RepoClient {
    settings: Settings,
    http: reqwest::Client,
}

impl RepoClient {
    /// Create a client for the given settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            settings: settings.clone(),
            http: http_client()?,
        })
    }

    /// Register a repository and cache its index.
    ///
    /// The repositories file is edited under an advisory lock. An existing
    /// entry with the same name is left untouched.
    pub async fn add(&self, name: &str, url: &str) -> Result<AddOutcome> {
        let repo_file = &self.settings.repository_config;

        if let Some(parent) = repo_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScanError::ConfigError(format!(
                    "failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let _lock = FileLock::acquire(
            &self.settings.repository_lock(),
            LOCK_TIMEOUT,
            LOCK_RETRY_DELAY,
        )
        .await?;

        let mut file = RepoFile::load_or_default(repo_file)?;
        if file.has(name) {
            tracing::info!(repo = %name, "Repository already registered");
            return Ok(AddOutcome::AlreadyExists(name.to_string()));
        }

        let entry = RepoEntry::new(name, url);
        let repo = ChartRepository::new(entry.clone(), &self.settings, self.http.clone())?;
        repo.download_index_file().await.map_err(|e| {
            e.wrap(format!(
                "looks like \"{url}\" is not a valid chart repository or cannot be reached"
            ))
        })?;

        file.update(entry);
        file.write(repo_file)?;

        tracing::info!(repo = %name, url = %url, "Repository added");
        Ok(AddOutcome::Added(name.to_string()))
    }

    /// Load every registered repository.
    ///
    /// Fails when the repositories file is missing or lists nothing.
    pub fn repositories(&self) -> Result<Vec<ChartRepository>> {
        let file = RepoFile::load_or_default(&self.settings.repository_config)?;
        if file.repositories.is_empty() {
            return Err(ScanError::RepositoryError {
                name: self.settings.repository_config.display().to_string(),
                message: "no repositories found. You must add one before updating".to_string(),
            });
        }
        file.repositories
            .into_iter()
            .map(|entry| ChartRepository::new(entry, &self.settings, self.http.clone()))
            .collect()
    }

    /// Refresh the given repositories concurrently, one task each.
    ///
    /// A failing repository never aborts the others; its error is recorded
    /// in the report.
    pub async fn refresh(&self, repos: Vec<ChartRepository>) -> RefreshReport {
        self.refresh_with(repos, |_| {}).await
    }

    /// Like [`refresh`](Self::refresh), calling `on_outcome` as each
    /// repository finishes. The report lists outcomes in completion order.
    pub async fn refresh_with<F>(&self, repos: Vec<ChartRepository>, mut on_outcome: F) -> RefreshReport
    where
        F: FnMut(&RefreshOutcome),
    {
        let mut pending: FuturesUnordered<_> = repos
            .into_iter()
            .map(|repo| {
                let name = repo.entry().name.clone();
                let url = repo.entry().url.clone();
                let handle = tokio::spawn(async move { repo.download_index_file().await });
                async move { (name, url, handle.await) }
            })
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some((name, url, joined)) = pending.next().await {
            let result = match joined {
                Ok(Ok(path)) => Ok(path),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("refresh task failed: {e}")),
            };
            match &result {
                Ok(_) => tracing::info!(repo = %name, "Repository refreshed"),
                Err(e) => tracing::warn!(repo = %name, error = %e, "Repository refresh failed"),
            }
            let outcome = RefreshOutcome { name, url, result };
            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        RefreshReport { outcomes }
    }

    /// Load and refresh every registered repository.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let repos = self.repositories()?;
        Ok(self.refresh(repos).await)
    }
}
