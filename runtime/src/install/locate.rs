//! Chart resolution: `<repo>/<chart>` to an archive in the repository cache.

use std::path::{Path, PathBuf};

use chartscan_core::error::{Result, ScanError};
use chartscan_core::Settings;
use sha2::{Digest, Sha256};

use crate::fs::copy_dir_recursive;
use crate::repo::{
    fetch_bytes, resolve_chart_url, ChartDependency, ChartRepository, ChartVersion, IndexFile,
    RepoFile,
};

/// Resolves charts and dependencies against registered repositories.
pub struct ChartLocator {
    settings: Settings,
    http: reqwest::Client,
}

impl ChartLocator {
    pub fn new(settings: &Settings, http: reqwest::Client) -> Self {
        Self {
            settings: settings.clone(),
            http,
        }
    }

    /// Resolve `repo/chart` to a downloaded archive path.
    ///
    /// The repository index is read from the cache, downloading it first
    /// when no cached copy exists. Archives already in the cache with a
    /// matching digest are reused.
    pub async fn locate(
        &self,
        repo_name: &str,
        chart: &str,
        version: Option<&str>,
        devel: bool,
    ) -> Result<PathBuf> {
        let file = RepoFile::load(&self.settings.repository_config)?;
        let entry = file.get(repo_name).cloned().ok_or_else(|| {
            ScanError::RepositoryError {
                name: repo_name.to_string(),
                message: "repo not found".to_string(),
            }
        })?;

        let index_path = self.settings.index_cache_path(repo_name);
        if !index_path.exists() {
            tracing::info!(repo = %repo_name, "No cached index, downloading");
            ChartRepository::new(entry.clone(), &self.settings, self.http.clone())?
                .download_index_file()
                .await?;
        }
        let index = IndexFile::load(&index_path)?;
        let chart_version = index.get(chart, version, devel).map_err(|e| match e {
            ScanError::ChartNotFound(msg) => {
                ScanError::ChartNotFound(format!("{msg} in repository {repo_name}"))
            }
            other => other,
        })?;

        let dest = self
            .settings
            .repository_cache
            .join(format!("{}-{}.tgz", chart_version.name, chart_version.version));
        self.fetch_chart(&entry.url, chart_version, &dest).await?;
        Ok(dest)
    }

    /// Download a dependency archive into `charts_dir`.
    ///
    /// The dependency repository may be a URL, a `file://` path relative to
    /// `chart_dir`, or a registered repository written as `@name` or
    /// `alias:name`.
    pub async fn fetch_dependency(
        &self,
        dep: &ChartDependency,
        chart_dir: &Path,
        charts_dir: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(charts_dir)?;

        if let Some(local) = dep.repository.strip_prefix("file://") {
            let source = chart_dir.join(local);
            let target = charts_dir.join(&dep.name);
            copy_dir_recursive(&source, &target).map_err(|e| {
                ScanError::ChartLoadError(format!(
                    "failed to copy dependency {} from {}: {}",
                    dep.name,
                    source.display(),
                    e
                ))
            })?;
            return Ok(target);
        }

        let repo_url = self.dependency_repo_url(dep)?;
        let index_url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));
        let body = fetch_bytes(&self.http, &index_url)
            .await
            .map_err(|message| ScanError::IndexDownloadError {
                url: index_url.clone(),
                message,
            })?;
        let index = IndexFile::from_bytes(&body)?;
        let chart_version = index.get(&dep.name, Some(&dep.version), false)?;

        let dest = charts_dir.join(format!("{}-{}.tgz", chart_version.name, chart_version.version));
        self.fetch_chart(&repo_url, chart_version, &dest).await?;
        Ok(dest)
    }

    fn dependency_repo_url(&self, dep: &ChartDependency) -> Result<String> {
        let alias = dep
            .repository
            .strip_prefix('@')
            .or_else(|| dep.repository.strip_prefix("alias:"));
        match alias {
            Some(name) => {
                let file = RepoFile::load(&self.settings.repository_config)?;
                file.get(name)
                    .map(|e| e.url.clone())
                    .ok_or_else(|| ScanError::RepositoryError {
                        name: name.to_string(),
                        message: format!("no repository definition for dependency {}", dep.name),
                    })
            }
            None if dep.repository.is_empty() => Err(ScanError::RepositoryError {
                name: dep.name.clone(),
                message: "dependency has no repository".to_string(),
            }),
            None => Ok(dep.repository.clone()),
        }
    }

    async fn fetch_chart(&self, repo_url: &str, cv: &ChartVersion, dest: &Path) -> Result<()> {
        if dest.exists() && digest_matches(dest, &cv.digest)? {
            tracing::debug!(path = %dest.display(), "Using cached chart archive");
            return Ok(());
        }

        let chart_url = cv.urls.first().ok_or_else(|| {
            ScanError::ChartNotFound(format!("chart {} {} has no downloadable URLs", cv.name, cv.version))
        })?;
        let url = resolve_chart_url(repo_url, chart_url)?;

        tracing::info!(chart = %cv.name, version = %cv.version, url = %url, "Downloading chart");
        let body = fetch_bytes(&self.http, &url)
            .await
            .map_err(|message| ScanError::ChartNotFound(format!("{url}: {message}")))?;

        if !cv.digest.is_empty() {
            let actual = hex::encode(Sha256::digest(&body));
            if actual != cv.digest {
                return Err(ScanError::ChartLoadError(format!(
                    "digest mismatch for {url}: expected {}, got {actual}",
                    cv.digest
                )));
            }
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &body)?;
        Ok(())
    }
}

/// Whether the file's sha256 equals `expected`. An empty digest always matches.
fn digest_matches(path: &Path, expected: &str) -> Result<bool> {
    if expected.is_empty() {
        return Ok(true);
    }
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)) == expected)
}
