//! A single remote chart repository.

use std::path::{Path, PathBuf};

use chartscan_core::error::{Result, ScanError};
use chartscan_core::Settings;

use super::file::RepoEntry;
use super::index::IndexFile;

/// Build the HTTP client used for index and chart downloads.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("chartscan/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ScanError::ConfigError(format!("failed to build HTTP client: {}", e)))
}

/// Resolve a chart URL from an index against its repository URL.
///
/// Absolute URLs are returned as-is; relative ones are joined onto the
/// repository URL.
pub fn resolve_chart_url(repo_url: &str, chart_url: &str) -> Result<String> {
    if let Ok(url) = reqwest::Url::parse(chart_url) {
        return Ok(url.to_string());
    }
    let base = format!("{}/", repo_url.trim_end_matches('/'));
    let base = reqwest::Url::parse(&base)
        .map_err(|e| ScanError::ConfigError(format!("invalid repository URL {repo_url}: {e}")))?;
    base.join(chart_url)
        .map(|u| u.to_string())
        .map_err(|e| ScanError::ConfigError(format!("invalid chart URL {chart_url}: {e}")))
}

/// A remote repository and the cache its index is written to.
#[derive(Debug, Clone)]
pub struct ChartRepository {
    entry: RepoEntry,
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl ChartRepository {
    /// Create a repository handle, validating its name and URL.
    pub fn new(entry: RepoEntry, settings: &Settings, client: reqwest::Client) -> Result<Self> {
        if entry.name.is_empty() || entry.name.contains('/') {
            return Err(ScanError::RepositoryError {
                name: entry.name.clone(),
                message: "repository name must be non-empty and must not contain '/'".to_string(),
            });
        }
        reqwest::Url::parse(&entry.url).map_err(|e| ScanError::RepositoryError {
            name: entry.name.clone(),
            message: format!("invalid chart URL format: {} ({})", entry.url, e),
        })?;

        Ok(Self {
            entry,
            cache_dir: settings.repository_cache.clone(),
            client,
        })
    }

    /// The repository entry.
    pub fn entry(&self) -> &RepoEntry {
        &self.entry
    }

    /// URL of the remote `index.yaml`.
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.entry.url.trim_end_matches('/'))
    }

    /// Cached index path.
    pub fn index_cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}-index.yaml", self.entry.name))
    }

    /// Fetch the index, validate it and write it to the cache.
    ///
    /// Alongside the index a `<name>-charts.txt` file lists every chart
    /// name, one per line. Returns the cached index path.
    pub async fn download_index_file(&self) -> Result<PathBuf> {
        let url = self.index_url();
        tracing::debug!(repo = %self.entry.name, url = %url, "Downloading repository index");

        let body = fetch_bytes(&self.client, &url).await.map_err(|message| {
            ScanError::IndexDownloadError {
                url: url.clone(),
                message,
            }
        })?;
        let index = IndexFile::from_bytes(&body).map_err(|e| ScanError::IndexDownloadError {
            url: url.clone(),
            message: e.to_string(),
        })?;

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            ScanError::ConfigError(format!(
                "failed to create cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        let index_path = self.index_cache_path();
        std::fs::write(&index_path, &body)?;
        write_chart_names(
            &self.cache_dir.join(format!("{}-charts.txt", self.entry.name)),
            &index,
        )?;

        tracing::info!(
            repo = %self.entry.name,
            charts = index.entries.len(),
            path = %index_path.display(),
            "Repository index updated"
        );

        Ok(index_path)
    }
}

/// GET a URL, returning the body or a printable failure reason.
pub(crate) async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<Vec<u8>, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("failed to fetch {url} : {status}"));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| e.to_string())
}

fn write_chart_names(path: &Path, index: &IndexFile) -> Result<()> {
    let mut names = index.chart_names().join("\n");
    names.push('\n');
    std::fs::write(path, names)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INDEX: &str = "apiVersion: v1\nentries:\n  mysql:\n  - name: mysql\n    version: 1.6.9\n    urls: [mysql-1.6.9.tgz]\n  redis:\n  - name: redis\n    version: 10.5.7\n";

    fn settings(tmp: &TempDir) -> Settings {
        Settings {
            repository_cache: tmp.path().join("cache"),
            ..Settings::default()
        }
    }

    #[test]
    fn test_resolve_relative_chart_url() {
        assert_eq!(
            resolve_chart_url("https://charts.example.com/stable", "mysql-1.6.9.tgz").unwrap(),
            "https://charts.example.com/stable/mysql-1.6.9.tgz"
        );
        assert_eq!(
            resolve_chart_url("https://charts.example.com/stable/", "mysql-1.6.9.tgz").unwrap(),
            "https://charts.example.com/stable/mysql-1.6.9.tgz"
        );
    }

    #[test]
    fn test_resolve_absolute_chart_url() {
        assert_eq!(
            resolve_chart_url(
                "https://charts.example.com/stable",
                "https://cdn.example.com/mysql-1.6.9.tgz"
            )
            .unwrap(),
            "https://cdn.example.com/mysql-1.6.9.tgz"
        );
    }

    #[test]
    fn test_new_rejects_bad_name() {
        let tmp = TempDir::new().unwrap();
        let entry = RepoEntry::new("bad/name", "https://charts.example.com");
        assert!(ChartRepository::new(entry, &settings(&tmp), http_client().unwrap()).is_err());
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let tmp = TempDir::new().unwrap();
        let entry = RepoEntry::new("stable", "not a url");
        assert!(ChartRepository::new(entry, &settings(&tmp), http_client().unwrap()).is_err());
    }

    #[test]
    fn test_index_url_trims_slash() {
        let tmp = TempDir::new().unwrap();
        let entry = RepoEntry::new("stable", "https://charts.example.com/stable/");
        let repo = ChartRepository::new(entry, &settings(&tmp), http_client().unwrap()).unwrap();
        assert_eq!(repo.index_url(), "https://charts.example.com/stable/index.yaml");
    }

    #[tokio::test]
    async fn test_download_index_writes_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let entry = RepoEntry::new("stable", server.uri());
        let repo = ChartRepository::new(entry, &settings(&tmp), http_client().unwrap()).unwrap();

        let index_path = repo.download_index_file().await.unwrap();
        assert_eq!(index_path, tmp.path().join("cache").join("stable-index.yaml"));
        assert_eq!(std::fs::read_to_string(&index_path).unwrap(), INDEX);

        let names = std::fs::read_to_string(tmp.path().join("cache").join("stable-charts.txt")).unwrap();
        assert_eq!(names, "mysql\nredis\n");
    }

    #[tokio::test]
    async fn test_download_index_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let entry = RepoEntry::new("stable", server.uri());
        let repo = ChartRepository::new(entry, &settings(&tmp), http_client().unwrap()).unwrap();

        let err = repo.download_index_file().await.unwrap_err();
        assert!(matches!(err, ScanError::IndexDownloadError { .. }));
        assert!(err.to_string().contains("404"));
        assert!(!tmp.path().join("cache").join("stable-index.yaml").exists());
    }

    #[tokio::test]
    async fn test_download_index_rejects_non_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("entries: {}\n"))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let entry = RepoEntry::new("stable", server.uri());
        let repo = ChartRepository::new(entry, &settings(&tmp), http_client().unwrap()).unwrap();

        let err = repo.download_index_file().await.unwrap_err();
        assert!(err.to_string().contains("no API version"));
    }
}
