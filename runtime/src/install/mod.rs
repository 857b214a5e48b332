//! Release installer.
//!
//! Resolves a chart from a registered repository, merges `--set` overrides,
//! checks that the chart is installable and that its dependencies are
//! bundled, then hands it to a [`ReleaseDriver`].

mod chart;
mod driver;
mod locate;

use std::sync::Arc;

pub use chart::{Chart, ChartMetadata};
pub use driver::{parse_release, HelmDriver, InstallRequest, Release, ReleaseDriver};
pub use locate::ChartLocator;

use chartscan_core::error::Result;
use chartscan_core::{strvals, Settings};
use serde_json::{Map, Value};

use crate::repo::http_client;

/// Install options.
#[derive(Debug, Clone, Default)]
pub struct InstallArgs {
    /// Comma-separated `key=value` overrides
    pub set: String,
    /// Chart version or semver constraint
    pub version: Option<String>,
    /// Consider prerelease chart versions
    pub devel: bool,
    /// Download missing dependencies instead of failing
    pub dependency_update: bool,
}

impl InstallArgs {
    pub fn with_set(set: impl Into<String>) -> Self {
        Self {
            set: set.into(),
            ..Self::default()
        }
    }

    /// Version constraint applied when resolving the chart.
    fn version_constraint(&self) -> Option<&str> {
        match self.version.as_deref() {
            Some(v) if !v.is_empty() => Some(v),
            _ => None,
        }
    }
}

/// Installs charts from registered repositories.
pub struct Installer {
    settings: Settings,
    locator: ChartLocator,
    driver: Arc<dyn ReleaseDriver>,
}

impl Installer {
    /// Installer using the `helm` binary as its release driver.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_driver(settings, Arc::new(HelmDriver::from_settings(settings)))
    }

    /// Installer with a custom release driver.
    pub fn with_driver(settings: &Settings, driver: Arc<dyn ReleaseDriver>) -> Result<Self> {
        Ok(Self {
            settings: settings.clone(),
            locator: ChartLocator::new(settings, http_client()?),
            driver,
        })
    }

    /// Install `repo/chart` as `release` and return the rendered manifest.
    pub async fn install(
        &self,
        release: &str,
        repo: &str,
        chart: &str,
        args: &InstallArgs,
    ) -> Result<String> {
        let archive = self
            .locator
            .locate(repo, chart, args.version_constraint(), args.devel)
            .await?;
        tracing::debug!("CHART PATH: {}", archive.display());

        let values = merge_values(&args.set)?;

        let workdir = tempfile::Builder::new().prefix("chartscan-chart-").tempdir()?;
        let loaded = Chart::unpack(&archive, workdir.path())?;
        loaded.ensure_installable()?;
        self.ensure_dependencies(&loaded, args).await?;

        let request = InstallRequest {
            release: release.to_string(),
            namespace: self.settings.namespace.clone(),
            chart_dir: loaded.dir().to_path_buf(),
            values,
        };
        tracing::info!(
            release = %release,
            chart = %loaded.metadata().name,
            version = %loaded.metadata().version,
            namespace = %request.namespace,
            "Installing chart"
        );

        let installed = self.driver.install(&request).await?;
        Ok(installed.manifest)
    }

    async fn ensure_dependencies(&self, chart: &Chart, args: &InstallArgs) -> Result<()> {
        if chart.metadata().dependencies.is_empty() {
            return Ok(());
        }
        match chart.check_dependencies() {
            Ok(()) => Ok(()),
            Err(e) if !args.dependency_update => Err(e),
            Err(_) => {
                for dep in chart.missing_dependencies()? {
                    tracing::info!(dependency = %dep.name, version = %dep.version, "Updating dependency");
                    self.locator
                        .fetch_dependency(&dep, chart.dir(), &chart.charts_dir())
                        .await?;
                }
                chart.check_dependencies()
            }
        }
    }
}

/// Build the value overrides from a `--set` expression.
pub fn merge_values(set: &str) -> Result<Map<String, Value>> {
    let mut values = Map::new();
    strvals::parse_into(set, &mut values).map_err(|e| e.wrap("failed parsing --set data"))?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::chart::testing::write_chart_archive;
    use super::*;
    use crate::repo::{RepoEntry, RepoFile};
    use async_trait::async_trait;
    use chartscan_core::ScanError;
    use std::sync::Mutex;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Driver recording requests and returning a fixed manifest.
    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<InstallRequest>>,
        manifest: String,
    }

    #[async_trait]
    impl ReleaseDriver for Recorder {
        async fn install(&self, request: &InstallRequest) -> Result<Release> {
            assert!(request.chart_dir.join("Chart.yaml").exists());
            self.requests.lock().unwrap().push(request.clone());
            Ok(Release {
                name: request.release.clone(),
                namespace: request.namespace.clone(),
                version: 1,
                manifest: self.manifest.clone(),
            })
        }
    }

    struct Fixture {
        _server: MockServer,
        tmp: TempDir,
        settings: Settings,
    }

    async fn fixture(files: &[(&str, &str)]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("src.tgz");
        write_chart_archive(&archive, "mysql", files);
        let bytes = std::fs::read(&archive).unwrap();
        let digest = hex::encode(Sha256::digest(&bytes));

        let server = MockServer::start().await;
        let index = format!(
            "apiVersion: v1\nentries:\n  mysql:\n  - name: mysql\n    version: 1.6.9\n    digest: {digest}\n    urls:\n    - mysql-1.6.9.tgz\n"
        );
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mysql-1.6.9.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(&server)
            .await;

        let settings = Settings {
            repository_config: tmp.path().join("repositories.yaml"),
            repository_cache: tmp.path().join("cache"),
            ..Settings::default()
        }
        .with_namespace("mysql-test");
        let mut file = RepoFile::default();
        file.update(RepoEntry::new("stable", server.uri()));
        file.write(&settings.repository_config).unwrap();

        Fixture {
            _server: server,
            tmp,
            settings,
        }
    }

    const MANIFEST: &str = "kind: Deployment\n        image: \"mysql:5.7.30\"\n";

    #[test]
    fn test_merge_values() {
        let values =
            merge_values("mysqlRootPassword=admin@123,persistence.enabled=false,imagePullPolicy=Always")
                .unwrap();
        assert_eq!(values["mysqlRootPassword"], "admin@123");
        assert_eq!(values["persistence"]["enabled"], false);
        assert_eq!(values["imagePullPolicy"], "Always");
    }

    #[test]
    fn test_merge_values_error_is_wrapped() {
        let err = merge_values("broken").unwrap_err();
        assert!(err.to_string().contains("failed parsing --set data"));
    }

    #[tokio::test]
    async fn test_install_returns_manifest() {
        let fx = fixture(&[("Chart.yaml", "apiVersion: v1\nname: mysql\nversion: 1.6.9\n")]).await;
        let recorder = Arc::new(Recorder {
            manifest: MANIFEST.to_string(),
            ..Default::default()
        });
        let installer = Installer::with_driver(&fx.settings, recorder.clone()).unwrap();

        let manifest = installer
            .install(
                "mysql-dev",
                "stable",
                "mysql",
                &InstallArgs::with_set("persistence.enabled=false"),
            )
            .await
            .unwrap();
        assert_eq!(manifest, MANIFEST);

        let requests = recorder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].release, "mysql-dev");
        assert_eq!(requests[0].namespace, "mysql-test");
        assert_eq!(requests[0].values["persistence"]["enabled"], false);
        assert!(fx.tmp.path().join("cache").join("mysql-1.6.9.tgz").exists());
    }

    #[tokio::test]
    async fn test_install_rejects_library_chart() {
        let fx = fixture(&[(
            "Chart.yaml",
            "apiVersion: v2\nname: mysql\nversion: 1.6.9\ntype: library\n",
        )])
        .await;
        let recorder = Arc::new(Recorder::default());
        let installer = Installer::with_driver(&fx.settings, recorder.clone()).unwrap();

        let err = installer
            .install("mysql-dev", "stable", "mysql", &InstallArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotInstallable(_)));
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_missing_dependency() {
        let fx = fixture(&[(
            "Chart.yaml",
            "apiVersion: v2\nname: mysql\nversion: 1.6.9\ndependencies:\n- name: common\n  version: 1.0.0\n  repository: file://../common\n",
        )])
        .await;
        let recorder = Arc::new(Recorder::default());
        let installer = Installer::with_driver(&fx.settings, recorder.clone()).unwrap();

        let err = installer
            .install("mysql-dev", "stable", "mysql", &InstallArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::MissingDependencies(_)));
        assert!(recorder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_dependency_update() {
        let fx = fixture(&[
            (
                "Chart.yaml",
                "apiVersion: v2\nname: mysql\nversion: 1.6.9\ndependencies:\n- name: common\n  version: 1.0.0\n  repository: file://./vendor/common\n",
            ),
            ("vendor/common/Chart.yaml", "apiVersion: v2\nname: common\nversion: 1.0.0\n"),
        ])
        .await;
        let recorder = Arc::new(Recorder {
            manifest: MANIFEST.to_string(),
            ..Default::default()
        });
        let installer = Installer::with_driver(&fx.settings, recorder.clone()).unwrap();

        let args = InstallArgs {
            dependency_update: true,
            ..InstallArgs::default()
        };
        let manifest = installer
            .install("mysql-dev", "stable", "mysql", &args)
            .await
            .unwrap();
        assert_eq!(manifest, MANIFEST);
        assert_eq!(recorder.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_install_bad_set_expression() {
        let fx = fixture(&[("Chart.yaml", "apiVersion: v1\nname: mysql\nversion: 1.6.9\n")]).await;
        let installer = Installer::with_driver(&fx.settings, Arc::new(Recorder::default())).unwrap();

        let err = installer
            .install("mysql-dev", "stable", "mysql", &InstallArgs::with_set("nokey"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed parsing --set data"));
    }
}
