//! The scan flow.
//!
//! Register the chart repository, refresh every repository, install the
//! chart, then pull each image the release manifest names and print its
//! layer count and total size.

use std::io::Write;
use std::sync::Arc;

use chartscan_core::error::Result;
use chartscan_core::{extract_images, ImageLayerSummary, Settings};
use chartscan_runtime::{
    summarize, unquote, wait_for_image, ContainerEngine, InstallArgs, Installer, OciEngine,
    RepoClient, WaitPolicy,
};
use tokio_util::sync::CancellationToken;

const REPO_NAME: &str = "stable";
const REPO_URL: &str = "https://charts.helm.sh/stable";
const CHART: &str = "mysql";
const RELEASE: &str = "mysql-dev";
const NAMESPACE: &str = "mysql-test";
const SET_VALUES: &str =
    "mysqlRootPassword=admin@123,persistence.enabled=false,imagePullPolicy=Always";

/// What to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub repo_name: String,
    pub repo_url: String,
    pub chart: String,
    pub release: String,
    pub namespace: String,
    /// `--set` style overrides
    pub set: String,
}

impl Default for ScanPlan {
    fn default() -> Self {
        Self {
            repo_name: REPO_NAME.to_string(),
            repo_url: REPO_URL.to_string(),
            chart: CHART.to_string(),
            release: RELEASE.to_string(),
            namespace: NAMESPACE.to_string(),
            set: SET_VALUES.to_string(),
        }
    }
}

/// Collaborators for one scan.
pub struct Scan {
    repos: RepoClient,
    installer: Installer,
    engine: Arc<dyn ContainerEngine>,
    policy: WaitPolicy,
}

impl Scan {
    /// Scan using `helm` for installs and the local OCI engine for images.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            RepoClient::new(settings)?,
            Installer::new(settings)?,
            Arc::new(OciEngine::new(&settings.engine)?),
            WaitPolicy::from_config(&settings.engine),
        ))
    }

    pub fn new(
        repos: RepoClient,
        installer: Installer,
        engine: Arc<dyn ContainerEngine>,
        policy: WaitPolicy,
    ) -> Self {
        Self {
            repos,
            installer,
            engine,
            policy,
        }
    }

    pub async fn run<W: Write>(
        &self,
        plan: &ScanPlan,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.sync_repositories(plan, out).await?;

        let manifest = self
            .installer
            .install(
                &plan.release,
                &plan.repo_name,
                &plan.chart,
                &InstallArgs::with_set(plan.set.clone()),
            )
            .await?;

        let images = extract_images(&manifest);
        tracing::info!(release = %plan.release, count = images.len(), "Images found in manifest");

        for image in &images {
            let summary = self.report_image(image, cancel).await?;
            writeln!(out, "{summary}")?;
        }
        Ok(())
    }

    async fn sync_repositories<W: Write>(&self, plan: &ScanPlan, out: &mut W) -> Result<()> {
        let added = self.repos.add(&plan.repo_name, &plan.repo_url).await?;
        writeln!(out, "{added}")?;

        let repos = self.repos.repositories()?;
        writeln!(out, "Hang tight while we grab the latest from your chart repositories...")?;
        let mut write_error = None;
        self.repos
            .refresh_with(repos, |outcome| {
                if let Err(e) = writeln!(out, "{outcome}") {
                    write_error.get_or_insert(e);
                }
            })
            .await;
        if let Some(e) = write_error {
            return Err(e.into());
        }
        writeln!(out, "Update Complete. ⎈ Happy Helming!⎈")?;
        Ok(())
    }

    /// Pull one image and summarize its history.
    ///
    /// `image` is the manifest value; quotes are stripped before use but the
    /// report names the image as written.
    async fn report_image(&self, image: &str, cancel: &CancellationToken) -> Result<ImageLayerSummary> {
        let reference = unquote(image);
        tracing::debug!(reference = %reference, "Pulling image");

        let pull = self.engine.pull_image(&reference).await?;
        let pulled = pull.join();
        let waited = wait_for_image(self.engine.as_ref(), &reference, &self.policy, cancel);
        tokio::pin!(pulled);
        tokio::pin!(waited);

        // A failed pull ends the wait early instead of running out the timeout.
        // History is only read once the pull itself has finished.
        tokio::select! {
            found = &mut waited => {
                found?;
                pulled.await?;
            }
            result = &mut pulled => {
                result?;
                waited.await?;
            }
        }

        let history = self.engine.image_history(&reference).await?;
        Ok(summarize(image, &history))
    }
}
