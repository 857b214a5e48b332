//! Release drivers: the component that renders a chart and applies it to
//! the cluster.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chartscan_core::error::{Result, ScanError};
use chartscan_core::Settings;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Everything a driver needs to install one release.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub release: String,
    pub namespace: String,
    pub chart_dir: PathBuf,
    pub values: Map<String, Value>,
}

/// An installed release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub manifest: String,
}

/// Installs a prepared chart and returns the rendered release.
#[async_trait]
pub trait ReleaseDriver: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> Result<Release>;
}

/// Driver delegating rendering and apply to the `helm` binary.
#[derive(Debug, Clone)]
pub struct HelmDriver {
    bin: PathBuf,
    kube_context: Option<String>,
    kube_config: Option<PathBuf>,
    storage_driver: Option<String>,
    debug: bool,
}

impl HelmDriver {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bin: settings.helm_bin.clone(),
            kube_context: settings.kube_context.clone(),
            kube_config: settings.kube_config.clone(),
            storage_driver: settings.driver.clone(),
            debug: settings.debug,
        }
    }

    /// Arguments for `helm install`.
    pub fn install_args(&self, request: &InstallRequest, values_file: &std::path::Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "install".into(),
            request.release.clone().into(),
            request.chart_dir.clone().into(),
            "--namespace".into(),
            request.namespace.clone().into(),
            "--values".into(),
            values_file.into(),
            "--output".into(),
            "json".into(),
        ];
        if let Some(ctx) = &self.kube_context {
            args.push("--kube-context".into());
            args.push(ctx.into());
        }
        if let Some(cfg) = &self.kube_config {
            args.push("--kubeconfig".into());
            args.push(cfg.into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        args
    }
}

#[async_trait]
impl ReleaseDriver for HelmDriver {
    async fn install(&self, request: &InstallRequest) -> Result<Release> {
        let install_error = |message: String| ScanError::InstallError {
            release: request.release.clone(),
            message,
        };

        let mut values_file = tempfile::Builder::new()
            .prefix("chartscan-values-")
            .suffix(".yaml")
            .tempfile()?;
        let values_yaml = serde_yaml::to_string(&Value::Object(request.values.clone()))?;
        values_file.write_all(values_yaml.as_bytes())?;
        values_file.flush()?;

        let args = self.install_args(request, values_file.path());
        tracing::debug!(bin = %self.bin.display(), ?args, "Running release install");

        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.args(&args).kill_on_drop(true);
        if let Some(driver) = &self.storage_driver {
            cmd.env("HELM_DRIVER", driver);
        }

        let output = cmd.output().await.map_err(|e| {
            install_error(format!(
                "failed to run {}: {} (is helm installed?)",
                self.bin.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(install_error(format!(
                "{} exited with {}: {}",
                self.bin.display(),
                output.status,
                stderr.trim()
            )));
        }

        let release = parse_release(&output.stdout).map_err(|e| install_error(e.to_string()))?;
        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.version,
            "Release installed"
        );
        Ok(release)
    }
}

/// Parse the JSON release object printed by `helm install --output json`.
pub fn parse_release(stdout: &[u8]) -> Result<Release> {
    Ok(serde_json::from_slice(stdout)?)
}
