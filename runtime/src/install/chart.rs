//! Loading unpacked chart archives.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chartscan_core::error::{Result, ScanError};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::repo::ChartDependency;

/// Chart types accepted for installation.
const INSTALLABLE_TYPES: &[&str] = &["", "application"];

/// Parsed `Chart.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartMetadata {
    #[serde(default, rename = "apiVersion")]
    pub api_version: String,
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
    pub dependencies: Vec<ChartDependency>,
}

/// `requirements.yaml` of apiVersion v1 charts.
#[derive(Debug, Default, Deserialize)]
struct Requirements {
    #[serde(default)]
    dependencies: Vec<ChartDependency>,
}

/// A chart unpacked on disk.
#[derive(Debug, Clone)]
pub struct Chart {
    dir: PathBuf,
    metadata: ChartMetadata,
}

impl Chart {
    /// Unpack a `.tgz` chart archive into `dest` and load it.
    ///
    /// Chart archives hold one top-level directory named after the chart.
    pub fn unpack(archive: &Path, dest: &Path) -> Result<Self> {
        let file = File::open(archive).map_err(|e| {
            ScanError::ChartLoadError(format!("failed to open {}: {}", archive.display(), e))
        })?;
        let mut tar = Archive::new(GzDecoder::new(file));
        tar.unpack(dest).map_err(|e| {
            ScanError::ChartLoadError(format!(
                "failed to extract {} to {}: {}",
                archive.display(),
                dest.display(),
                e
            ))
        })?;

        let root = find_chart_root(dest)?;
        Self::load_dir(&root)
    }

    /// Load a chart from an unpacked directory.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let chart_yaml = dir.join("Chart.yaml");
        let data = std::fs::read_to_string(&chart_yaml).map_err(|e| {
            ScanError::ChartLoadError(format!("failed to read {}: {}", chart_yaml.display(), e))
        })?;
        let mut metadata: ChartMetadata = serde_yaml::from_str(&data).map_err(|e| {
            ScanError::ChartLoadError(format!("invalid {}: {}", chart_yaml.display(), e))
        })?;
        if metadata.name.is_empty() {
            return Err(ScanError::ChartLoadError(format!(
                "{}: chart name is required",
                chart_yaml.display()
            )));
        }

        if metadata.dependencies.is_empty() {
            let requirements = dir.join("requirements.yaml");
            if requirements.exists() {
                let data = std::fs::read_to_string(&requirements)?;
                let parsed: Requirements = serde_yaml::from_str(&data).map_err(|e| {
                    ScanError::ChartLoadError(format!("invalid {}: {}", requirements.display(), e))
                })?;
                metadata.dependencies = parsed.dependencies;
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            metadata,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &ChartMetadata {
        &self.metadata
    }

    /// Directory holding bundled subcharts.
    pub fn charts_dir(&self) -> PathBuf {
        self.dir.join("charts")
    }

    /// Fail unless the chart type may be installed.
    pub fn ensure_installable(&self) -> Result<()> {
        if INSTALLABLE_TYPES.contains(&self.metadata.chart_type.as_str()) {
            Ok(())
        } else {
            Err(ScanError::NotInstallable(self.metadata.chart_type.clone()))
        }
    }

    /// Names of the subcharts bundled under `charts/`.
    ///
    /// Archives and directories are both read for their `Chart.yaml` name.
    pub fn subchart_names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let charts_dir = self.charts_dir();
        if !charts_dir.is_dir() {
            return Ok(names);
        }

        for entry in std::fs::read_dir(&charts_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if path.join("Chart.yaml").exists() {
                    names.insert(Self::load_dir(&path)?.metadata.name);
                }
            } else if is_chart_archive(&path) {
                names.insert(archive_chart_name(&path)?);
            }
        }
        Ok(names)
    }

    /// Declared dependencies with no bundled subchart of the same name.
    pub fn missing_dependencies(&self) -> Result<Vec<ChartDependency>> {
        let present = self.subchart_names()?;
        Ok(self
            .metadata
            .dependencies
            .iter()
            .filter(|dep| !present.contains(&dep.name))
            .cloned()
            .collect())
    }

    /// Fail when any declared dependency is missing from `charts/`.
    pub fn check_dependencies(&self) -> Result<()> {
        let missing = self.missing_dependencies()?;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ScanError::MissingDependencies(
                missing.into_iter().map(|d| d.name).collect(),
            ))
        }
    }
}

fn is_chart_archive(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Locate the directory holding `Chart.yaml` directly under `dest`.
fn find_chart_root(dest: &Path) -> Result<PathBuf> {
    if dest.join("Chart.yaml").exists() {
        return Ok(dest.to_path_buf());
    }
    for entry in std::fs::read_dir(dest)? {
        let path = entry?.path();
        if path.is_dir() && path.join("Chart.yaml").exists() {
            return Ok(path);
        }
    }
    Err(ScanError::ChartLoadError(format!(
        "Chart.yaml file is missing in {}",
        dest.display()
    )))
}

/// Read the chart name from `<top>/Chart.yaml` inside an archive without
/// unpacking it.
fn archive_chart_name(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut tar = Archive::new(GzDecoder::new(file));
    let entries = tar.entries().map_err(|e| {
        ScanError::ChartLoadError(format!("failed to read {}: {}", path.display(), e))
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| {
            ScanError::ChartLoadError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let entry_path = entry.path()?.into_owned();
        let components: Vec<_> = entry_path.components().collect();
        if components.len() == 2 && entry_path.ends_with("Chart.yaml") {
            let mut data = String::new();
            entry.read_to_string(&mut data)?;
            let metadata: ChartMetadata = serde_yaml::from_str(&data).map_err(|e| {
                ScanError::ChartLoadError(format!("invalid Chart.yaml in {}: {}", path.display(), e))
            })?;
            return Ok(metadata.name);
        }
    }

    Err(ScanError::ChartLoadError(format!(
        "Chart.yaml file is missing in {}",
        path.display()
    )))
}


#[cfg(test)]
mod tests {
    use super::testing::{chart_yaml, write_chart_archive};
    use super::*;
    use tempfile::TempDir;

    fn unpack(tmp: &TempDir, files: &[(&str, &str)]) -> Chart {
        let archive = tmp.path().join("mysql-1.6.9.tgz");
        write_chart_archive(&archive, "mysql", files);
        let dest = tmp.path().join("work");
        std::fs::create_dir_all(&dest).unwrap();
        Chart::unpack(&archive, &dest).unwrap()
    }

    #[test]
    fn test_unpack_reads_metadata() {
        let tmp = TempDir::new().unwrap();
        let chart_yaml = chart_yaml("mysql", "1.6.9", "appVersion: 5.7.30\n");
        let chart = unpack(&tmp, &[("Chart.yaml", &chart_yaml), ("values.yaml", "image: mysql\n")]);
        assert_eq!(chart.metadata().name, "mysql");
        assert_eq!(chart.metadata().version, "1.6.9");
        assert_eq!(chart.metadata().app_version, "5.7.30");
        assert!(chart.dir().ends_with("work/mysql"));
        assert!(chart.dir().join("values.yaml").exists());
    }

    #[test]
    fn test_unpack_without_chart_yaml() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken.tgz");
        write_chart_archive(&archive, "broken", &[("values.yaml", "a: 1\n")]);
        let dest = tmp.path().join("work");
        std::fs::create_dir_all(&dest).unwrap();
        let err = Chart::unpack(&archive, &dest).unwrap_err();
        assert!(err.to_string().contains("Chart.yaml file is missing"));
    }

    #[test]
    fn test_application_type_installable() {
        let tmp = TempDir::new().unwrap();
        let yaml = chart_yaml("mysql", "1.6.9", "type: application\n");
        assert!(unpack(&tmp, &[("Chart.yaml", &yaml)]).ensure_installable().is_ok());
    }

    #[test]
    fn test_unset_type_installable() {
        let tmp = TempDir::new().unwrap();
        let yaml = chart_yaml("mysql", "1.6.9", "");
        assert!(unpack(&tmp, &[("Chart.yaml", &yaml)]).ensure_installable().is_ok());
    }

    #[test]
    fn test_library_type_not_installable() {
        let tmp = TempDir::new().unwrap();
        let yaml = chart_yaml("common", "1.0.0", "type: library\n");
        let err = unpack(&tmp, &[("Chart.yaml", &yaml)])
            .ensure_installable()
            .unwrap_err();
        assert_eq!(err.to_string(), "library charts are not installable");
    }

    #[test]
    fn test_dependencies_satisfied_by_archive_and_dir() {
        let tmp = TempDir::new().unwrap();
        let yaml = chart_yaml(
            "app",
            "1.0.0",
            "dependencies:\n- name: redis\n  version: 10.x\n- name: common\n  version: 1.x\n",
        );
        let chart = unpack(
            &tmp,
            &[
                ("Chart.yaml", &yaml),
                ("charts/common/Chart.yaml", "apiVersion: v2\nname: common\nversion: 1.0.0\n"),
            ],
        );
        write_chart_archive(
            &chart.charts_dir().join("redis-10.5.7.tgz"),
            "redis",
            &[("Chart.yaml", "apiVersion: v1\nname: redis\nversion: 10.5.7\n")],
        );

        assert_eq!(
            chart.subchart_names().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["common", "redis"]
        );
        assert!(chart.check_dependencies().is_ok());
    }

    #[test]
    fn test_missing_dependencies_reported() {
        let tmp = TempDir::new().unwrap();
        let yaml = chart_yaml("app", "1.0.0", "dependencies:\n- name: redis\n  version: 10.x\n");
        let err = unpack(&tmp, &[("Chart.yaml", &yaml)])
            .check_dependencies()
            .unwrap_err();
        assert!(matches!(err, ScanError::MissingDependencies(ref names) if names == &vec!["redis".to_string()]));
    }

    #[test]
    fn test_v1_requirements_yaml() {
        let tmp = TempDir::new().unwrap();
        let chart = unpack(
            &tmp,
            &[
                ("Chart.yaml", "apiVersion: v1\nname: app\nversion: 1.0.0\n"),
                (
                    "requirements.yaml",
                    "dependencies:\n- name: mariadb\n  version: 7.x.x\n  repository: https://charts.example.com\n",
                ),
            ],
        );
        assert_eq!(chart.metadata().dependencies.len(), 1);
        assert_eq!(chart.metadata().dependencies[0].name, "mariadb");
        assert!(chart.check_dependencies().is_err());
    }

    #[test]
    fn test_no_dependencies() {
        let tmp = TempDir::new().unwrap();
        let yaml = chart_yaml("mysql", "1.6.9", "");
        let chart = unpack(&tmp, &[("Chart.yaml", &yaml)]);
        assert!(chart.subchart_names().unwrap().is_empty());
        assert!(chart.check_dependencies().is_ok());
    }
}
