//! Container engine client.
//!
//! [`ContainerEngine`] is the seam between the scan flow and whatever holds
//! images locally. Pulls run in the background and are observed by polling
//! the image list with [`wait_for_image`].

mod oci;
mod wait;

pub use oci::OciEngine;
pub use wait::{wait_for_image, WaitPolicy};

use async_trait::async_trait;
use chartscan_core::error::{Result, ScanError};
use chartscan_core::ImageLayerSummary;
use serde::Serialize;
use tokio::task::JoinHandle;

/// A locally available image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub repo_tags: Vec<String>,
    pub digest: String,
    pub size: u64,
}

/// One step of an image's build history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub created_by: String,
    /// Layer size in bytes; zero for metadata-only steps
    pub size: u64,
    pub empty_layer: bool,
}

/// A pull running in the background.
pub struct PullHandle {
    reference: String,
    task: JoinHandle<Result<String>>,
}

impl PullHandle {
    pub fn new(reference: impl Into<String>, task: JoinHandle<Result<String>>) -> Self {
        Self {
            reference: reference.into(),
            task,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pull and return the image digest.
    pub async fn join(self) -> Result<String> {
        self.task.await.map_err(|e| {
            ScanError::EngineError(format!("pull task for {} failed: {}", self.reference, e))
        })?
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Start pulling `reference` in the background.
    async fn pull_image(&self, reference: &str) -> Result<PullHandle>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// History of a local image, oldest step first.
    async fn image_history(&self, reference: &str) -> Result<Vec<HistoryEntry>>;
}

/// Strip one layer of matching quotes from an image reference.
///
/// Double-quoted values also have `\"` and `\\` unescaped. Anything else is
/// returned as given.
pub fn unquote(reference: &str) -> String {
    let mut chars = reference.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return reference.to_string();
    };
    if first != last || !matches!(first, '"' | '\'' | '`') {
        return reference.to_string();
    }

    let inner = chars.as_str();
    if first != '"' {
        return inner.to_string();
    }

    let mut out = String::with_capacity(inner.len());
    let mut rest = inner.chars().peekable();
    while let Some(c) = rest.next() {
        match (c, rest.peek()) {
            ('\\', Some('"')) | ('\\', Some('\\')) => {
                if let Some(escaped) = rest.next() {
                    out.push(escaped);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Count layers and total their sizes.
pub fn summarize(reference: &str, history: &[HistoryEntry]) -> ImageLayerSummary {
    ImageLayerSummary {
        name: reference.to_string(),
        total_size_bytes: history.iter().map(|h| h.size).sum(),
        layer_count: history.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote_double_quotes() {
        assert_eq!(unquote("\"mysql:5.7.30\""), "mysql:5.7.30");
        assert_eq!(unquote(r#""a\"b\\c""#), r#"a"b\c"#);
    }

    #[test]
    fn test_unquote_single_and_backtick() {
        assert_eq!(unquote("'busybox:1.31.1'"), "busybox:1.31.1");
        assert_eq!(unquote("`busybox`"), "busybox");
    }

    #[test]
    fn test_unquote_leaves_other_input() {
        assert_eq!(unquote("mysql:5.7.30"), "mysql:5.7.30");
        assert_eq!(unquote("\"mysql"), "\"mysql");
        assert_eq!(unquote("\"mysql'"), "\"mysql'");
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote(""), "");
        assert_eq!(unquote("\"\""), "");
    }

    #[test]
    fn test_summarize() {
        let history = vec![
            HistoryEntry {
                created_by: "ADD rootfs".to_string(),
                size: 1_048_576,
                empty_layer: false,
            },
            HistoryEntry {
                created_by: "CMD [\"mysqld\"]".to_string(),
                size: 0,
                empty_layer: true,
            },
            HistoryEntry {
                created_by: "RUN apt-get install".to_string(),
                size: 524_288,
                empty_layer: false,
            },
        ];
        let summary = summarize("mysql:5.7.30", &history);
        assert_eq!(summary.name, "mysql:5.7.30");
        assert_eq!(summary.layer_count, 3);
        assert_eq!(summary.total_size_bytes, 1_572_864);
    }

    #[test]
    fn test_summarize_empty_history() {
        let summary = summarize("busybox", &[]);
        assert_eq!(summary.layer_count, 0);
        assert_eq!(summary.total_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_pull_handle_join() {
        let handle = PullHandle::new("busybox", tokio::spawn(async { Ok("sha256:abc".to_string()) }));
        assert_eq!(handle.reference(), "busybox");
        assert_eq!(handle.join().await.unwrap(), "sha256:abc");
    }

    #[tokio::test]
    async fn test_pull_handle_aborted() {
        let handle = PullHandle::new(
            "busybox",
            tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(String::new())
            }),
        );
        handle.abort();
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("pull task for busybox failed"));
    }
}
