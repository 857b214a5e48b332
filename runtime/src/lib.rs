//! chartscan runtime - the parts that talk to the outside world.
//!
//! Chart repositories over HTTP, release installation through a release
//! driver, and container images through the OCI engine.

#![allow(clippy::result_large_err)]

pub mod engine;
mod fs;
pub mod install;
pub mod lock;
pub mod oci;
pub mod repo;

// Re-export common types
pub use engine::{
    summarize, unquote, wait_for_image, ContainerEngine, HistoryEntry, ImageSummary, OciEngine,
    PullHandle, WaitPolicy,
};
pub use install::{HelmDriver, InstallArgs, Installer, ReleaseDriver};
pub use lock::FileLock;
pub use oci::{ImageReference, ImageStore, RegistryPuller, StoredImage};
pub use repo::{AddOutcome, RefreshOutcome, RefreshReport, RepoClient};

/// chartscan runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
