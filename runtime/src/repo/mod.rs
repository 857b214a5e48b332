//! Chart repository client.
//!
//! Keeps the repositories file, downloads remote `index.yaml` files into
//! the repository cache and selects chart versions from them.

mod client;
mod file;
mod index;
mod repository;

pub use client::{AddOutcome, RefreshOutcome, RefreshReport, RepoClient};
pub use file::{RepoEntry, RepoFile};
pub use index::{ChartDependency, ChartVersion, IndexFile};
pub use repository::{http_client, resolve_chart_url, ChartRepository};

pub(crate) use repository::fetch_bytes;
