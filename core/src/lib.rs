//! chartscan core - foundational types shared by the runtime and the CLI.
//!
//! This crate holds the pieces that do not talk to the network:
//! the explicit settings value, the error type, the manifest image
//! extractor and the `--set` expression parser.

pub mod config;
pub mod error;
pub mod manifest;
pub mod strvals;

// Re-export commonly used types
pub use config::{EngineConfig, Settings};
pub use error::{Result, ScanError};
pub use manifest::{extract_images, ImageLayerSummary};

/// chartscan version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
