//! OCI image plumbing: references, registry pulls, layouts and the local store.

pub mod layout;
pub mod reference;
pub mod registry;
pub mod store;

pub use reference::ImageReference;
pub use registry::RegistryPuller;
pub use store::{ImageStore, StoredImage};
