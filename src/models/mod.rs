//! Local model management: catalog, registry of downloaded files, and the hub they come from

pub mod catalog;
pub mod hub;
pub mod registry;

pub use catalog::CatalogEntry;
pub use hub::{format_bytes, HfHub, ModelHub};
pub use registry::{ModelInfo, ModelRegistry, RegistryOptions, StorageStats};
