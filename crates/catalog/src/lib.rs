//! On-disk model catalog: record types, storage, structure-preserving
//! writes, the catalog version and the aggregate manifest.

pub mod compare;
pub mod error;
pub mod manifest;
pub mod model;
mod splice;
pub mod store;
pub mod tree;
pub mod version;
pub mod writer;

pub use compare::{CompareOptions, FieldChange, FieldValue, field_changes, tag_sets_differ};
pub use error::{CatalogError, Result};
pub use manifest::{Manifest, ManifestProvider, ManifestStats, build_manifest, read_manifest, write_manifest};
pub use model::{
    Cost, DiscoveredLimits, DiscoveredModalities, DiscoveredModel, Limits, Modalities,
    ModelRecord, ProviderDescriptor, ProviderKind, Status, UpdaterStamp, record_file_name,
};
pub use store::{CatalogLock, CatalogStore, ProviderSnapshot, write_atomic};
pub use tree::Node;
pub use version::CatalogVersion;
pub use writer::{SmartMergeWriter, WriteOutcome};
