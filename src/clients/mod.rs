pub mod addon;
pub mod debrid;
pub mod metadata;

pub use addon::{AddonClient, Manifest, ManifestCatalog, expand_presets};
pub use debrid::{DebridError, DebridErrorKind, DebridService};
pub use metadata::MetadataClient;
