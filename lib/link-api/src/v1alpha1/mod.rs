/// API version v1alpha1 for Datum Link CRDs

pub mod import;

pub use import::{Import, ImportSource, ImportSpec, ImportStatus};

/// API group for Datum Link resources
pub const API_GROUP: &str = "link.datum.net";
/// API version for Datum Link resources
pub const API_VERSION: &str = "v1alpha1";
