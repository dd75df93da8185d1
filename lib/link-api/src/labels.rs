//! Label and annotation keys stamped on objects managed for an Import.
//!
//! Ownership of a local service is encoded entirely in these three labels:
//! the managed-by marker plus the owning Import's name and namespace.

/// Standard label for the tool managing an object
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY`] on objects owned by the link controller
pub const MANAGED_BY_VALUE: &str = "link-controller";

/// Name of the Import owning an object
pub const IMPORT_NAME: &str = "link.datum.net/import-name";

/// Namespace of the Import owning an object
pub const IMPORT_NAMESPACE: &str = "link.datum.net/import-namespace";

/// Label on an Import requesting merge (adopt) semantics
pub const IMPORT_MERGE: &str = "link.datum.net/merge";

/// Annotation marking a service that was adopted rather than created
pub const ADOPTED: &str = "link.datum.net/adopted";

/// Label binding an EndpointSlice to its Service
pub const SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Label naming the controller that manages an EndpointSlice
pub const ENDPOINT_SLICE_MANAGED_BY: &str = "endpointslice.kubernetes.io/managed-by";

/// Value of [`ENDPOINT_SLICE_MANAGED_BY`] on slices written by the link controller
pub const ENDPOINT_SLICE_MANAGED_BY_VALUE: &str = "link.datum.net/link-controller";
