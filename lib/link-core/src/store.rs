//! Object store seam used by the Import reconciler.
//!
//! The store is the cluster's object storage: CRUD with optimistic
//! concurrency on Imports, Services and EndpointSlices. Updates carry the
//! resource version read earlier; a concurrent modification surfaces as
//! [`CoreError::StaleWrite`](crate::CoreError::StaleWrite).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use link_api::{Import, ImportKey};

use crate::Result;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get_import(&self, key: &ImportKey) -> Result<Option<Import>>;

    async fn list_imports(&self) -> Result<Vec<Import>>;

    /// Write the status subresource of an Import
    async fn update_import_status(&self, import: &Import) -> Result<Import>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    async fn update_service(&self, service: &Service) -> Result<Service>;

    /// Delete a service; deleting a missing service is not an error
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_endpoint_slice(&self, namespace: &str, name: &str) -> Result<Option<EndpointSlice>>;

    /// List the EndpointSlices bound to a service
    async fn list_endpoint_slices(&self, namespace: &str, service: &str) -> Result<Vec<EndpointSlice>>;

    async fn create_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice>;

    async fn update_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice>;

    /// Delete an EndpointSlice; deleting a missing slice is not an error
    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<()>;
}
