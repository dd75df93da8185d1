//! Object store backed by the Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource};
use link_api::{labels, Import, ImportKey};
use link_core::{CoreError, ObjectStore, Result};

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn imports(&self, namespace: &str) -> Api<Import> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn slices(&self, namespace: &str) -> Api<EndpointSlice> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn describe<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    let meta = obj.meta();
    format!(
        "{} {}/{}",
        K::kind(&()),
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    )
}

fn name_of<K: Resource>(obj: &K) -> Result<&str> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| CoreError::Internal("object has no name".to_string()))
}

fn namespace_of<K: Resource>(obj: &K) -> Result<&str> {
    obj.meta()
        .namespace
        .as_deref()
        .ok_or_else(|| CoreError::Internal("object has no namespace".to_string()))
}

/// Translate optimistic-concurrency failures into store errors
fn write_error(err: kube::Error, what: String) -> CoreError {
    match &err {
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            CoreError::AlreadyExists(what)
        }
        kube::Error::Api(response) if response.code == 409 => CoreError::StaleWrite(what),
        kube::Error::Api(response) if response.code == 404 => CoreError::NotFound(what),
        _ => CoreError::KubernetesError(err),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_import(&self, key: &ImportKey) -> Result<Option<Import>> {
        Ok(self.imports(&key.namespace).get_opt(&key.name).await?)
    }

    async fn list_imports(&self) -> Result<Vec<Import>> {
        let imports: Api<Import> = Api::all(self.client.clone());
        Ok(imports.list(&ListParams::default()).await?.items)
    }

    async fn update_import_status(&self, import: &Import) -> Result<Import> {
        let data = serde_json::to_vec(import)?;
        self.imports(namespace_of(import)?)
            .replace_status(name_of(import)?, &PostParams::default(), data)
            .await
            .map_err(|e| write_error(e, describe(import)))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.services(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        self.services(namespace_of(service)?)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| write_error(e, describe(service)))
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        self.services(namespace_of(service)?)
            .replace(name_of(service)?, &PostParams::default(), service)
            .await
            .map_err(|e| write_error(e, describe(service)))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        match self.services(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(write_error(e, format!("Service {}/{}", namespace, name))),
        }
    }

    async fn get_endpoint_slice(&self, namespace: &str, name: &str) -> Result<Option<EndpointSlice>> {
        Ok(self.slices(namespace).get_opt(name).await?)
    }

    async fn list_endpoint_slices(&self, namespace: &str, service: &str) -> Result<Vec<EndpointSlice>> {
        let params = ListParams::default().labels(&format!("{}={}", labels::SERVICE_NAME, service));
        Ok(self.slices(namespace).list(&params).await?.items)
    }

    async fn create_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice> {
        self.slices(namespace_of(slice)?)
            .create(&PostParams::default(), slice)
            .await
            .map_err(|e| write_error(e, describe(slice)))
    }

    async fn update_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice> {
        self.slices(namespace_of(slice)?)
            .replace(name_of(slice)?, &PostParams::default(), slice)
            .await
            .map_err(|e| write_error(e, describe(slice)))
    }

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<()> {
        match self.slices(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(write_error(e, format!("EndpointSlice {}/{}", namespace, name))),
        }
    }
}
