//! In-memory object store.
//!
//! Mirrors the API server's optimistic concurrency: every write bumps a
//! global resource version and updates must present the version they read.
//! Direct `put_*`/`remove_*` calls act as external actors (users, other
//! controllers) and are not counted as writes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::Resource;
use link_api::{labels, Import, ImportKey};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::store::ObjectStore;
use crate::{CoreError, Result};

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    writes: AtomicUsize,
    injected_failures: AtomicUsize,
    vanishing_updates: AtomicUsize,
}

#[derive(Default)]
struct State {
    version: u64,
    imports: Table<Import>,
    services: Table<Service>,
    slices: Table<EndpointSlice>,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

struct Table<T> {
    kind: &'static str,
    objects: BTreeMap<(String, String), T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            kind: std::any::type_name::<T>().rsplit("::").next().unwrap_or("object"),
            objects: BTreeMap::new(),
        }
    }
}

fn object_key<T: Resource>(obj: &T) -> (String, String) {
    let meta = obj.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

impl<T: Resource + Clone> Table<T> {
    fn describe(&self, key: &(String, String)) -> String {
        format!("{} {}/{}", self.kind, key.0, key.1)
    }

    fn get(&self, namespace: &str, name: &str) -> Option<T> {
        self.objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn create(&mut self, obj: &T, version: u64) -> Result<T> {
        let key = object_key(obj);
        if self.objects.contains_key(&key) {
            return Err(CoreError::AlreadyExists(self.describe(&key)));
        }
        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = Some(format!("uid-{}", version));
        self.objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn check_version(&self, obj: &T) -> Result<&T> {
        let key = object_key(obj);
        let existing = self
            .objects
            .get(&key)
            .ok_or_else(|| CoreError::NotFound(self.describe(&key)))?;
        if let Some(version) = &obj.meta().resource_version {
            if existing.meta().resource_version.as_ref() != Some(version) {
                return Err(CoreError::StaleWrite(self.describe(&key)));
            }
        }
        Ok(existing)
    }

    fn update(&mut self, obj: &T, version: u64) -> Result<T> {
        let uid = self.check_version(obj)?.meta().uid.clone();
        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = uid;
        self.objects.insert(object_key(obj), stored.clone());
        Ok(stored)
    }

    fn remove(&mut self, namespace: &str, name: &str) -> Option<T> {
        self.objects.remove(&(namespace.to_string(), name.to_string()))
    }

    /// Unconditional create-or-replace; a new object gets a fresh uid
    fn put(&mut self, obj: T, version: u64) -> T {
        let key = object_key(&obj);
        let uid = self
            .objects
            .get(&key)
            .and_then(|existing| existing.meta().uid.clone())
            .unwrap_or_else(|| format!("uid-{}", version));
        let mut stored = obj;
        let meta = stored.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = Some(uid);
        self.objects.insert(key, stored.clone());
        stored
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes performed through [`ObjectStore`]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail the next `count` writes with a stale-write error
    pub fn inject_stale_writes(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Delete the target of the next `count` service or slice updates just
    /// before they apply, as a concurrent actor would
    pub fn inject_vanishing_updates(&self, count: usize) {
        self.vanishing_updates.store(count, Ordering::SeqCst);
    }

    fn vanishes(&self) -> bool {
        self.vanishing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn begin_write(&self, what: &str) -> Result<()> {
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(CoreError::StaleWrite(what.to_string()));
        }
        Ok(())
    }

    fn committed<T>(&self, value: T) -> Result<T> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    pub async fn put_import(&self, import: Import) -> Import {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.imports.put(import, version)
    }

    pub async fn remove_import(&self, key: &ImportKey) -> Option<Import> {
        self.state
            .write()
            .await
            .imports
            .remove(&key.namespace, &key.name)
    }

    pub async fn put_service(&self, service: Service) -> Service {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.services.put(service, version)
    }

    pub async fn remove_service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state.write().await.services.remove(namespace, name)
    }

    pub async fn put_endpoint_slice(&self, slice: EndpointSlice) -> EndpointSlice {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.slices.put(slice, version)
    }

    pub async fn remove_endpoint_slice(&self, namespace: &str, name: &str) -> Option<EndpointSlice> {
        self.state.write().await.slices.remove(namespace, name)
    }

    pub async fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state.read().await.services.get(namespace, name)
    }

    pub async fn endpoint_slice(&self, namespace: &str, name: &str) -> Option<EndpointSlice> {
        self.state.read().await.slices.get(namespace, name)
    }

    pub async fn import(&self, key: &ImportKey) -> Option<Import> {
        self.state.read().await.imports.get(&key.namespace, &key.name)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_import(&self, key: &ImportKey) -> Result<Option<Import>> {
        Ok(self.import(key).await)
    }

    async fn list_imports(&self) -> Result<Vec<Import>> {
        Ok(self.state.read().await.imports.objects.values().cloned().collect())
    }

    async fn update_import_status(&self, import: &Import) -> Result<Import> {
        self.begin_write("import status")?;
        let mut state = self.state.write().await;
        let mut stored = state.imports.check_version(import)?.clone();
        stored.status = import.status.clone();
        stored.meta_mut().resource_version = None;
        let version = state.next_version();
        let updated = state.imports.update(&stored, version)?;
        self.committed(updated)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.service(namespace, name).await)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        self.begin_write("service create")?;
        let mut state = self.state.write().await;
        let version = state.next_version();
        let created = state.services.create(service, version)?;
        self.committed(created)
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        self.begin_write("service update")?;
        let mut state = self.state.write().await;
        if self.vanishes() {
            let (namespace, name) = object_key(service);
            state.services.remove(&namespace, &name);
        }
        let version = state.next_version();
        let updated = state.services.update(service, version)?;
        self.committed(updated)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin_write("service delete")?;
        if self.remove_service(namespace, name).await.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get_endpoint_slice(&self, namespace: &str, name: &str) -> Result<Option<EndpointSlice>> {
        Ok(self.endpoint_slice(namespace, name).await)
    }

    async fn list_endpoint_slices(&self, namespace: &str, service: &str) -> Result<Vec<EndpointSlice>> {
        let state = self.state.read().await;
        Ok(state
            .slices
            .objects
            .iter()
            .filter(|((ns, _), slice)| {
                ns == namespace
                    && slice
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(labels::SERVICE_NAME))
                        .is_some_and(|s| s == service)
            })
            .map(|(_, slice)| slice.clone())
            .collect())
    }

    async fn create_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice> {
        self.begin_write("endpoint slice create")?;
        let mut state = self.state.write().await;
        let version = state.next_version();
        let created = state.slices.create(slice, version)?;
        self.committed(created)
    }

    async fn update_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice> {
        self.begin_write("endpoint slice update")?;
        let mut state = self.state.write().await;
        if self.vanishes() {
            let (namespace, name) = object_key(slice);
            state.slices.remove(&namespace, &name);
        }
        let version = state.next_version();
        let updated = state.slices.update(slice, version)?;
        self.committed(updated)
    }

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin_write("endpoint slice delete")?;
        if self.remove_endpoint_slice(namespace, name).await.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
