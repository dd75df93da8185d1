//! Import reconciliation.
//!
//! Each pass drives an Import through
//! `Pending -> PortReserved -> {ServiceCreated | ServiceAdopted | ServiceConflict} -> {Valid | Invalid}`
//! and records the result in the `TargetPortValid` and `ServiceValid`
//! conditions. A pass only writes what differs from the observed state, so
//! re-running it without new information is a no-op.
//!
//! Imports in the system namespace get a single ClusterIP service carrying
//! the endpoints. Exclusive Imports elsewhere get a system service in the
//! system namespace plus an `ExternalName` service in their own namespace.
//! Merge Imports adopt an existing service in their own namespace and attach
//! endpoints to it directly.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use link_api::conditions::{self, reasons, SERVICE_VALID, TARGET_PORT_VALID};
use link_api::{naming, Import, ImportKey, ImportStatus};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::endpoints::{self, DataplaneSnapshot};
use crate::metrics::ReconcileMetrics;
use crate::ownership::{self, Ownership};
use crate::ports::{PortRange, PortReservations, Reservation};
use crate::queue::ReconcileTicket;
use crate::retry::RetryPolicy;
use crate::store::ObjectStore;
use crate::triggers;
use crate::{CoreError, Result};

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Namespace holding the dataplane and system services
    pub system_namespace: String,
    /// Name of the dataplane's registration service
    pub dataplane_service: String,
    /// Range target ports are allocated from
    pub port_range: PortRange,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            system_namespace: "link-system".to_string(),
            dataplane_service: "link-dataplane".to_string(),
            port_range: PortRange::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Valid,
    Invalid { reason: &'static str },
    /// The Import is gone and its objects were released
    Deleted,
    /// A newer event arrived; the pass stopped before completing
    Superseded,
    /// The pass failed and the failure was recorded on the Import
    Failed { reason: &'static str },
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Valid => "valid",
            ReconcileOutcome::Invalid { .. } => "invalid",
            ReconcileOutcome::Deleted => "deleted",
            ReconcileOutcome::Superseded => "superseded",
            ReconcileOutcome::Failed { .. } => "failed",
        }
    }
}

/// A service the Import needs
struct Target {
    namespace: String,
    name: String,
    /// Service to create when absent; `None` for merge imports
    desired: Option<Service>,
    carries_endpoints: bool,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

enum ServiceState {
    Ready(Service),
    Invalid(ReconcileOutcome),
}

pub struct Reconciler<S> {
    store: Arc<S>,
    ports: Arc<PortReservations>,
    config: ReconcilerConfig,
    metrics: ReconcileMetrics,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        ports: Arc<PortReservations>,
        config: ReconcilerConfig,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            store,
            ports,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn ports(&self) -> &Arc<PortReservations> {
        &self.ports
    }

    /// Rebuild port reservations from the Imports currently in the store
    pub async fn restore(&self) -> Result<usize> {
        let imports = self.store.list_imports().await?;
        self.ports.rebuild(&imports, &self.config.port_range);
        info!("Restored port reservations from {} imports", imports.len());
        Ok(imports.len())
    }

    /// Imports among `imports` waiting on a port freed since the last call.
    ///
    /// Called after a pass completes, so a waiter is only woken once the
    /// port it wants is actually free.
    pub fn take_port_waiters<'a>(&self, imports: impl IntoIterator<Item = &'a Import>) -> Vec<ImportKey> {
        let freed = self.ports.take_freed();
        if freed.is_empty() {
            return Vec::new();
        }
        let imports: Vec<&Import> = imports.into_iter().collect();
        let mut waiters = BTreeSet::new();
        for namespace in &freed {
            waiters.extend(triggers::imports_waiting_for_port(namespace, imports.iter().copied()));
        }
        waiters.into_iter().collect()
    }

    /// Reconcile `key`, retrying transient failures with backoff.
    ///
    /// Failures never escape: once retries are exhausted, or on a
    /// non-transient error, the Import is marked invalid with the reason.
    pub async fn reconcile_with_retry(&self, key: &ImportKey, ticket: &ReconcileTicket) -> ReconcileOutcome {
        let timer = self.metrics.reconcile_duration_seconds.start_timer();
        let mut retries = 0;

        let outcome = loop {
            match self.reconcile(key, ticket).await {
                Ok(outcome) => break outcome,
                Err(CoreError::Superseded) => break ReconcileOutcome::Superseded,
                Err(e) if e.is_transient() && retries < self.config.retry.max_retries => {
                    let delay = self.config.retry.jittered_backoff(retries);
                    retries += 1;
                    self.metrics.reconcile_retries_total.inc();
                    warn!(
                        import = %key,
                        attempt = retries,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Reconciliation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    if ticket.is_superseded() {
                        break ReconcileOutcome::Superseded;
                    }
                }
                Err(_) if ticket.is_superseded() => break ReconcileOutcome::Superseded,
                Err(e) => {
                    let reason = if e.is_transient() {
                        reasons::RETRY_EXHAUSTED
                    } else {
                        reasons::RECONCILE_FAILED
                    };
                    error!(import = %key, retries, error = %e, "Reconciliation failed");
                    self.mark_failed(key, reason, &e).await;
                    break ReconcileOutcome::Failed { reason };
                }
            }
        };

        timer.observe_duration();
        self.metrics.record(outcome.label());
        outcome
    }

    /// Run one reconciliation pass for `key`
    pub async fn reconcile(&self, key: &ImportKey, ticket: &ReconcileTicket) -> Result<ReconcileOutcome> {
        debug!(import = %key, "Reconciling import");

        let import = match self.store.get_import(key).await? {
            Some(import) if import.metadata.deletion_timestamp.is_none() => import,
            _ => return self.finalize(key, ticket).await,
        };

        let observed = import.status.clone().unwrap_or_default();
        let mut status = observed.clone();
        let outcome = self.evaluate(&import, &mut status, ticket).await?;

        if status != observed {
            checkpoint(ticket)?;
            let mut updated = import;
            updated.status = Some(status);
            self.store.update_import_status(&updated).await?;
            debug!(import = %key, ?outcome, "Updated import status");
        }

        Ok(outcome)
    }

    async fn evaluate(
        &self,
        import: &Import,
        status: &mut ImportStatus,
        ticket: &ReconcileTicket,
    ) -> Result<ReconcileOutcome> {
        let key = import.key();
        let merge = import.is_merge();

        if !naming::is_valid_service_name(&key.name) {
            self.ports.release(&key.namespace, &key.name);
            status.target_port = None;
            let message = format!("import name {:?} is not a valid service name", key.name);
            conditions::set(
                &mut status.conditions,
                TARGET_PORT_VALID,
                false,
                reasons::INVALID_NAME,
                message.clone(),
            );
            conditions::set(&mut status.conditions, SERVICE_VALID, false, reasons::INVALID_NAME, message);
            return Ok(ReconcileOutcome::Invalid {
                reason: reasons::INVALID_NAME,
            });
        }

        let port = match self.reserve_port(import) {
            Reservation::Reserved { port, previous } => {
                if let Some(previous) = previous {
                    info!(import = %key, port, previous, "Target port changed");
                }
                status.target_port = Some(port);
                conditions::set(
                    &mut status.conditions,
                    TARGET_PORT_VALID,
                    true,
                    reasons::PORT_RESERVED,
                    format!("target port {} is reserved", port),
                );
                port
            }
            Reservation::Conflict { port, owner } => {
                info!(import = %key, port, holder = %owner, "Target port conflict");
                let message = format!(
                    "target port {} is claimed by import {}/{}",
                    port, key.namespace, owner
                );
                return self
                    .port_invalid(&key, status, reasons::PORT_CONFLICT, message, ticket)
                    .await;
            }
            Reservation::Exhausted => {
                let message = format!("no free target port in {}", self.config.port_range);
                return self
                    .port_invalid(&key, status, reasons::PORT_EXHAUSTED, message, ticket)
                    .await;
            }
        };

        let targets = self.plan(import, merge, port);
        let mut services = Vec::with_capacity(targets.len());
        for target in &targets {
            match self.ensure_service(&key, merge, target, status, ticket).await? {
                ServiceState::Ready(service) => services.push(service),
                ServiceState::Invalid(outcome) => return Ok(outcome),
            }
        }

        let snapshot = self.dataplane_snapshot().await?;
        let addresses = endpoints::sync(&import.spec.sources, &snapshot);
        for (target, service) in targets.iter().zip(&services) {
            if !target.carries_endpoints {
                self.remove_slice(&key, &target.namespace, &target.name, ticket)
                    .await?;
                continue;
            }
            let port_name = service_port_name(service, import.spec.port);
            let desired = endpoints::desired_slice(
                &key,
                &target.namespace,
                &target.name,
                port_name,
                port,
                &snapshot.address_type,
                &addresses,
            );
            if let Some(outcome) = self.ensure_slice(&key, desired, status, ticket).await? {
                return Ok(outcome);
            }
        }

        self.retire_unplanned(&key, &targets, ticket).await?;

        conditions::set(
            &mut status.conditions,
            SERVICE_VALID,
            true,
            reasons::SERVICE_READY,
            format!("service {}/{} is ready", key.namespace, key.name),
        );
        Ok(ReconcileOutcome::Valid)
    }

    fn reserve_port(&self, import: &Import) -> Reservation {
        let key = import.key();
        match import.spec.target_port {
            Some(port) => self.ports.reserve(&key.namespace, port, &key.name),
            None => self.ports.allocate(
                &key.namespace,
                &key.name,
                &self.config.port_range,
                &key.to_string(),
            ),
        }
    }

    /// Record a port failure: the Import loses any port it held and its
    /// endpoints are detached
    async fn port_invalid(
        &self,
        key: &ImportKey,
        status: &mut ImportStatus,
        reason: &'static str,
        message: String,
        ticket: &ReconcileTicket,
    ) -> Result<ReconcileOutcome> {
        self.ports.release(&key.namespace, &key.name);
        status.target_port = None;
        conditions::set(&mut status.conditions, TARGET_PORT_VALID, false, reason, message);
        conditions::set(
            &mut status.conditions,
            SERVICE_VALID,
            false,
            reasons::TARGET_PORT_INVALID,
            "target port is not valid",
        );
        for (namespace, name) in self.candidate_services(key) {
            self.remove_slice(key, &namespace, &name, ticket).await?;
        }
        Ok(ReconcileOutcome::Invalid { reason })
    }

    /// Services needed by `import`, endpoint carriers first
    fn plan(&self, import: &Import, merge: bool, target_port: u16) -> Vec<Target> {
        let key = import.key();

        if merge {
            return vec![Target {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                desired: None,
                carries_endpoints: true,
            }];
        }

        let ports = vec![ServicePort {
            port: i32::from(import.spec.port),
            target_port: Some(IntOrString::Int(i32::from(target_port))),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }];
        let service = |namespace: &str, name: &str, spec: ServiceSpec| Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(ownership::ownership_labels(&key)),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        };
        let cluster_ip = ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(ports.clone()),
            ..Default::default()
        };

        let system_namespace = &self.config.system_namespace;
        if key.namespace == *system_namespace {
            return vec![Target {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                desired: Some(service(&key.namespace, &key.name, cluster_ip)),
                carries_endpoints: true,
            }];
        }

        let system_name = naming::system_service_name(&key);
        let external_name = ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(naming::service_fqdn(system_namespace, &system_name)),
            ports: Some(ports),
            ..Default::default()
        };
        vec![
            Target {
                namespace: system_namespace.clone(),
                name: system_name.clone(),
                desired: Some(service(system_namespace, &system_name, cluster_ip)),
                carries_endpoints: true,
            },
            Target {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                desired: Some(service(&key.namespace, &key.name, external_name)),
                carries_endpoints: false,
            },
        ]
    }

    /// Every service an Import with this identity may own
    fn candidate_services(&self, key: &ImportKey) -> Vec<(String, String)> {
        let mut candidates = vec![(key.namespace.clone(), key.name.clone())];
        if key.namespace != self.config.system_namespace {
            candidates.push((
                self.config.system_namespace.clone(),
                naming::system_service_name(key),
            ));
        }
        candidates
    }

    async fn ensure_service(
        &self,
        key: &ImportKey,
        merge: bool,
        target: &Target,
        status: &mut ImportStatus,
        ticket: &ReconcileTicket,
    ) -> Result<ServiceState> {
        let existing = self.store.get_service(&target.namespace, &target.name).await?;
        let ownership = ownership::classify(existing.as_ref().map(|s| &s.metadata), key, merge);

        match (ownership, existing) {
            (Ownership::Absent, _) => match &target.desired {
                Some(desired) => {
                    checkpoint(ticket)?;
                    let created = self.store.create_service(desired).await?;
                    info!(import = %key, service = %target, "Created service");
                    Ok(ServiceState::Ready(created))
                }
                None => {
                    conditions::set(
                        &mut status.conditions,
                        SERVICE_VALID,
                        false,
                        reasons::SERVICE_NOT_FOUND,
                        format!("merge import requires existing service {}", target),
                    );
                    Ok(ServiceState::Invalid(ReconcileOutcome::Invalid {
                        reason: reasons::SERVICE_NOT_FOUND,
                    }))
                }
            },
            (Ownership::ForeignConflict { holder }, existing) => {
                if let Some(service) = existing {
                    if !merge
                        && ownership::is_adopted(&service.metadata)
                        && ownership::is_labeled_for(&service.metadata, key)
                    {
                        self.release_adoption(key, service, ticket).await?;
                    }
                }
                info!(import = %key, service = %target, %holder, "Service conflict");
                conditions::set(
                    &mut status.conditions,
                    SERVICE_VALID,
                    false,
                    reasons::SERVICE_CONFLICT,
                    format!("service {} is owned by {}", target, holder),
                );
                Ok(ServiceState::Invalid(ReconcileOutcome::Invalid {
                    reason: reasons::SERVICE_CONFLICT,
                }))
            }
            (Ownership::AdoptablyForeign, Some(mut service)) => {
                ownership::stamp(&mut service.metadata, key);
                checkpoint(ticket)?;
                let adopted = self.store.update_service(&service).await?;
                info!(import = %key, service = %target, "Adopted service");
                Ok(ServiceState::Ready(adopted))
            }
            (Ownership::OwnedByThis { adopted }, Some(mut service)) => {
                match &target.desired {
                    Some(desired) if !adopted && service_differs(&service, desired) => {
                        apply_desired(&mut service, desired);
                        checkpoint(ticket)?;
                        let updated = self.store.update_service(&service).await?;
                        info!(import = %key, service = %target, "Updated service");
                        Ok(ServiceState::Ready(updated))
                    }
                    _ => Ok(ServiceState::Ready(service)),
                }
            }
            (ownership, None) => Err(CoreError::Internal(format!(
                "classified missing service {} as {:?}",
                target, ownership
            ))),
        }
    }

    /// Hand an adopted service back to its creator
    async fn release_adoption(&self, key: &ImportKey, mut service: Service, ticket: &ReconcileTicket) -> Result<()> {
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        let name = service.metadata.name.clone().unwrap_or_default();
        self.remove_slice(key, &namespace, &name, ticket).await?;

        ownership::strip(&mut service.metadata);
        checkpoint(ticket)?;
        self.store.update_service(&service).await?;
        info!(import = %key, service = %format!("{}/{}", namespace, name), "Released adopted service");
        Ok(())
    }

    async fn ensure_slice(
        &self,
        key: &ImportKey,
        desired: EndpointSlice,
        status: &mut ImportStatus,
        ticket: &ReconcileTicket,
    ) -> Result<Option<ReconcileOutcome>> {
        let namespace = desired.metadata.namespace.clone().unwrap_or_default();
        let name = desired.metadata.name.clone().unwrap_or_default();

        match self.store.get_endpoint_slice(&namespace, &name).await? {
            None => {
                checkpoint(ticket)?;
                self.store.create_endpoint_slice(&desired).await?;
                info!(
                    import = %key,
                    slice = %format!("{}/{}", namespace, name),
                    endpoints = desired.endpoints.len(),
                    "Created endpoint slice"
                );
            }
            Some(existing) if !ownership::is_labeled_for(&existing.metadata, key) => {
                conditions::set(
                    &mut status.conditions,
                    SERVICE_VALID,
                    false,
                    reasons::SERVICE_CONFLICT,
                    format!("endpoint slice {}/{} is not managed by this import", namespace, name),
                );
                return Ok(Some(ReconcileOutcome::Invalid {
                    reason: reasons::SERVICE_CONFLICT,
                }));
            }
            Some(existing) => {
                if !endpoints::slice_matches(&existing, &desired) {
                    let mut updated = desired;
                    updated.metadata.resource_version = existing.metadata.resource_version.clone();
                    checkpoint(ticket)?;
                    self.store.update_endpoint_slice(&updated).await?;
                    info!(
                        import = %key,
                        slice = %format!("{}/{}", namespace, name),
                        endpoints = updated.endpoints.len(),
                        "Updated endpoint slice"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Delete the endpoint slice this Import wrote for a service, if any
    async fn remove_slice(&self, key: &ImportKey, namespace: &str, service: &str, ticket: &ReconcileTicket) -> Result<()> {
        let name = naming::endpoint_slice_name(service);
        if let Some(existing) = self.store.get_endpoint_slice(namespace, &name).await? {
            if ownership::is_labeled_for(&existing.metadata, key) {
                checkpoint(ticket)?;
                self.store.delete_endpoint_slice(namespace, &name).await?;
                debug!(import = %key, slice = %format!("{}/{}", namespace, name), "Deleted endpoint slice");
            }
        }
        Ok(())
    }

    /// Release a service owned by `key`: delete it if created here, strip
    /// ownership if adopted
    async fn release_service(&self, key: &ImportKey, namespace: &str, name: &str, ticket: &ReconcileTicket) -> Result<()> {
        self.remove_slice(key, namespace, name, ticket).await?;

        let Some(service) = self.store.get_service(namespace, name).await? else {
            return Ok(());
        };
        if !ownership::is_labeled_for(&service.metadata, key) {
            return Ok(());
        }

        if ownership::is_adopted(&service.metadata) {
            self.release_adoption(key, service, ticket).await
        } else {
            checkpoint(ticket)?;
            self.store.delete_service(namespace, name).await?;
            info!(import = %key, service = %format!("{}/{}", namespace, name), "Deleted service");
            Ok(())
        }
    }

    /// Release services the current plan no longer needs
    async fn retire_unplanned(&self, key: &ImportKey, targets: &[Target], ticket: &ReconcileTicket) -> Result<()> {
        let planned: BTreeSet<(&str, &str)> = targets
            .iter()
            .map(|t| (t.namespace.as_str(), t.name.as_str()))
            .collect();
        for (namespace, name) in self.candidate_services(key) {
            if !planned.contains(&(namespace.as_str(), name.as_str())) {
                self.release_service(key, &namespace, &name, ticket).await?;
            }
        }
        Ok(())
    }

    /// Release everything held by a deleted Import
    async fn finalize(&self, key: &ImportKey, ticket: &ReconcileTicket) -> Result<ReconcileOutcome> {
        if let Some(port) = self.ports.release(&key.namespace, &key.name) {
            info!(import = %key, port, "Import deleted, released target port");
        }
        for (namespace, name) in self.candidate_services(key) {
            self.release_service(key, &namespace, &name, ticket).await?;
        }
        Ok(ReconcileOutcome::Deleted)
    }

    async fn dataplane_snapshot(&self) -> Result<DataplaneSnapshot> {
        let namespace = &self.config.system_namespace;
        let name = &self.config.dataplane_service;
        let Some(service) = self.store.get_service(namespace, name).await? else {
            debug!("Dataplane service {}/{} not found", namespace, name);
            return Ok(DataplaneSnapshot::empty());
        };
        let slices = self.store.list_endpoint_slices(namespace, name).await?;
        Ok(DataplaneSnapshot::from_slices(service.metadata.uid.clone(), &slices))
    }

    /// Best-effort write of a terminal failure onto the Import's status
    async fn mark_failed(&self, key: &ImportKey, reason: &str, cause: &CoreError) {
        let mut import = match self.store.get_import(key).await {
            Ok(Some(import)) => import,
            Ok(None) => return,
            Err(e) => {
                warn!(import = %key, error = %e, "Failed to fetch import to record failure");
                return;
            }
        };

        let mut status = import.status.clone().unwrap_or_default();
        if conditions::set(&mut status.conditions, SERVICE_VALID, false, reason, cause.to_string()) {
            import.status = Some(status);
            if let Err(e) = self.store.update_import_status(&import).await {
                warn!(import = %key, error = %e, "Failed to record reconciliation failure");
            }
        }
    }
}

fn checkpoint(ticket: &ReconcileTicket) -> Result<()> {
    if ticket.is_superseded() {
        return Err(CoreError::Superseded);
    }
    Ok(())
}

/// Name of the service port the Import's traffic arrives on
fn service_port_name(service: &Service, port: u16) -> Option<String> {
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    ports
        .iter()
        .find(|p| p.port == i32::from(port))
        .or_else(|| ports.first())
        .and_then(|p| p.name.clone())
        .filter(|name| !name.is_empty())
}

type PortShape = (i32, Option<IntOrString>, String);

fn service_shape(service: &Service) -> (String, Option<String>, bool, Vec<PortShape>) {
    let spec = service.spec.clone().unwrap_or_default();
    let ports = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| (p.port, p.target_port, p.protocol.unwrap_or_else(|| "TCP".to_string())))
        .collect();
    (
        spec.type_.unwrap_or_else(|| "ClusterIP".to_string()),
        spec.external_name,
        spec.selector.is_some_and(|s| !s.is_empty()),
        ports,
    )
}

fn service_differs(existing: &Service, desired: &Service) -> bool {
    service_shape(existing) != service_shape(desired)
}

fn apply_desired(existing: &mut Service, desired: &Service) {
    let want = desired.spec.clone().unwrap_or_default();
    let spec = existing.spec.get_or_insert_with(Default::default);
    if spec.type_ != want.type_ {
        spec.cluster_ip = None;
        spec.cluster_ips = None;
    }
    spec.type_ = want.type_;
    spec.external_name = want.external_name;
    spec.selector = None;
    spec.ports = want.ports;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::queue::WorkQueue;
    use k8s_openapi::api::discovery::v1::Endpoint as SliceEndpoint;
    use link_api::{labels, Condition, ImportSource, ImportSpec};
    use prometheus::Registry;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const SYSTEM: &str = "link-system";
    const DATAPLANE: &str = "link-dataplane";

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            system_namespace: SYSTEM.to_string(),
            dataplane_service: DATAPLANE.to_string(),
            port_range: PortRange::default(),
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
        }
    }

    fn reconciler(store: &Arc<MemoryStore>) -> Reconciler<MemoryStore> {
        Reconciler::new(
            store.clone(),
            Arc::new(PortReservations::new()),
            config(),
            ReconcileMetrics::new(&Registry::new()).unwrap(),
        )
    }

    fn import(namespace: &str, name: &str, target_port: Option<u16>, sources: usize) -> Import {
        let mut imp = Import::new(
            name,
            ImportSpec {
                port: 80,
                target_port,
                merge: false,
                sources: (0..sources)
                    .map(|i| ImportSource {
                        peer: format!("peer-{}", i),
                        export_name: "echo".to_string(),
                        export_namespace: "default".to_string(),
                    })
                    .collect(),
            },
        );
        imp.metadata.namespace = Some(namespace.to_string());
        imp
    }

    fn plain_service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn put_dataplane(store: &MemoryStore, ips: &[&str]) {
        store.put_service(plain_service(SYSTEM, DATAPLANE)).await;
        store
            .put_endpoint_slice(EndpointSlice {
                metadata: ObjectMeta {
                    name: Some(format!("{}-abcde", DATAPLANE)),
                    namespace: Some(SYSTEM.to_string()),
                    labels: Some(BTreeMap::from([(
                        labels::SERVICE_NAME.to_string(),
                        DATAPLANE.to_string(),
                    )])),
                    ..Default::default()
                },
                address_type: "IPv4".to_string(),
                endpoints: ips
                    .iter()
                    .map(|ip| SliceEndpoint {
                        addresses: vec![ip.to_string()],
                        ..Default::default()
                    })
                    .collect(),
                ports: None,
            })
            .await;
    }

    async fn run(reconciler: &Reconciler<MemoryStore>, key: &ImportKey) -> ReconcileOutcome {
        reconciler
            .reconcile_with_retry(key, &ReconcileTicket::detached())
            .await
    }

    async fn condition(store: &MemoryStore, key: &ImportKey, condition_type: &str) -> Option<Condition> {
        store
            .import(key)
            .await
            .and_then(|imp| conditions::find(imp.conditions(), condition_type).cloned())
    }

    async fn is_true(store: &MemoryStore, key: &ImportKey, condition_type: &str) -> bool {
        condition(store, key, condition_type)
            .await
            .is_some_and(|c| c.is_true())
    }

    async fn edit_import(store: &MemoryStore, key: &ImportKey, edit: impl FnOnce(&mut Import)) {
        let mut imp = store.import(key).await.unwrap();
        edit(&mut imp);
        store.put_import(imp).await;
    }

    fn slice_ips(slice: &EndpointSlice) -> Vec<String> {
        slice
            .endpoints
            .iter()
            .flat_map(|e| e.addresses.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_exclusive_import_creates_service_and_endpoints() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1", "10.0.0.2"]).await;
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 1)).await.key();

        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &key, TARGET_PORT_VALID).await);
        assert!(is_true(&store, &key, SERVICE_VALID).await);

        let service = store.service(SYSTEM, "imp").await.unwrap();
        assert!(ownership::is_labeled_for(&service.metadata, &key));
        let port = &service.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(1234)));

        let slice = store.endpoint_slice(SYSTEM, "imp-link").await.unwrap();
        assert_eq!(slice_ips(&slice), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(slice.ports.unwrap()[0].port, Some(1234));
        assert_eq!(
            store.import(&key).await.unwrap().status.unwrap().target_port,
            Some(1234)
        );
    }

    #[tokio::test]
    async fn test_zero_sources_is_valid_without_endpoints() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", None, 0)).await.key();

        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &key, TARGET_PORT_VALID).await);
        assert!(is_true(&store, &key, SERVICE_VALID).await);

        // the service exists but has nothing behind it
        assert!(store.service(SYSTEM, "imp").await.is_some());
        let slice = store.endpoint_slice(SYSTEM, "imp-link").await.unwrap();
        assert!(slice.endpoints.is_empty());

        let allocated = store.import(&key).await.unwrap().status.unwrap().target_port.unwrap();
        assert!(PortRange::default().contains(allocated));
    }

    #[tokio::test]
    async fn test_conflicting_target_port() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let first = store.put_import(import(SYSTEM, "imp1", Some(1234), 1)).await.key();
        let second = store.put_import(import(SYSTEM, "imp2", Some(1234), 0)).await.key();

        assert_eq!(run(&r, &first).await, ReconcileOutcome::Valid);
        assert_eq!(
            run(&r, &second).await,
            ReconcileOutcome::Invalid {
                reason: reasons::PORT_CONFLICT
            }
        );
        assert!(!is_true(&store, &second, TARGET_PORT_VALID).await);
        assert!(!is_true(&store, &second, SERVICE_VALID).await);
        assert!(store.service(SYSTEM, "imp2").await.is_none());
        // the first import keeps its port
        assert_eq!(r.ports().owner_of(SYSTEM, 1234).as_deref(), Some("imp1"));

        edit_import(&store, &second, |imp| imp.spec.target_port = Some(1235)).await;
        assert_eq!(run(&r, &second).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &second, TARGET_PORT_VALID).await);
        assert!(is_true(&store, &second, SERVICE_VALID).await);
        assert!(store.service(SYSTEM, "imp2").await.is_some());
    }

    #[tokio::test]
    async fn test_freed_port_lets_waiting_import_become_valid() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let a = store.put_import(import(SYSTEM, "a", Some(1234), 0)).await.key();
        let b = store.put_import(import(SYSTEM, "b", Some(1234), 0)).await.key();
        run(&r, &a).await;
        run(&r, &b).await;
        assert!(!is_true(&store, &b, TARGET_PORT_VALID).await);

        edit_import(&store, &a, |imp| imp.spec.target_port = Some(2000)).await;
        assert_eq!(run(&r, &a).await, ReconcileOutcome::Valid);
        assert_eq!(r.ports().owner_of(SYSTEM, 1234), None);

        assert_eq!(run(&r, &b).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &b, TARGET_PORT_VALID).await);
        assert!(is_true(&store, &b, SERVICE_VALID).await);
    }

    #[tokio::test]
    async fn test_port_change_refreshes_condition_message() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 0)).await.key();
        run(&r, &key).await;

        edit_import(&store, &key, |imp| imp.spec.target_port = Some(1235)).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        let cond = condition(&store, &key, TARGET_PORT_VALID).await.unwrap();
        assert_eq!(cond.reason, reasons::PORT_RESERVED);
        assert_eq!(cond.message, "target port 1235 is reserved");
        assert_eq!(
            store.import(&key).await.unwrap().status.unwrap().target_port,
            Some(1235)
        );
    }

    #[tokio::test]
    async fn test_waiter_is_woken_after_port_is_freed() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let a = store.put_import(import(SYSTEM, "a", Some(1234), 0)).await.key();
        let b = store.put_import(import(SYSTEM, "b", Some(1234), 0)).await.key();
        run(&r, &a).await;
        run(&r, &b).await;
        r.ports().take_freed();

        // b runs again before a's deletion is processed and still loses
        store.remove_import(&a).await;
        let writes = store.writes();
        assert_eq!(
            run(&r, &b).await,
            ReconcileOutcome::Invalid {
                reason: reasons::PORT_CONFLICT
            }
        );
        assert_eq!(store.writes(), writes);
        let imports = store.list_imports().await.unwrap();
        assert!(r.take_port_waiters(&imports).is_empty());

        assert_eq!(run(&r, &a).await, ReconcileOutcome::Deleted);
        let imports = store.list_imports().await.unwrap();
        assert_eq!(r.take_port_waiters(&imports), vec![b.clone()]);
        assert!(r.take_port_waiters(&imports).is_empty());

        assert_eq!(run(&r, &b).await, ReconcileOutcome::Valid);
        assert_eq!(r.ports().owner_of(SYSTEM, 1234).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_releases_port_and_service() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 1)).await.key();
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);

        store.remove_import(&key).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Deleted);
        assert!(store.service(SYSTEM, "imp").await.is_none());
        assert!(store.endpoint_slice(SYSTEM, "imp-link").await.is_none());
        assert_eq!(r.ports().owner_of(SYSTEM, 1234), None);

        let next = store.put_import(import(SYSTEM, "imp2", Some(1234), 1)).await.key();
        assert_eq!(run(&r, &next).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &next, SERVICE_VALID).await);
    }

    #[tokio::test]
    async fn test_conflicting_service_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        store.put_service(plain_service(SYSTEM, "service")).await;
        let key = store.put_import(import(SYSTEM, "service", None, 0)).await.key();

        // exclusive mode never takes over an unmanaged service
        assert_eq!(
            run(&r, &key).await,
            ReconcileOutcome::Invalid {
                reason: reasons::SERVICE_CONFLICT
            }
        );
        assert!(!is_true(&store, &key, SERVICE_VALID).await);
        assert!(is_true(&store, &key, TARGET_PORT_VALID).await);

        // a user marks the service as managed for this import
        let mut service = store.service(SYSTEM, "service").await.unwrap();
        service.metadata.labels = Some(ownership::ownership_labels(&key));
        store.put_service(service).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);

        // deleted externally: recreated
        store.remove_service(SYSTEM, "service").await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        let recreated = store.service(SYSTEM, "service").await.unwrap();
        assert!(is_true(&store, &key, SERVICE_VALID).await);

        // ownership label moved to another manager
        let mut service = recreated.clone();
        service
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert(labels::MANAGED_BY.to_string(), "other".to_string());
        store.put_service(service.clone()).await;
        assert!(matches!(run(&r, &key).await, ReconcileOutcome::Invalid { .. }));
        assert!(!is_true(&store, &key, SERVICE_VALID).await);
        // foreign objects are not touched
        assert_eq!(
            store.service(SYSTEM, "service").await.unwrap().metadata.labels,
            service.metadata.labels
        );

        // restored: valid again without recreating the service
        service
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());
        store.put_service(service).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert_eq!(
            store.service(SYSTEM, "service").await.unwrap().metadata.uid,
            recreated.metadata.uid
        );
    }

    #[tokio::test]
    async fn test_merge_import_adopts_but_never_creates() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        let mut imp = import(SYSTEM, "imported", None, 1);
        imp.spec.merge = true;
        let key = store.put_import(imp).await.key();

        assert_eq!(
            run(&r, &key).await,
            ReconcileOutcome::Invalid {
                reason: reasons::SERVICE_NOT_FOUND
            }
        );
        assert!(store.service(SYSTEM, "imported").await.is_none());

        let created = store.put_service(plain_service(SYSTEM, "imported")).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &key, SERVICE_VALID).await);

        let adopted = store.service(SYSTEM, "imported").await.unwrap();
        assert_eq!(adopted.metadata.uid, created.metadata.uid);
        assert!(ownership::is_adopted(&adopted.metadata));
        assert!(ownership::is_labeled_for(&adopted.metadata, &key));
        // spec untouched
        assert_eq!(adopted.spec, created.spec);

        let slice = store.endpoint_slice(SYSTEM, "imported-link").await.unwrap();
        assert_eq!(slice_ips(&slice), vec!["10.0.0.1"]);
        assert_eq!(slice.ports.unwrap()[0].name.as_deref(), Some("http"));

        // deleting a merge import hands the service back
        store.remove_import(&key).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Deleted);
        let released = store.service(SYSTEM, "imported").await.unwrap();
        assert!(!ownership::is_adopted(&released.metadata));
        assert!(!ownership::is_labeled_for(&released.metadata, &key));
        assert!(store.endpoint_slice(SYSTEM, "imported-link").await.is_none());
    }

    #[tokio::test]
    async fn test_merge_turned_off_releases_adopted_service() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        store.put_service(plain_service(SYSTEM, "imported")).await;
        let mut imp = import(SYSTEM, "imported", None, 1);
        imp.metadata.labels = Some(BTreeMap::from([(
            labels::IMPORT_MERGE.to_string(),
            "true".to_string(),
        )]));
        let key = store.put_import(imp).await.key();
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);

        edit_import(&store, &key, |imp| imp.metadata.labels = None).await;
        assert_eq!(
            run(&r, &key).await,
            ReconcileOutcome::Invalid {
                reason: reasons::SERVICE_CONFLICT
            }
        );
        assert!(!is_true(&store, &key, SERVICE_VALID).await);
        let service = store.service(SYSTEM, "imported").await.unwrap();
        assert!(!ownership::is_labeled_for(&service.metadata, &key));
        assert!(store.endpoint_slice(SYSTEM, "imported-link").await.is_none());
    }

    #[tokio::test]
    async fn test_unprivileged_namespace_uses_system_service() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        let key = ImportKey::new("apps", "service");
        let system_name = naming::system_service_name(&key);

        // an unrelated service squats on the system service identity
        store.put_service(plain_service(SYSTEM, &system_name)).await;
        store.put_import(import("apps", "service", None, 1)).await;
        assert!(matches!(run(&r, &key).await, ReconcileOutcome::Invalid { .. }));
        assert!(!is_true(&store, &key, SERVICE_VALID).await);

        store.remove_service(SYSTEM, &system_name).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);

        let user_service = store.service("apps", "service").await.unwrap();
        let spec = user_service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(
            spec.external_name,
            Some(naming::service_fqdn(SYSTEM, &system_name))
        );
        let slice = store
            .endpoint_slice(SYSTEM, &naming::endpoint_slice_name(&system_name))
            .await
            .unwrap();
        assert_eq!(slice_ips(&slice), vec!["10.0.0.1"]);
        assert!(store.endpoint_slice("apps", "service-link").await.is_none());

        store.remove_import(&key).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Deleted);
        assert!(store.service("apps", "service").await.is_none());
        assert!(store.service(SYSTEM, &system_name).await.is_none());
    }

    #[tokio::test]
    async fn test_dataplane_changes_resync_endpoints() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", None, 1)).await.key();
        run(&r, &key).await;
        let service_uid = store.service(SYSTEM, "imp").await.unwrap().metadata.uid;

        // scale up
        put_dataplane(&store, &["10.0.0.1", "10.0.0.2"]).await;
        run(&r, &key).await;
        let slice = store.endpoint_slice(SYSTEM, "imp-link").await.unwrap();
        assert_eq!(slice_ips(&slice), vec!["10.0.0.1", "10.0.0.2"]);

        // dataplane service deleted: no route, but still valid
        store.remove_service(SYSTEM, DATAPLANE).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        let slice = store.endpoint_slice(SYSTEM, "imp-link").await.unwrap();
        assert!(slice.endpoints.is_empty());

        // recreated with new pods
        put_dataplane(&store, &["10.0.0.9"]).await;
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        let slice = store.endpoint_slice(SYSTEM, "imp-link").await.unwrap();
        assert_eq!(slice_ips(&slice), vec!["10.0.0.9"]);

        // the import's own service was never recreated
        assert_eq!(store.service(SYSTEM, "imp").await.unwrap().metadata.uid, service_uid);
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        put_dataplane(&store, &["10.0.0.1"]).await;
        let r = reconciler(&store);
        let key = store.put_import(import("apps", "imp", None, 2)).await.key();

        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        let writes = store.writes();
        assert!(writes > 0);

        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_invalid_name() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let key = store
            .put_import(import(SYSTEM, &"a".repeat(64), Some(1234), 0))
            .await
            .key();

        assert_eq!(
            run(&r, &key).await,
            ReconcileOutcome::Invalid {
                reason: reasons::INVALID_NAME
            }
        );
        assert_eq!(
            condition(&store, &key, SERVICE_VALID).await.unwrap().reason,
            reasons::INVALID_NAME
        );
        assert_eq!(r.ports().owner_of(SYSTEM, 1234), None);

        let longest = store
            .put_import(import(SYSTEM, &"a".repeat(63), Some(1234), 0))
            .await
            .key();
        assert_eq!(run(&r, &longest).await, ReconcileOutcome::Valid);
    }

    #[tokio::test]
    async fn test_stale_writes_are_retried() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 0)).await.key();

        store.inject_stale_writes(2);
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &key, SERVICE_VALID).await);
        assert_eq!(r.metrics.reconcile_retries_total.get(), 2);
    }

    #[tokio::test]
    async fn test_service_deleted_during_update_is_recreated() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 0)).await.key();
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);

        // the owned service now needs an update, and is deleted under it
        edit_import(&store, &key, |imp| imp.spec.port = 8080).await;
        store.inject_vanishing_updates(1);

        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        let cond = condition(&store, &key, SERVICE_VALID).await.unwrap();
        assert!(cond.is_true());
        assert_eq!(cond.reason, reasons::SERVICE_READY);
        let service = store.service(SYSTEM, "imp").await.unwrap();
        assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 8080);
        assert_eq!(r.metrics.reconcile_retries_total.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_invalid() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 0)).await.key();

        // first attempt plus two retries all fail
        store.inject_stale_writes(3);
        assert_eq!(
            run(&r, &key).await,
            ReconcileOutcome::Failed {
                reason: reasons::RETRY_EXHAUSTED
            }
        );
        let cond = condition(&store, &key, SERVICE_VALID).await.unwrap();
        assert!(!cond.is_true());
        assert_eq!(cond.reason, reasons::RETRY_EXHAUSTED);

        // the next pass recovers
        assert_eq!(run(&r, &key).await, ReconcileOutcome::Valid);
        assert!(is_true(&store, &key, SERVICE_VALID).await);
    }

    #[tokio::test]
    async fn test_superseded_pass_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 0)).await.key();

        let queue = WorkQueue::new();
        queue.enqueue(key.clone());
        let (_, ticket) = queue.next().await.unwrap();
        queue.enqueue(key.clone());

        assert_eq!(
            r.reconcile_with_retry(&key, &ticket).await,
            ReconcileOutcome::Superseded
        );
        assert_eq!(store.writes(), 0);
        assert!(store.service(SYSTEM, "imp").await.is_none());
    }

    #[tokio::test]
    async fn test_restore_rebuilds_reservations() {
        let store = Arc::new(MemoryStore::new());
        let key = store.put_import(import(SYSTEM, "imp", Some(1234), 0)).await.key();
        run(&reconciler(&store), &key).await;

        // a fresh controller process
        let r = reconciler(&store);
        assert_eq!(r.restore().await.unwrap(), 1);
        assert_eq!(r.ports().owner_of(SYSTEM, 1234).as_deref(), Some("imp"));

        let other = store.put_import(import(SYSTEM, "other", Some(1234), 0)).await.key();
        assert!(matches!(run(&r, &other).await, ReconcileOutcome::Invalid { .. }));
    }

    #[test]
    fn test_service_differs_ignores_defaults() {
        let desired = Service {
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    target_port: Some(IntOrString::Int(1234)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut observed = desired.clone();
        if let Some(spec) = observed.spec.as_mut() {
            spec.cluster_ip = Some("10.96.0.10".to_string());
            spec.type_ = None;
            spec.ports.as_mut().unwrap()[0].protocol = None;
        }
        assert!(!service_differs(&observed, &desired));

        observed.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].target_port =
            Some(IntOrString::Int(1235));
        assert!(service_differs(&observed, &desired));
    }
}
