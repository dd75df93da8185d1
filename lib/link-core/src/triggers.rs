//! Mapping of watch events to the Imports they affect

use kube::api::ObjectMeta;
use link_api::conditions::TARGET_PORT_VALID;
use link_api::{labels, naming, Import, ImportKey};
use std::collections::BTreeSet;

use crate::reconciler::ReconcilerConfig;

fn owner_of(meta: &ObjectMeta) -> Option<ImportKey> {
    let object_labels = meta.labels.as_ref()?;
    if object_labels.get(labels::MANAGED_BY).map(String::as_str) != Some(labels::MANAGED_BY_VALUE) {
        return None;
    }
    Some(ImportKey::new(
        object_labels.get(labels::IMPORT_NAMESPACE)?.clone(),
        object_labels.get(labels::IMPORT_NAME)?.clone(),
    ))
}

/// Imports to reconcile after a Service changed.
///
/// A change to the dataplane's registration service affects every Import.
/// Otherwise the labeled owner is affected, as is any Import whose primary
/// or system service identity the object occupies.
pub fn imports_for_service(meta: &ObjectMeta, imports: &[ImportKey], config: &ReconcilerConfig) -> Vec<ImportKey> {
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let name = meta.name.as_deref().unwrap_or_default();

    if namespace == config.system_namespace && name == config.dataplane_service {
        return imports.to_vec();
    }

    let mut affected: BTreeSet<ImportKey> = owner_of(meta).into_iter().collect();
    for key in imports {
        let primary = key.namespace == namespace && key.name == name;
        let system = namespace == config.system_namespace && naming::system_service_name(key) == name;
        if primary || system {
            affected.insert(key.clone());
        }
    }
    affected.into_iter().collect()
}

/// Imports to reconcile after an EndpointSlice changed
pub fn imports_for_endpoint_slice(
    meta: &ObjectMeta,
    imports: &[ImportKey],
    config: &ReconcilerConfig,
) -> Vec<ImportKey> {
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let service = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::SERVICE_NAME))
        .map(String::as_str);

    if namespace == config.system_namespace && service == Some(config.dataplane_service.as_str()) {
        return imports.to_vec();
    }
    owner_of(meta).into_iter().collect()
}

/// Imports waiting on a port that `changed` may have freed: its namespace
/// peers whose target port is not valid
pub fn imports_for_port_release<'a>(
    changed: &ImportKey,
    imports: impl IntoIterator<Item = &'a Import>,
) -> Vec<ImportKey> {
    imports_waiting_for_port(&changed.namespace, imports)
        .into_iter()
        .filter(|key| key != changed)
        .collect()
}

/// Imports in `namespace` whose target port is not valid
pub fn imports_waiting_for_port<'a>(
    namespace: &str,
    imports: impl IntoIterator<Item = &'a Import>,
) -> Vec<ImportKey> {
    imports
        .into_iter()
        .filter(|imp| imp.metadata.namespace.as_deref() == Some(namespace))
        .filter(|imp| !imp.condition_is_true(TARGET_PORT_VALID))
        .map(Import::key)
        .collect()
}
