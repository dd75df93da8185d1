//! Endpoint synchronization between Imports and the local dataplane.
//!
//! The routable endpoint set of an Import is fully derived state: it is
//! recomputed from the Import's sources and the current dataplane snapshot
//! on every reconciliation and written out whole, never patched.

use k8s_openapi::api::discovery::v1::{
    Endpoint as SliceEndpoint, EndpointConditions, EndpointPort, EndpointSlice,
};
use kube::api::ObjectMeta;
use link_api::{labels, naming, ImportKey, ImportSource};
use std::collections::BTreeSet;

use crate::ownership::ownership_labels;
use crate::Endpoint;

const ADDRESS_TYPE_IPV4: &str = "IPv4";

/// Live endpoints advertised by the dataplane's registration service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataplaneSnapshot {
    /// uid of the registration service; `None` when it does not exist
    pub registration: Option<String>,
    pub address_type: String,
    pub endpoints: BTreeSet<Endpoint>,
}

impl DataplaneSnapshot {
    /// Snapshot of a missing dataplane
    pub fn empty() -> Self {
        Self {
            registration: None,
            address_type: ADDRESS_TYPE_IPV4.to_string(),
            endpoints: BTreeSet::new(),
        }
    }

    /// Build a snapshot from the registration service's EndpointSlices.
    ///
    /// A missing `ready` condition counts as ready. Only slices of the first
    /// slice's address family are used.
    pub fn from_slices(registration: Option<String>, slices: &[EndpointSlice]) -> Self {
        let address_type = slices
            .first()
            .map(|s| s.address_type.clone())
            .unwrap_or_else(|| ADDRESS_TYPE_IPV4.to_string());

        let endpoints = slices
            .iter()
            .filter(|slice| slice.address_type == address_type)
            .flat_map(|slice| {
                let port = slice
                    .ports
                    .as_ref()
                    .and_then(|ports| ports.first())
                    .and_then(|p| p.port)
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or(0);
                slice.endpoints.iter().flat_map(move |ep| {
                    let ready = ep
                        .conditions
                        .as_ref()
                        .and_then(|c| c.ready)
                        .unwrap_or(true);
                    ep.addresses.iter().map(move |ip| Endpoint {
                        ip: ip.clone(),
                        port,
                        ready,
                    })
                })
            })
            .collect();

        Self {
            registration,
            address_type,
            endpoints,
        }
    }

    pub fn ready(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| e.ready)
    }
}

/// Dataplane endpoints able to carry traffic for one source.
///
/// Every ready local dataplane instance forwards to any peer, so each
/// source resolves to the full ready set.
pub fn resolve<'a>(_source: &ImportSource, live: &'a DataplaneSnapshot) -> impl Iterator<Item = &'a Endpoint> {
    live.ready()
}

/// Compute the routable addresses for an Import's sources.
///
/// No sources, or no live dataplane, yields an empty but valid set: the
/// service exists and connections to it are refused.
pub fn sync(sources: &[ImportSource], live: &DataplaneSnapshot) -> BTreeSet<String> {
    sources
        .iter()
        .flat_map(|source| resolve(source, live))
        .map(|ep| ep.ip.clone())
        .collect()
}

/// Render the EndpointSlice attaching `addresses` to a service
pub fn desired_slice(
    key: &ImportKey,
    namespace: &str,
    service: &str,
    port_name: Option<String>,
    target_port: u16,
    address_type: &str,
    addresses: &BTreeSet<String>,
) -> EndpointSlice {
    let mut slice_labels = ownership_labels(key);
    slice_labels.insert(labels::SERVICE_NAME.to_string(), service.to_string());
    slice_labels.insert(
        labels::ENDPOINT_SLICE_MANAGED_BY.to_string(),
        labels::ENDPOINT_SLICE_MANAGED_BY_VALUE.to_string(),
    );

    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(naming::endpoint_slice_name(service)),
            namespace: Some(namespace.to_string()),
            labels: Some(slice_labels),
            ..Default::default()
        },
        address_type: address_type.to_string(),
        endpoints: addresses
            .iter()
            .map(|ip| SliceEndpoint {
                addresses: vec![ip.clone()],
                conditions: Some(EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![EndpointPort {
            name: port_name,
            port: Some(i32::from(target_port)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
    }
}

/// Whether `existing` already matches `desired`
pub fn slice_matches(existing: &EndpointSlice, desired: &EndpointSlice) -> bool {
    let labels_match = match (&existing.metadata.labels, &desired.metadata.labels) {
        (Some(have), Some(want)) => want.iter().all(|(k, v)| have.get(k) == Some(v)),
        (_, None) => true,
        (None, Some(_)) => false,
    };

    labels_match
        && existing.address_type == desired.address_type
        && existing.endpoints == desired.endpoints
        && existing.ports == desired.ports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataplane_slice(addresses: &[(&str, Option<bool>)]) -> EndpointSlice {
        EndpointSlice {
            address_type: "IPv4".to_string(),
            endpoints: addresses
                .iter()
                .map(|(ip, ready)| SliceEndpoint {
                    addresses: vec![ip.to_string()],
                    conditions: Some(EndpointConditions {
                        ready: *ready,
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect(),
            ports: Some(vec![EndpointPort {
                port: Some(443),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn source(peer: &str) -> ImportSource {
        ImportSource {
            peer: peer.to_string(),
            export_name: "echo".to_string(),
            export_namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_snapshot_skips_unready() {
        let snapshot = DataplaneSnapshot::from_slices(
            Some("uid-1".to_string()),
            &[dataplane_slice(&[
                ("10.0.0.1", Some(true)),
                ("10.0.0.2", Some(false)),
                ("10.0.0.3", None),
            ])],
        );
        let ready: Vec<_> = snapshot.ready().map(|e| e.ip.as_str()).collect();
        assert_eq!(ready, vec!["10.0.0.1", "10.0.0.3"]);
        assert_eq!(snapshot.endpoints.iter().next().unwrap().port, 443);
    }

    #[test]
    fn test_sync_without_sources_is_empty() {
        let snapshot =
            DataplaneSnapshot::from_slices(None, &[dataplane_slice(&[("10.0.0.1", Some(true))])]);
        assert!(sync(&[], &snapshot).is_empty());
    }

    #[test]
    fn test_sync_without_dataplane_is_empty() {
        assert!(sync(&[source("east")], &DataplaneSnapshot::empty()).is_empty());
    }

    #[test]
    fn test_sync_unions_sources() {
        let snapshot = DataplaneSnapshot::from_slices(
            None,
            &[
                dataplane_slice(&[("10.0.0.1", Some(true))]),
                dataplane_slice(&[("10.0.0.2", Some(true)), ("10.0.0.1", Some(true))]),
            ],
        );
        let routable = sync(&[source("east"), source("west")], &snapshot);
        assert_eq!(
            routable.into_iter().collect::<Vec<_>>(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
    }

    #[test]
    fn test_desired_slice_matches_itself_only() {
        let key = ImportKey::new("apps", "imp");
        let addresses = BTreeSet::from(["10.0.0.1".to_string()]);
        let desired = desired_slice(&key, "apps", "imp", None, 1234, "IPv4", &addresses);
        assert_eq!(desired.metadata.name.as_deref(), Some("imp-link"));
        assert!(slice_matches(&desired, &desired));

        let changed = desired_slice(&key, "apps", "imp", None, 1235, "IPv4", &addresses);
        assert!(!slice_matches(&changed, &desired));

        let emptied = desired_slice(&key, "apps", "imp", None, 1234, "IPv4", &BTreeSet::new());
        assert!(!slice_matches(&emptied, &desired));
        assert!(emptied.endpoints.is_empty());
    }
}
