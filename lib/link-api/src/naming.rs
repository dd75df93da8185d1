//! Names of objects derived from an Import's identity

use sha2::{Digest, Sha256};

use crate::key::ImportKey;

/// Longest name a Service (DNS-1035 label) may carry
pub const MAX_NAME_LENGTH: usize = 63;

const HASH_SUFFIX_LENGTH: usize = 8;

/// Whether an Import name can be used as a Service name
pub fn is_valid_service_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LENGTH
        && bytes[0].is_ascii_lowercase()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Name of the service carrying endpoints in the system namespace for an
/// Import living in another namespace
pub fn system_service_name(key: &ImportKey) -> String {
    bounded(format!("import-{}-{}", key.name, key.namespace), &key.to_string())
}

/// Name of the EndpointSlice the controller writes for a service
pub fn endpoint_slice_name(service: &str) -> String {
    bounded(format!("{}-link", service), service)
}

/// Cluster DNS name of a service
pub fn service_fqdn(namespace: &str, name: &str) -> String {
    format!("{}.{}.svc.cluster.local", name, namespace)
}

/// Truncate `name` to a valid length, keeping it unique with a hash of `seed`
fn bounded(name: String, seed: &str) -> String {
    if name.len() <= MAX_NAME_LENGTH {
        return name;
    }

    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    let keep = MAX_NAME_LENGTH - HASH_SUFFIX_LENGTH - 1;
    let prefix = name[..keep].trim_end_matches('-');
    format!("{}-{}", prefix, &digest[..HASH_SUFFIX_LENGTH])
}
