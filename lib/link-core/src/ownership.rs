//! Ownership classification of local networking objects.
//!
//! An object belongs to an Import when its managed-by label carries the
//! controller's marker and its owner labels name the Import. Objects claimed
//! by another manager are never mutated.

use kube::api::ObjectMeta;
use link_api::{labels, ImportKey};
use std::collections::BTreeMap;

/// How an existing object relates to an Import
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// No object occupies the identity
    Absent,
    /// The object belongs to someone else and must be left alone
    ForeignConflict { holder: String },
    /// The object is managed for this Import
    OwnedByThis { adopted: bool },
    /// The object is unmanaged and may be adopted by a merge Import
    AdoptablyForeign,
}

/// Classify `existing` with respect to the Import `key`.
///
/// An adopted object only stays owned while merge is requested: exclusive
/// mode never claims an object it did not create.
pub fn classify(existing: Option<&ObjectMeta>, key: &ImportKey, merge: bool) -> Ownership {
    let Some(meta) = existing else {
        return Ownership::Absent;
    };

    let empty = BTreeMap::new();
    let object_labels = meta.labels.as_ref().unwrap_or(&empty);

    match object_labels.get(labels::MANAGED_BY).map(String::as_str) {
        Some(labels::MANAGED_BY_VALUE) => {
            let owner = ImportKey::new(
                object_labels
                    .get(labels::IMPORT_NAMESPACE)
                    .cloned()
                    .unwrap_or_default(),
                object_labels
                    .get(labels::IMPORT_NAME)
                    .cloned()
                    .unwrap_or_default(),
            );
            if owner != *key {
                return Ownership::ForeignConflict {
                    holder: format!("import {}", owner),
                };
            }

            let adopted = is_adopted(meta);
            if adopted && !merge {
                return Ownership::ForeignConflict {
                    holder: "its original creator (adopted by a merge import)".to_string(),
                };
            }
            Ownership::OwnedByThis { adopted }
        }
        Some(other) => Ownership::ForeignConflict {
            holder: format!("manager {:?}", other),
        },
        None if merge => Ownership::AdoptablyForeign,
        None => Ownership::ForeignConflict {
            holder: "an unmanaged object".to_string(),
        },
    }
}

/// Whether the object carries this controller's owner labels for `key`,
/// regardless of how it came to be owned
pub fn is_labeled_for(meta: &ObjectMeta, key: &ImportKey) -> bool {
    let Some(object_labels) = meta.labels.as_ref() else {
        return false;
    };
    object_labels.get(labels::MANAGED_BY).map(String::as_str) == Some(labels::MANAGED_BY_VALUE)
        && object_labels.get(labels::IMPORT_NAME) == Some(&key.name)
        && object_labels.get(labels::IMPORT_NAMESPACE) == Some(&key.namespace)
}

pub fn is_adopted(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(labels::ADOPTED))
        .is_some_and(|v| v == "true")
}

/// Owner labels for objects managed for `key`
pub fn ownership_labels(key: &ImportKey) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
        (labels::IMPORT_NAME.to_string(), key.name.clone()),
        (labels::IMPORT_NAMESPACE.to_string(), key.namespace.clone()),
    ])
}

/// Stamp owner labels and the adoption marker onto an adopted object
pub fn stamp(meta: &mut ObjectMeta, key: &ImportKey) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(ownership_labels(key));
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(labels::ADOPTED.to_string(), "true".to_string());
}

/// Remove owner labels and the adoption marker, handing the object back
pub fn strip(meta: &mut ObjectMeta) {
    if let Some(object_labels) = meta.labels.as_mut() {
        object_labels.remove(labels::MANAGED_BY);
        object_labels.remove(labels::IMPORT_NAME);
        object_labels.remove(labels::IMPORT_NAMESPACE);
    }
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(labels::ADOPTED);
    }
}
