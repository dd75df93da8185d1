use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{self, Condition};
use crate::key::ImportKey;
use crate::labels;

/// Import declares that a service exported by a remote peer should be
/// reachable locally under the Import's name and port
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "link.datum.net",
    version = "v1alpha1",
    kind = "Import",
    plural = "imports",
    namespaced,
    derive = "Default",
    status = "ImportStatus",
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"TargetPort","type":"integer","jsonPath":".status.targetPort"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpec {
    /// Port exposed by the local service
    pub port: u16,

    /// Optional: dataplane port carrying the imported traffic.
    /// Allocated from the configured range when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,

    /// Adopt a pre-existing local service instead of creating one
    #[serde(default)]
    pub merge: bool,

    /// Remote exports feeding this import
    #[serde(default)]
    pub sources: Vec<ImportSource>,
}

/// One remote export feeding an Import
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportSource {
    /// Name of the peer exporting the service
    #[serde(default)]
    pub peer: String,

    /// Name of the exported service on the peer
    #[serde(default)]
    pub export_name: String,

    /// Namespace of the exported service on the peer
    #[serde(default)]
    pub export_namespace: String,
}

/// Status of an Import
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatus {
    /// Effective target port currently reserved for this import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,

    /// Conditions describing the status
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Import {
    /// Namespace/name identity of this import
    pub fn key(&self) -> ImportKey {
        ImportKey::new(
            self.namespace().unwrap_or_default(),
            self.name_any(),
        )
    }

    /// Whether the import adopts a pre-existing service.
    ///
    /// Either the spec flag or the merge label enables it.
    pub fn is_merge(&self) -> bool {
        self.spec.merge
            || self
                .labels()
                .get(labels::IMPORT_MERGE)
                .is_some_and(|v| v == "true")
    }

    /// Conditions currently recorded on the import
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Whether the named condition is currently true
    pub fn condition_is_true(&self, condition_type: &str) -> bool {
        conditions::find(self.conditions(), condition_type).is_some_and(|c| c.is_true())
    }
}
