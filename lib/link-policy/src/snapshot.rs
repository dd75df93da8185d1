//! YAML rule snapshots.
//!
//! ```yaml
//! acl:
//!   - serviceSrc: frontend
//!     serviceDst: "*"
//!     priority: 1
//!     action: allow
//! lb:
//!   - serviceDst: db
//!     strategy: static
//!     order: ["10.0.0.1"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::acl::AclRule;
use crate::load_balancer::LbPolicy;
use crate::{PolicyError, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    #[serde(default)]
    pub acl: Vec<AclRule>,
    #[serde(default)]
    pub lb: Vec<LbPolicy>,
}

impl RuleSnapshot {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::SnapshotIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}
