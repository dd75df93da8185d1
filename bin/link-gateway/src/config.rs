//! Gateway configuration from `LINK_*` environment variables

use link_core::{CoreError, Result};
use link_policy::Action;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub admin_addr: SocketAddr,
    /// YAML rule snapshot loaded at startup
    pub policy_file: Option<PathBuf>,
    /// Decision for connections no ACL rule matches
    pub acl_default: Action,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let admin_addr = match lookup("LINK_ADMIN_ADDR") {
            Some(value) => value.trim().parse().map_err(|e| {
                CoreError::InvalidConfiguration(format!("LINK_ADMIN_ADDR={:?}: {}", value, e))
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let acl_default = match lookup("LINK_ACL_DEFAULT") {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "allow" => Action::Allow,
                "deny" => Action::Deny,
                _ => {
                    return Err(CoreError::InvalidConfiguration(format!(
                        "LINK_ACL_DEFAULT={:?}: expected allow or deny",
                        value
                    )))
                }
            },
            None => Action::Deny,
        };

        Ok(Self {
            admin_addr,
            policy_file: lookup("LINK_POLICY_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            acl_default,
        })
    }
}
