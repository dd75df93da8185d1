//! Connection policy for imported services
//!
//! This library provides:
//! - ACL evaluation over (source service, destination service, gateway) triples
//! - Load-balancing policies and endpoint selection
//! - The policy engine consulted once per connection attempt

pub mod acl;
pub mod engine;
pub mod error;
pub mod load_balancer;
pub mod metrics;
pub mod pattern;
pub mod snapshot;
mod table;

pub use acl::{AclRule, AclRules, Action};
pub use engine::{Connection, Decision, PolicyEngine, PolicyListing, RuleSet};
pub use error::{PolicyError, Result};
pub use load_balancer::{LbPolicies, LbPolicy, LbStrategy, LoadBalancer};
pub use metrics::PolicyMetrics;
pub use pattern::{Flow, Pattern, RuleKey};
pub use snapshot::RuleSnapshot;
