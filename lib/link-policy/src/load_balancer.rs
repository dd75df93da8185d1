//! Load balancing strategies for distributing connections across endpoints

use link_core::Endpoint;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use crate::pattern::{Flow, RuleKey};
use crate::table::{Entry, Keyed, RuleTable};
use crate::PolicyError;

/// Load balancing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LbStrategy {
    /// Uniform choice on every connection
    #[default]
    Random,
    /// Deterministic choice keyed by the connection
    #[serde(rename = "ecmp", alias = "consistent-hash")]
    ConsistentHash,
    /// First present endpoint in a configured order
    Static,
}

impl LbStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LbStrategy::Random => "random",
            LbStrategy::ConsistentHash => "ecmp",
            LbStrategy::Static => "static",
        }
    }
}

impl FromStr for LbStrategy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(LbStrategy::Random),
            "ecmp" | "consistent-hash" => Ok(LbStrategy::ConsistentHash),
            "static" => Ok(LbStrategy::Static),
            other => Err(PolicyError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for LbStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LbPolicy {
    #[serde(flatten)]
    pub key: RuleKey,
    #[serde(default)]
    pub strategy: LbStrategy,
    /// Preferred endpoints for [`LbStrategy::Static`], as `ip` or `ip:port`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
}

impl LbPolicy {
    pub fn new(key: RuleKey, strategy: LbStrategy) -> Self {
        Self {
            key,
            strategy,
            order: Vec::new(),
        }
    }

    pub fn with_order(mut self, order: Vec<String>) -> Self {
        self.order = order;
        self
    }
}

impl Keyed for LbPolicy {
    fn key(&self) -> &RuleKey {
        &self.key
    }
}

fn precedence(entry: &Entry<LbPolicy>) -> (usize, Reverse<u64>) {
    (entry.rule.key.wildcards(), Reverse(entry.seq))
}

/// Mutable set of load-balancing policies.
///
/// Lookup follows the ACL matching rules; policies carry no priority, so
/// the most specific then most recent match wins.
#[derive(Clone, Debug, Default)]
pub struct LbPolicies {
    table: RuleTable<LbPolicy>,
}

impl LbPolicies {
    pub fn add(&mut self, policy: LbPolicy) {
        self.table.insert(policy);
    }

    pub fn delete(&mut self, key: &RuleKey) -> bool {
        self.table.remove(key)
    }

    pub fn lookup(&self, flow: &Flow) -> Option<&LbPolicy> {
        self.table
            .matching(flow)
            .min_by_key(|e| precedence(e))
            .map(|e| &e.rule)
    }

    /// All policies, most specific first
    pub fn policies(&self) -> Vec<LbPolicy> {
        let mut entries: Vec<_> = self.table.entries().collect();
        entries.sort_by_key(|e| precedence(e));
        entries.into_iter().map(|e| e.rule.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load balancer for selecting endpoints based on a strategy
#[derive(Debug, Clone, Default)]
pub struct LoadBalancer {
    strategy: LbStrategy,
    order: Vec<String>,
}

impl LoadBalancer {
    /// Create a new load balancer with the specified strategy
    pub fn new(strategy: LbStrategy) -> Self {
        Self {
            strategy,
            order: Vec::new(),
        }
    }

    /// Load balancer for a matched policy, or the default strategy
    pub fn for_policy(policy: Option<&LbPolicy>) -> Self {
        match policy {
            Some(policy) => Self {
                strategy: policy.strategy,
                order: policy.order.clone(),
            },
            None => Self::default(),
        }
    }

    pub fn strategy(&self) -> LbStrategy {
        self.strategy
    }

    /// Select a ready endpoint; `key` identifies the connection for
    /// consistent hashing
    pub fn select<'a>(&self, endpoints: &'a [Endpoint], key: &str) -> Option<&'a Endpoint> {
        let ready: Vec<&'a Endpoint> = endpoints.iter().filter(|e| e.ready).collect();
        if ready.is_empty() {
            return None;
        }

        match self.strategy {
            LbStrategy::Random => ready.choose(&mut rand::thread_rng()).copied(),
            LbStrategy::ConsistentHash => Self::select_by_hash(&ready, key),
            LbStrategy::Static => self.select_static(&ready),
        }
    }

    /// Rendezvous hashing: each endpoint scores independently, so removing
    /// one only remaps the keys it was serving
    fn select_by_hash<'a>(endpoints: &[&'a Endpoint], key: &str) -> Option<&'a Endpoint> {
        endpoints
            .iter()
            .copied()
            .max_by_key(|endpoint| (Self::score(key, endpoint), *endpoint))
    }

    fn score(key: &str, endpoint: &Endpoint) -> u64 {
        let digest = Sha256::digest(format!("{}|{}", key, endpoint).as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    fn select_static<'a>(&self, endpoints: &[&'a Endpoint]) -> Option<&'a Endpoint> {
        self.order
            .iter()
            .find_map(|wanted| {
                endpoints
                    .iter()
                    .copied()
                    .find(|e| e.ip == *wanted || e.to_string() == *wanted)
            })
            .or_else(|| endpoints.first().copied())
    }
}
