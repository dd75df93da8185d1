//! Per-connection policy decisions.
//!
//! Rules live in an immutable [`RuleSet`] behind an `Arc`. Readers clone the
//! `Arc` and evaluate without holding any lock; writers build a modified copy
//! and swap the pointer. A decision therefore sees the rules either entirely
//! before or entirely after a mutation.

use link_core::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

use crate::acl::{AclRule, AclRules, Action};
use crate::load_balancer::{LbPolicies, LbPolicy, LoadBalancer};
use crate::metrics::PolicyMetrics;
use crate::pattern::{Flow, RuleKey};
use crate::snapshot::RuleSnapshot;
use crate::Result;

/// ACL and load-balancing rules at one point in time
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    pub acl: AclRules,
    pub lb: LbPolicies,
}

/// A connection attempt awaiting a decision
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(flatten)]
    pub flow: Flow,
    /// Connection identity for consistent hashing, e.g. the source address
    #[serde(default)]
    pub key: String,
    /// Endpoints able to serve the destination
    #[serde(default)]
    pub candidates: Vec<Endpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "endpoint", rename_all = "camelCase")]
pub enum Decision {
    Deny,
    /// Allowed, but no endpoint can carry the connection
    NoRoute,
    Route(Endpoint),
}

impl Decision {
    fn label(&self) -> &'static str {
        match self {
            Decision::Deny => "deny",
            Decision::NoRoute => "no_route",
            Decision::Route(_) => "route",
        }
    }
}

/// Current rules grouped for display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyListing {
    pub default_action: Action,
    /// ACL rules in evaluation precedence order
    pub acl: Vec<AclRule>,
    /// LB policies grouped by destination service pattern
    pub lb: BTreeMap<String, Vec<LbPolicy>>,
}

pub struct PolicyEngine {
    rules: RwLock<Arc<RuleSet>>,
    /// Serializes writers so concurrent mutations are not lost
    writer: Mutex<()>,
    metrics: Option<PolicyMetrics>,
}

impl PolicyEngine {
    /// Engine with no rules, deciding `default_action` for unmatched ACL queries
    pub fn new(default_action: Action) -> Self {
        Self::with_rules(RuleSet {
            acl: AclRules::new(default_action),
            lb: LbPolicies::default(),
        })
    }

    fn with_rules(rules: RuleSet) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            writer: Mutex::new(()),
            metrics: None,
        }
    }

    /// Engine seeded from a rule snapshot
    pub fn from_snapshot(snapshot: RuleSnapshot, default_action: Action) -> Self {
        Self::with_rules(build(snapshot, default_action))
    }

    pub fn with_metrics(mut self, metrics: PolicyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The current rule set
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decide a connection: ACL first, then endpoint selection
    pub fn decide(&self, connection: &Connection) -> Decision {
        let rules = self.snapshot();
        let flow = &connection.flow;

        let decision = match rules.acl.evaluate(flow) {
            Action::Deny => Decision::Deny,
            Action::Allow => {
                let balancer = LoadBalancer::for_policy(rules.lb.lookup(flow));
                if let Some(metrics) = &self.metrics {
                    metrics
                        .lb_selections_total
                        .with_label_values(&[balancer.strategy().as_str()])
                        .inc();
                }
                match balancer.select(&connection.candidates, &connection.key) {
                    Some(endpoint) => Decision::Route(endpoint.clone()),
                    None => Decision::NoRoute,
                }
            }
        };

        debug!(
            src = %flow.service_src,
            dst = %flow.service_dst,
            gw = %flow.gw_dest,
            decision = decision.label(),
            "Connection decision"
        );
        if let Some(metrics) = &self.metrics {
            metrics.decisions_total.with_label_values(&[decision.label()]).inc();
        }
        decision
    }

    fn update<T>(&self, mutate: impl FnOnce(&mut RuleSet) -> T) -> T {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.snapshot()).clone();
        let result = mutate(&mut next);
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        result
    }

    pub fn add_acl(&self, rule: AclRule) {
        info!(rule = %rule.key, priority = rule.priority, action = %rule.action, "Adding ACL rule");
        self.update(|rules| rules.acl.add(rule));
    }

    /// Delete an ACL rule; returns whether it existed
    pub fn delete_acl(&self, key: &RuleKey) -> bool {
        let removed = self.update(|rules| rules.acl.delete(key));
        info!(rule = %key, removed, "Deleted ACL rule");
        removed
    }

    pub fn add_lb(&self, policy: LbPolicy) {
        info!(rule = %policy.key, strategy = %policy.strategy, "Adding LB policy");
        self.update(|rules| rules.lb.add(policy));
    }

    /// Delete an LB policy; returns whether it existed
    pub fn delete_lb(&self, key: &RuleKey) -> bool {
        let removed = self.update(|rules| rules.lb.delete(key));
        info!(rule = %key, removed, "Deleted LB policy");
        removed
    }

    /// Replace all rules with those from a snapshot, keeping the default action
    pub fn replace(&self, snapshot: RuleSnapshot) {
        self.update(|rules| {
            *rules = build(snapshot, rules.acl.default_action());
            info!(acl = rules.acl.len(), lb = rules.lb.len(), "Replaced policy rules");
        });
    }

    /// Load a YAML rule snapshot from `path` and replace all rules with it
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = RuleSnapshot::load(path)?;
        self.replace(snapshot);
        Ok(())
    }

    pub fn list(&self) -> PolicyListing {
        let rules = self.snapshot();
        let mut lb: BTreeMap<String, Vec<LbPolicy>> = BTreeMap::new();
        for policy in rules.lb.policies() {
            lb.entry(policy.key.service_dst.to_string())
                .or_default()
                .push(policy);
        }
        PolicyListing {
            default_action: rules.acl.default_action(),
            acl: rules.acl.rules(),
            lb,
        }
    }
}

fn build(snapshot: RuleSnapshot, default_action: Action) -> RuleSet {
    let mut rules = RuleSet {
        acl: AclRules::new(default_action),
        lb: LbPolicies::default(),
    };
    for rule in snapshot.acl {
        rules.acl.add(rule);
    }
    for policy in snapshot.lb {
        rules.lb.add(policy);
    }
    rules
}
