//! Access control over connection triples.
//!
//! Every rule whose three patterns match the connection is a candidate. The
//! winner has the lowest priority value (0 is highest precedence); ties go
//! to the rule with fewer wildcards, then to the most recently added rule.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use crate::pattern::{Flow, RuleKey};
use crate::table::{Entry, Keyed, RuleTable};
use crate::PolicyError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    #[default]
    Deny,
}

impl FromStr for Action {
    type Err = PolicyError;

    /// Accepts names as well as the numeric codes `0` (allow) and `1` (deny)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "0" => Ok(Action::Allow),
            "deny" | "1" => Ok(Action::Deny),
            other => Err(PolicyError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => f.write_str("allow"),
            Action::Deny => f.write_str("deny"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRule {
    #[serde(flatten)]
    pub key: RuleKey,
    #[serde(default)]
    pub priority: u32,
    pub action: Action,
}

impl AclRule {
    pub fn new(key: RuleKey, priority: u32, action: Action) -> Self {
        Self { key, priority, action }
    }
}

impl Keyed for AclRule {
    fn key(&self) -> &RuleKey {
        &self.key
    }
}

fn precedence(entry: &Entry<AclRule>) -> (u32, usize, Reverse<u64>) {
    (entry.rule.priority, entry.rule.key.wildcards(), Reverse(entry.seq))
}

/// Mutable ACL rule set
#[derive(Clone, Debug, Default)]
pub struct AclRules {
    table: RuleTable<AclRule>,
    default_action: Action,
}

impl AclRules {
    /// Rule set deciding `default_action` when nothing matches
    pub fn new(default_action: Action) -> Self {
        Self {
            table: RuleTable::default(),
            default_action,
        }
    }

    pub fn default_action(&self) -> Action {
        self.default_action
    }

    /// Add a rule, replacing any rule with the same key
    pub fn add(&mut self, rule: AclRule) {
        self.table.insert(rule);
    }

    /// Delete the rule stored under `key`; deleting a missing key is a no-op
    pub fn delete(&mut self, key: &RuleKey) -> bool {
        self.table.remove(key)
    }

    /// The rule deciding `flow`, if any matches
    pub fn lookup(&self, flow: &Flow) -> Option<&AclRule> {
        self.table
            .matching(flow)
            .min_by_key(|e| precedence(e))
            .map(|e| &e.rule)
    }

    pub fn evaluate(&self, flow: &Flow) -> Action {
        self.lookup(flow)
            .map(|rule| rule.action)
            .unwrap_or(self.default_action)
    }

    /// All rules in evaluation precedence order
    pub fn rules(&self) -> Vec<AclRule> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(src: &str, dst: &str, gw: &str, priority: u32, action: Action) -> AclRule {
        AclRule::new(RuleKey::parse(src, dst, gw).unwrap(), priority, action)
    }

    #[test]
    fn test_priority_beats_specificity() {
        let mut rules = AclRules::default();
        rules.add(rule("*", "*", "*", 5, Action::Deny));
        rules.add(rule("svcA", "svcB", "*", 1, Action::Allow));

        assert_eq!(rules.evaluate(&Flow::new("svcA", "svcB", "gw1")), Action::Allow);
        assert_eq!(rules.evaluate(&Flow::new("svcA", "svcC", "gw1")), Action::Deny);

        // a wildcard rule with a higher precedence wins over a literal one
        rules.add(rule("*", "svcB", "*", 0, Action::Deny));
        assert_eq!(rules.evaluate(&Flow::new("svcA", "svcB", "gw1")), Action::Deny);
    }

    #[test]
    fn test_equal_priority_prefers_fewer_wildcards() {
        let mut rules = AclRules::default();
        rules.add(rule("svcA", "svcB", "gw1", 3, Action::Allow));
        rules.add(rule("svcA", "*", "*", 3, Action::Deny));
        assert_eq!(rules.evaluate(&Flow::new("svcA", "svcB", "gw1")), Action::Allow);
    }

    #[test]
    fn test_full_tie_prefers_most_recent() {
        let mut rules = AclRules::default();
        rules.add(rule("svcA", "*", "*", 2, Action::Allow));
        rules.add(rule("*", "svcB", "*", 2, Action::Deny));
        let flow = Flow::new("svcA", "svcB", "gw1");
        assert_eq!(rules.evaluate(&flow), Action::Deny);

        // re-adding refreshes recency
        rules.add(rule("svcA", "*", "*", 2, Action::Allow));
        assert_eq!(rules.evaluate(&flow), Action::Allow);
    }

    #[test]
    fn test_default_when_unmatched() {
        let flow = Flow::new("svcA", "svcB", "gw1");
        assert_eq!(AclRules::default().evaluate(&flow), Action::Deny);
        assert_eq!(AclRules::new(Action::Allow).evaluate(&flow), Action::Allow);
    }

    #[test]
    fn test_delete_is_keyed_and_idempotent() {
        let mut rules = AclRules::default();
        rules.add(rule("svcA", "svcB", "*", 1, Action::Allow));
        rules.add(rule("svcA", "svcB", "*", 7, Action::Deny));
        assert_eq!(rules.len(), 1);

        let key = RuleKey::parse("svcA", "svcB", "*").unwrap();
        assert!(rules.delete(&key));
        assert!(!rules.delete(&key));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_rules_listed_in_precedence_order() {
        let mut rules = AclRules::default();
        rules.add(rule("*", "*", "*", 5, Action::Deny));
        rules.add(rule("svcA", "*", "*", 1, Action::Allow));
        rules.add(rule("svcA", "svcB", "*", 1, Action::Deny));

        let order: Vec<String> = rules.rules().iter().map(|r| r.key.to_string()).collect();
        assert_eq!(order, vec!["svcA -> svcB @ *", "svcA -> * @ *", "* -> * @ *"]);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("0".parse::<Action>().unwrap(), Action::Allow);
        assert_eq!("Deny".parse::<Action>().unwrap(), Action::Deny);
        assert!("maybe".parse::<Action>().is_err());
    }
}
