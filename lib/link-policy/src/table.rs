//! Keyed rule storage shared by the ACL and load-balancing rule sets

use std::collections::BTreeMap;

use crate::pattern::{Flow, RuleKey};

/// A rule stored under its [`RuleKey`]
pub(crate) trait Keyed {
    fn key(&self) -> &RuleKey;
}

#[derive(Clone, Debug)]
pub(crate) struct Entry<T> {
    pub rule: T,
    /// Insertion sequence; higher is more recent
    pub seq: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct RuleTable<T> {
    entries: BTreeMap<RuleKey, Entry<T>>,
    next_seq: u64,
}

impl<T> Default for RuleTable<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T: Keyed> RuleTable<T> {
    /// Insert or replace; a replaced rule counts as newly inserted
    pub fn insert(&mut self, rule: T) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.insert(rule.key().clone(), Entry { rule, seq });
    }

    pub fn remove(&mut self, key: &RuleKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn matching<'a: 'f, 'f>(&'a self, flow: &'f Flow) -> impl Iterator<Item = &'a Entry<T>> + 'f {
        self.entries.values().filter(move |e| e.rule.key().matches(flow))
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
