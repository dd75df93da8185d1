//! Work queue of reconciliation requests.
//!
//! Keys are deduplicated while pending and serialized while active: a key is
//! handed to at most one worker at a time. An event for an active key marks
//! it dirty and supersedes the worker's ticket; the key is queued again when
//! the worker calls [`WorkQueue::done`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Handle a worker uses to notice that its pass was superseded
#[derive(Clone, Debug)]
pub struct ReconcileTicket {
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl ReconcileTicket {
    /// A ticket that is never superseded, for one-off reconciliations
    pub fn detached() -> Self {
        Self {
            epoch: 0,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.epoch
    }
}

struct QueueState<K> {
    pending: VecDeque<K>,
    queued: HashSet<K>,
    active: HashSet<K>,
    dirty: HashSet<K>,
    epochs: HashMap<K, Arc<AtomicU64>>,
    shutdown: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            queued: HashSet::new(),
            active: HashSet::new(),
            dirty: HashSet::new(),
            epochs: HashMap::new(),
            shutdown: false,
        }
    }
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request reconciliation of `key`
    pub fn enqueue(&self, key: K) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }

        state
            .epochs
            .entry(key.clone())
            .or_default()
            .fetch_add(1, Ordering::SeqCst);

        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if !state.queued.insert(key.clone()) {
            return;
        }
        state.pending.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn next(&self) -> Option<(K, ReconcileTicket)> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    let current = state.epochs.entry(key.clone()).or_default().clone();
                    let ticket = ReconcileTicket {
                        epoch: current.load(Ordering::SeqCst),
                        current,
                    };
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some((key, ticket));
                }
            }

            notified.await;
        }
    }

    /// Mark `key` finished, queueing it again if events arrived meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.active.remove(key);
        if state.dirty.remove(key) && !state.shutdown {
            state.queued.insert(key.clone());
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        } else if !state.queued.contains(key) {
            state.epochs.remove(key);
        }
    }

    /// Stop handing out keys and wake all waiting workers
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
