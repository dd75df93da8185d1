//! Target port reservations.
//!
//! The reservation table is namespace-scoped: within a namespace no two
//! Imports hold the same target port. Each namespace has its own lock, so
//! reservations in different namespaces never contend.

use link_api::conditions::TARGET_PORT_VALID;
use link_api::Import;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::CoreError;

/// Inclusive range target ports are allocated from when an Import does not
/// name one explicitly
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, CoreError> {
        if start == 0 || start > end {
            return Err(CoreError::InvalidConfiguration(format!(
                "invalid port range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    fn len(&self) -> u32 {
        u32::from(self.end - self.start) + 1
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 30000,
            end: 32767,
        }
    }
}

impl FromStr for PortRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidConfiguration(format!("invalid port range: {}", s));
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse().map_err(|_| invalid())?;
        let end = end.trim().parse().map_err(|_| invalid())?;
        PortRange::new(start, end)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Result of a reservation attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// The owner now holds `port`; `previous` is the port it released, if any
    Reserved { port: u16, previous: Option<u16> },
    /// `port` is held by another owner; the table is unchanged
    Conflict { port: u16, owner: String },
    /// No free port is left in the allocation range
    Exhausted,
}

#[derive(Default)]
struct NamespacePorts {
    by_port: BTreeMap<u16, String>,
    by_owner: HashMap<String, u16>,
}

impl NamespacePorts {
    fn take(&mut self, port: u16, owner: &str) -> Reservation {
        match self.by_port.get(&port) {
            Some(current) if current == owner => {
                return Reservation::Reserved {
                    port,
                    previous: None,
                }
            }
            Some(current) => {
                return Reservation::Conflict {
                    port,
                    owner: current.clone(),
                }
            }
            None => {}
        }

        let previous = self.by_owner.insert(owner.to_string(), port);
        if let Some(previous) = previous {
            self.by_port.remove(&previous);
        }
        self.by_port.insert(port, owner.to_string());
        Reservation::Reserved { port, previous }
    }
}

/// Namespace-scoped table of target port reservations
#[derive(Default)]
pub struct PortReservations {
    namespaces: Mutex<HashMap<String, Arc<Mutex<NamespacePorts>>>>,
    /// Namespaces where a port was freed since the last `take_freed`
    freed: Mutex<BTreeSet<String>>,
}

impl PortReservations {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, namespace: &str) -> Arc<Mutex<NamespacePorts>> {
        let mut namespaces = self
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    fn with_namespace<T>(&self, namespace: &str, f: impl FnOnce(&mut NamespacePorts) -> T) -> T {
        let ports = self.namespace(namespace);
        let mut ports = ports.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut ports)
    }

    fn note_freed(&self, namespace: &str) {
        self.freed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string());
    }

    fn note_moved(&self, namespace: &str, reservation: &Reservation) {
        if let Reservation::Reserved { previous: Some(_), .. } = reservation {
            self.note_freed(namespace);
        }
    }

    /// Drain the namespaces where a port became free since the last call.
    ///
    /// Imports waiting on a port in these namespaces may now reserve it.
    pub fn take_freed(&self) -> Vec<String> {
        let mut freed = self.freed.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *freed).into_iter().collect()
    }

    /// Reserve an explicit port for `owner`.
    ///
    /// A port already held by `owner` is a no-op. Reserving a new port moves
    /// the owner's reservation, releasing the port it held before. A port
    /// held by someone else is reported as a conflict without touching the
    /// table.
    pub fn reserve(&self, namespace: &str, port: u16, owner: &str) -> Reservation {
        let reservation = self.with_namespace(namespace, |ports| ports.take(port, owner));
        debug!(namespace, owner, port, ?reservation, "Port reservation");
        self.note_moved(namespace, &reservation);
        reservation
    }

    /// Allocate a port from `range` for `owner`.
    ///
    /// An owner already holding a port in range keeps it. Otherwise the
    /// starting candidate is derived from `seed` and probed upwards (wrapping)
    /// until a free port is found.
    pub fn allocate(&self, namespace: &str, owner: &str, range: &PortRange, seed: &str) -> Reservation {
        let reservation = self.with_namespace(namespace, |ports| {
            if let Some(port) = ports.by_owner.get(owner).copied() {
                if range.contains(port) {
                    return Reservation::Reserved {
                        port,
                        previous: None,
                    };
                }
            }

            let offset = derived_offset(seed, range);
            for step in 0..range.len() {
                let port = range.start + ((offset + step) % range.len()) as u16;
                if !ports.by_port.contains_key(&port) {
                    return ports.take(port, owner);
                }
            }

            warn!(namespace, owner, %range, "Port range exhausted");
            Reservation::Exhausted
        });
        self.note_moved(namespace, &reservation);
        reservation
    }

    /// Release whatever port `owner` holds, returning it
    pub fn release(&self, namespace: &str, owner: &str) -> Option<u16> {
        let released = self.with_namespace(namespace, |ports| {
            let port = ports.by_owner.remove(owner)?;
            ports.by_port.remove(&port);
            Some(port)
        });
        if let Some(port) = released {
            debug!(namespace, owner, port, "Released port reservation");
            self.note_freed(namespace);
        }
        released
    }

    pub fn owner_of(&self, namespace: &str, port: u16) -> Option<String> {
        self.with_namespace(namespace, |ports| ports.by_port.get(&port).cloned())
    }

    pub fn port_of(&self, namespace: &str, owner: &str) -> Option<u16> {
        self.with_namespace(namespace, |ports| ports.by_owner.get(owner).copied())
    }

    /// Rebuild the table from the current set of Imports.
    ///
    /// Imports that held a valid port before go first, so that a restart
    /// hands ports back to their previous holders; the rest follow in
    /// creation order.
    pub fn rebuild(&self, imports: &[Import], range: &PortRange) {
        let mut ordered: Vec<&Import> = imports.iter().collect();
        ordered.sort_by_key(|imp| {
            (
                !imp.condition_is_true(TARGET_PORT_VALID),
                imp.metadata.creation_timestamp.as_ref().map(|t| t.0),
                imp.key(),
            )
        });

        for imp in ordered {
            let key = imp.key();
            let recorded = imp.status.as_ref().and_then(|s| s.target_port);
            match (imp.spec.target_port, recorded) {
                (Some(port), _) => {
                    self.reserve(&key.namespace, port, &key.name);
                }
                (None, Some(port)) if range.contains(port) => {
                    if let Reservation::Conflict { .. } = self.reserve(&key.namespace, port, &key.name) {
                        self.allocate(&key.namespace, &key.name, range, &key.to_string());
                    }
                }
                (None, _) => {
                    self.allocate(&key.namespace, &key.name, range, &key.to_string());
                }
            }
        }
    }
}

fn derived_offset(seed: &str, range: &PortRange) -> u32 {
    let digest = Sha256::digest(seed.as_bytes());
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    value % range.len()
}
