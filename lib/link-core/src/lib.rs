//! Core Import reconciliation functionality
//!
//! This library provides:
//! - Target port reservations per namespace
//! - Ownership classification of local Services and EndpointSlices
//! - Endpoint synchronization against the local dataplane
//! - The Import reconciler, its work queue and retry policy

pub mod endpoint;
pub mod endpoints;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod ownership;
pub mod ports;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod triggers;

pub use endpoint::Endpoint;
pub use error::{CoreError, Result};
pub use memory::MemoryStore;
pub use metrics::ReconcileMetrics;
pub use ports::{PortRange, PortReservations, Reservation};
pub use queue::{ReconcileTicket, WorkQueue};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use retry::RetryPolicy;
pub use store::ObjectStore;
