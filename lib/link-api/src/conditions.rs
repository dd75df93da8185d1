//! Status conditions for Import resources.
//!
//! Conditions follow a "last write wins" rule: a condition is only rewritten
//! when its status, reason or message changes. Messages are derived from
//! observed state, so repeated reconciliation of an unchanged Import never
//! touches its status.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The Import's local service exists, is owned correctly and has endpoints attached
pub const SERVICE_VALID: &str = "ServiceValid";
/// The Import's effective target port is reserved without conflict
pub const TARGET_PORT_VALID: &str = "TargetPortValid";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

/// Reasons recorded on Import conditions
pub mod reasons {
    /// Service exists, is owned by the Import, and endpoints are attached
    pub const SERVICE_READY: &str = "ServiceReady";
    /// Another Import or an unrelated actor owns the service identity
    pub const SERVICE_CONFLICT: &str = "ServiceConflict";
    /// A merge import's service does not exist yet
    pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";
    /// The target port is reserved for the Import
    pub const PORT_RESERVED: &str = "PortReserved";
    /// The target port is claimed by another Import in the namespace
    pub const PORT_CONFLICT: &str = "PortConflict";
    /// No port is free in the configured allocation range
    pub const PORT_EXHAUSTED: &str = "PortRangeExhausted";
    /// The service is not valid because the target port is not
    pub const TARGET_PORT_INVALID: &str = "TargetPortInvalid";
    /// The Import name cannot be used as a service name
    pub const INVALID_NAME: &str = "InvalidName";
    /// Transient store failures persisted beyond the retry bound
    pub const RETRY_EXHAUSTED: &str = "RetryExhausted";
    /// A non-transient error stopped reconciliation
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Condition for Import status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status: "True" or "False"
    pub status: String,

    /// Reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == STATUS_TRUE
    }
}

/// Find a condition by type
pub fn find<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Set a condition, returning whether anything changed.
///
/// The condition is only rewritten when its status, reason or message differs
/// from the recorded one. The transition time only moves when the status flips.
pub fn set(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    value: bool,
    reason: &str,
    message: impl Into<String>,
) -> bool {
    let status = if value { STATUS_TRUE } else { STATUS_FALSE };

    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            let message = message.into();
            if existing.status == status && existing.reason == reason && existing.message == message {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = Some(Utc::now().to_rfc3339());
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message;
            true
        }
        None => {
            conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.into(),
                last_transition_time: Some(Utc::now().to_rfc3339()),
            });
            true
        }
    }
}
