//! Datum Link API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resources and object metadata
//! conventions for the datum-cloud service link:
//! - Import: a remote service exported by a peer that should appear locally
//! - Labels and annotations stamped on objects managed for an Import
//! - Status condition types and reasons

pub mod conditions;
pub mod key;
pub mod labels;
pub mod naming;
pub mod v1alpha1;

pub use conditions::Condition;
pub use key::ImportKey;
pub use v1alpha1::{Import, ImportSource, ImportSpec, ImportStatus};
