// Path: crates/types/src/lib.rs
//! # Mech Worker Types
//!
//! Shared data model for the worker node: services and their on-chain
//! identity, marketplace requests, staking activity math, delivery payloads,
//! capability profiles, configuration, and the error taxonomy with stable
//! machine-readable codes.

pub mod activity;
pub mod capability;
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod request;
pub mod service;

pub use activity::{ActivityStatus, SAFETY_MARGIN};
pub use capability::{
    required_credentials, required_operator_capabilities, CapabilityProfile,
};
pub use delivery::{AgentResult, ArtifactRef, DeliveryOutcome, DeliveryPayload, FinalStatus};
pub use envelope::{Envelope, Meta};
pub use error::ErrorCode;
pub use request::{ClaimOutcome, LeaseToken, MarketRequest};
pub use service::{Service, ServiceProfile};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
///
/// Clock-before-epoch is treated as zero rather than a panic path; every
/// consumer of this value already tolerates a stale timestamp.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
