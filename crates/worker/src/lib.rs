// Path: crates/worker/src/lib.rs
//! # Mech Worker
//!
//! The worker pipeline, in dependency order: the service registry loads the
//! on-disk profiles; the activity monitor does the gas-free eligibility math
//! against staking contracts; the rotator picks the service to serve; the
//! capability probe learns what this operator can do; intake discovers and
//! leases requests; the runner executes the agent subprocess; the delivery
//! engine publishes the result on-chain through the Safe.
//!
//! One request is in flight per worker at any time. Rotation only ever
//! happens between poll-loop iterations, never under an open claim.

pub mod active;
pub mod capability;
pub mod delivery;
pub mod indexer;
pub mod intake;
pub mod monitor;
pub mod registry;
pub mod rotator;
pub mod runner;
pub mod tracker;
pub mod worker;

pub use active::{ActiveService, ActiveServiceSlot};
pub use delivery::{DeliveryConfig, DeliveryEngine};
pub use intake::{LeaseBroker, RequestIntake, RequestSource};
pub use monitor::{ActivityCheck, ActivityMonitor};
pub use registry::ServiceRegistry;
pub use rotator::{RotationDecision, ServiceRotator};
pub use runner::{AgentRunner, RuntimeContext};
pub use tracker::TransactionTracker;
pub use worker::Worker;
