// Path: crates/proxy/src/identity.rs
//! The process-wide active identity consumed by the proxy.
//!
//! The rotation shim writes this slot between poll cycles; request handlers
//! read it per call so a rotation never requires a proxy restart. The slot
//! is never swapped while a delivery is in flight (the worker loop drains
//! the claim first).

use alloy_primitives::Address;
use mech_chain::{EthSigner, SafeRouter};
use parking_lot::RwLock;
use std::sync::Arc;

/// Signing/routing material of the currently selected service.
#[derive(Clone)]
pub struct ActiveIdentity {
    pub service_config_id: String,
    /// The mech this service operates; dispatches name it as priority mech.
    pub mech: Address,
    pub signer: Arc<EthSigner>,
    pub router: Arc<SafeRouter>,
    /// Marketplace the dispatch path posts requests to.
    pub marketplace: Option<Address>,
}

pub type IdentitySlot = Arc<RwLock<Option<ActiveIdentity>>>;

pub fn new_identity_slot() -> IdentitySlot {
    Arc::new(RwLock::new(None))
}
