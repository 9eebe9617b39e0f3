// Path: crates/worker/src/active.rs
//! The process-wide active-service slot.
//!
//! Set by the rotation shim between poll cycles, read by intake and the
//! delivery engine. The slot must never change while an uncompleted delivery
//! exists for a claimed request; the worker loop enforces this by draining
//! the in-flight claim before re-evaluating rotation.

use mech_chain::{EthSigner, SafeRouter};
use mech_types::Service;
use parking_lot::RwLock;
use std::sync::Arc;

/// The selected service plus its signing and routing material.
pub struct ActiveService {
    pub service: Service,
    pub signer: Arc<EthSigner>,
    pub router: Arc<SafeRouter>,
}

#[derive(Clone, Default)]
pub struct ActiveServiceSlot {
    inner: Arc<RwLock<Option<Arc<ActiveService>>>>,
}

impl ActiveServiceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, active: Arc<ActiveService>) {
        *self.inner.write() = Some(active);
    }

    pub fn get(&self) -> Option<Arc<ActiveService>> {
        self.inner.read().clone()
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn current_config_id(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .map(|a| a.service.service_config_id.clone())
    }
}
