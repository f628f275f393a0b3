//! Network reachability capability.
//!
//! Delivery consults this before every request so an offline device does
//! not burn a transport timeout per queued event.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Reports whether the collector is worth trying right now.
pub trait Connectivity: Send + Sync + std::fmt::Debug {
    /// Returns `false` when the network is known to be unreachable.
    fn is_reachable(&self) -> bool;
}

/// Connectivity for hosts without a reachability signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl Connectivity for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Reachability flag driven by the host's own network notifications.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    reachable: Arc<AtomicBool>,
}

impl ManualConnectivity {
    /// Creates a flag with the given initial state.
    pub fn new(reachable: bool) -> Self {
        Self { reachable: Arc::new(AtomicBool::new(reachable)) }
    }

    /// Updates reachability.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ManualConnectivity {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }
}
