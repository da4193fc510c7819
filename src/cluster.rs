//! Cluster role capability.
//!
//! Only the primary node persists chunks, and a secondary hides its partial
//! leading chunk from queries. The engine reads the role through this small
//! trait so deployments (and tests) stay in control of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Role oracle consulted under the series lock. Cheap; may change at any time.
pub trait NodeRole: std::fmt::Debug + Send + Sync + 'static {
    fn is_primary(&self) -> bool;
}

/// Settable role handle backed by an atomic flag.
#[derive(Debug)]
pub struct ClusterStatus {
    primary: AtomicBool,
}

impl ClusterStatus {
    pub fn new(primary: bool) -> Self {
        ClusterStatus {
            primary: AtomicBool::new(primary),
        }
    }

    /// Flips the role; takes effect on the next read.
    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::Relaxed);
    }
}

impl NodeRole for ClusterStatus {
    #[inline]
    fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Relaxed)
    }
}

/// Shorthand for a fixed-primary handle.
pub fn primary_role() -> Arc<dyn NodeRole> {
    Arc::new(ClusterStatus::new(true))
}
