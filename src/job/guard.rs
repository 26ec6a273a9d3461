//! Release of cached detection and segmentation models.

use std::sync::Arc;

use tracing::debug;

use crate::backends::oracle::ModelCache;

/// Why cached models are being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Interrupted,
    ItemFailed,
    Requested,
}

/// Releases the shared model cache on interruption, item failure or request.
///
/// The automatic paths only fire when the auto-unload policy is enabled.
/// Releasing an already empty cache is a no-op, so redundant calls are fine.
#[derive(Clone)]
pub struct ResourceGuard {
    cache: Arc<dyn ModelCache>,
    auto_unload: bool,
}

impl ResourceGuard {
    pub fn new(cache: Arc<dyn ModelCache>, auto_unload: bool) -> Self {
        Self { cache, auto_unload }
    }

    /// Releases models if the auto-unload policy is enabled. Returns whether it did.
    pub fn release_if_enabled(&self, reason: ReleaseReason) -> bool {
        if !self.auto_unload {
            return false;
        }
        self.release(reason);
        true
    }

    pub fn release(&self, reason: ReleaseReason) {
        debug!(?reason, "releasing cached detection models");
        self.cache.unload();
    }
}
