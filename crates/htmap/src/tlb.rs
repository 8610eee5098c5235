//! Translation cache invalidation capability.

use alloc::sync::Arc;

use crate::{VirtualAddress, VirtualSegmentId};

/// Invalidates hardware translation caches.
///
/// Implementations must have completed the invalidation, on every processor that may hold
/// the translation, by the time a call returns.
pub trait Tlb: Send + Sync {
    /// Drops every cached translation.
    fn invalidate_all(&self);

    /// Drops any cached translation for `address` in segment `vsid`.
    fn invalidate_address(&self, vsid: VirtualSegmentId, address: VirtualAddress);
}

impl<T: Tlb + ?Sized> Tlb for Arc<T> {
    fn invalidate_all(&self) {
        (**self).invalidate_all();
    }

    fn invalidate_address(&self, vsid: VirtualSegmentId, address: VirtualAddress) {
        (**self).invalidate_address(vsid, address);
    }
}
