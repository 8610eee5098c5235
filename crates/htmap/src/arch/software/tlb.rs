//! Recording TLB for software emulation.

use alloc::vec::Vec;

use crate::{Tlb, VirtualAddress, VirtualSegmentId};

/// An invalidation request seen by a [`SoftwareTlb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbEvent {
    /// The whole TLB was flushed.
    InvalidateAll,
    /// A single translation was invalidated.
    Invalidate {
        vsid: VirtualSegmentId,
        address: VirtualAddress,
    },
}

/// A TLB that holds no translations and records every invalidation it is asked for.
#[derive(Debug, Default)]
pub struct SoftwareTlb {
    events: spin::Mutex<Vec<TlbEvent>>,
}

impl SoftwareTlb {
    /// Creates a TLB with an empty event log.
    pub const fn new() -> Self {
        Self {
            events: spin::Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of the event log.
    pub fn events(&self) -> Vec<TlbEvent> {
        self.events.lock().clone()
    }

    /// Returns the event log and clears it.
    pub fn take_events(&self) -> Vec<TlbEvent> {
        core::mem::take(&mut *self.events.lock())
    }

    /// Returns how many times `address` was invalidated in segment `vsid`.
    pub fn invalidations_of(&self, vsid: VirtualSegmentId, address: VirtualAddress) -> usize {
        let wanted = TlbEvent::Invalidate { vsid, address };
        self.events
            .lock()
            .iter()
            .filter(|event| **event == wanted)
            .count()
    }

    /// Returns how many full flushes were requested.
    pub fn flushes(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, TlbEvent::InvalidateAll))
            .count()
    }
}

impl Tlb for SoftwareTlb {
    fn invalidate_all(&self) {
        self.events.lock().push(TlbEvent::InvalidateAll);
    }

    fn invalidate_address(&self, vsid: VirtualSegmentId, address: VirtualAddress) {
        log::trace!("tlbie {address} (vsid {vsid})");
        self.events
            .lock()
            .push(TlbEvent::Invalidate { vsid, address });
    }
}
