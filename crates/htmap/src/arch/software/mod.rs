//! Software emulation implementation for testing and development.
//!
//! This module provides an emulated hashed MMU that can run on any host. The hashed page
//! table itself is ordinary memory on every backend; what is emulated here is the hardware
//! around it:
//! - barriers map to atomic fences
//! - the TLB records invalidation requests instead of issuing them
//! - [`SoftwareMmu`] walks the hashed page table the way the hardware does on a TLB miss,
//!   including setting the referenced and changed bits
//!
//! Interrupts do not exist on a host, so [`without_interrupts`] just runs the closure.

mod mmu;
mod tlb;

pub use mmu::{AccessFault, SoftwareMmu};
pub use tlb::{SoftwareTlb, TlbEvent};

use core::sync::atomic::{Ordering, fence};

/// The TLB implementation used by default on this backend.
pub type DefaultTlb = SoftwareTlb;

/// Orders stores to the page table (`eieio` on hardware).
#[inline]
pub fn store_barrier() {
    fence(Ordering::Release);
}

/// Waits for all preceding page table accesses to complete (`sync` on hardware).
#[inline]
pub fn sync() {
    fence(Ordering::SeqCst);
}

/// Runs `f` with interrupts disabled.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}
