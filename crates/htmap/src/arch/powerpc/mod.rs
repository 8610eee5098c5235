//! 32-bit PowerPC hardware implementation.
//!
//! The hashed page table is plain memory; what this backend adds are the storage barriers
//! that order page table updates against the hardware table walker, and the `tlbie`
//! sequence that drops stale translations on every processor.

use core::arch::asm;

use crate::{Tlb, VirtualAddress, VirtualSegmentId};

/// The TLB implementation used by default on this backend.
pub type DefaultTlb = HardwareTlb;

/// External interrupt enable bit of the machine state register.
const MSR_EE: usize = 1 << 15;

/// `tlbie` selects a TLB congruence class by effective address bits 14-19, so touching one
/// address per page over this range hits every class.
const TLB_CONGRUENCE_RANGE: usize = 0x0004_0000;

/// Orders stores to the page table.
#[inline]
pub fn store_barrier() {
    // SAFETY: eieio only orders storage accesses.
    unsafe { asm!("eieio", options(nostack, preserves_flags)) };
}

/// Waits for all preceding storage accesses to complete.
#[inline]
pub fn sync() {
    // SAFETY: sync only orders storage accesses.
    unsafe { asm!("sync", options(nostack, preserves_flags)) };
}

/// Runs `f` with external interrupts disabled, restoring the previous state afterwards.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let msr: usize;
    // SAFETY: reading the MSR has no side effects.
    unsafe { asm!("mfmsr {0}", out(reg) msr, options(nomem, nostack, preserves_flags)) };

    let enabled = msr & MSR_EE != 0;
    if enabled {
        // SAFETY: clearing EE only masks external interrupts.
        unsafe { asm!("mtmsr {0}", "isync", in(reg) msr & !MSR_EE, options(nostack)) };
    }

    let result = f();

    if enabled {
        // SAFETY: restores the MSR read above.
        unsafe { asm!("mtmsr {0}", "isync", in(reg) msr, options(nostack)) };
    }
    result
}

#[inline]
fn tlbie(address: usize) {
    // SAFETY: invalidating a TLB entry only forces the next access to walk the page table.
    unsafe { asm!("tlbie {0}", in(reg) address, options(nostack, preserves_flags)) };
}

#[inline]
fn tlbsync() {
    // SAFETY: waits for outstanding tlbie broadcasts.
    unsafe { asm!("tlbsync", options(nostack, preserves_flags)) };
}

/// The processor's TLB.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareTlb;

impl Tlb for HardwareTlb {
    fn invalidate_all(&self) {
        sync();
        for address in (0..TLB_CONGRUENCE_RANGE).step_by(super::PAGE_SIZE) {
            tlbie(address);
        }
        store_barrier();
        tlbsync();
        sync();
    }

    fn invalidate_address(&self, _vsid: VirtualSegmentId, address: VirtualAddress) {
        // tlbie matches on the effective address alone and drops the entry in every segment.
        sync();
        tlbie(address.as_usize());
        store_barrier();
        tlbsync();
        sync();
    }
}
