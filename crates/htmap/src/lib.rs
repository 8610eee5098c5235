#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]
#![cfg_attr(target_arch = "powerpc", feature(asm_experimental_arch))]

//! # Hashed Translation Map (htmap)
//!
//! Virtual-to-physical translation for MMUs that walk a hashed page table instead of a
//! tree: the 32-bit PowerPC OEA design. It provides:
//!
//! - The hashed page table itself, with primary/secondary group placement.
//! - Address space identifiers and the per-address-space [`TranslationMap`].
//! - A lock-free [`BootstrapMapper`] for mappings made before the kernel is up.
//! - The I/O window used to reach arbitrary physical pages.
//! - Software emulation of the TLB and MMU for testing in non-kernel environments.

extern crate alloc;

mod address;
mod arch;
mod asid;
mod bootstrap;
mod entry;
mod error;
mod flags;
mod hash_table;
mod io_window;
mod mmu;
mod numbers;
mod tlb;
mod translation_map;

pub use address::{PhysicalAddress, VirtualAddress};
pub use asid::{Asid, AsidAllocator, MAX_ASIDS, VSID_BASE_SHIFT};
pub use bootstrap::BootstrapMapper;
pub use entry::{
    ENTRIES_PER_GROUP, EntryLower, EntryUpper, PageProtection, PageTableEntry,
    PageTableEntryGroup, VirtualSegmentId, abbreviated_page_index, primary_hash, secondary_hash,
};
pub use error::{Error, Fatal, FatalHandler, fatal, set_fatal_handler};
pub use flags::PageFlags;
pub use hash_table::{HashedPageTable, MAX_GROUPS, MIN_GROUPS, Placement};
pub use io_window::{IO_WINDOW_BASE, IO_WINDOW_SIZE, IoWindow, IoWindowConfig};
pub use mmu::{BootArgs, Mmu, PageTableRegion, current, init, try_current};
pub use numbers::{FrameNumber, PageNumber, PageRange};
pub use tlb::Tlb;
pub use translation_map::{LockedMap, TranslationMap};

pub use arch::{DefaultTlb, KERNEL_BASE, PAGE_SIZE, USER_TOP};

#[cfg(any(test, feature = "software-emulation", not(target_arch = "powerpc")))]
pub use arch::{AccessFault, SoftwareMmu, SoftwareTlb, TlbEvent};

#[cfg(test)]
pub(crate) use error::catch_fatal;
