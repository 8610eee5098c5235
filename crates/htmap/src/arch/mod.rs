//! Architecture-specific implementations for the hashed MMU.
//!
//! The translation format is always the 32-bit PowerPC OEA hashed page table. What changes
//! between backends is how the table becomes visible to hardware: on PowerPC the real TLB
//! and memory barriers are used, everywhere else a software backend emulates them so the
//! whole translation path can run on a host.

// Use the PowerPC hardware backend when we're on PowerPC and not testing or emulating.
// NOTE: We DO include the module whenever the target is PowerPC so that rust-analyzer can see it.
#[cfg(target_arch = "powerpc")]
mod powerpc;
#[cfg(all(target_arch = "powerpc", not(test), not(feature = "software-emulation")))]
pub use powerpc::*;

// Use software emulation when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled, OR
// - building for a host that has no hashed MMU at all
#[cfg(any(test, feature = "software-emulation", not(target_arch = "powerpc")))]
mod software;
#[cfg(any(test, feature = "software-emulation", not(target_arch = "powerpc")))]
pub use software::*;

/// Maximum number of bits in a physical address (32-bit real addressing).
pub const MAX_PHYSICAL_BITS: usize = 32;

/// Maximum number of bits in an effective (virtual) address.
pub const MAX_VIRTUAL_BITS: usize = 32;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of bits covered by the page offset.
pub const PAGE_SHIFT: usize = 12;

/// Number of bits covered by one segment (256 MiB).
pub const SEGMENT_SHIFT: usize = 28;

/// Number of segments in the effective address space.
pub const SEGMENT_COUNT: usize = 1 << (MAX_VIRTUAL_BITS - SEGMENT_SHIFT);

/// First address of the kernel half of the address space.
pub const KERNEL_BASE: usize = 0x8000_0000;

/// Last address of the kernel half of the address space.
pub const KERNEL_TOP: usize = 0xFFFF_FFFF;

/// Last address available to user address spaces.
pub const USER_TOP: usize = KERNEL_BASE - 1;

/// Validates a physical address.
///
/// Physical addresses must fit within 32 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    (addr as u64) >> MAX_PHYSICAL_BITS == 0
}

/// Validates a virtual address.
///
/// Effective addresses must fit within 32 bits.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    (addr as u64) >> MAX_VIRTUAL_BITS == 0
}

/// Returns true if the address lies in the kernel half of the address space.
#[inline]
pub const fn is_kernel_address(addr: usize) -> bool {
    addr >= KERNEL_BASE && addr <= KERNEL_TOP
}
