//! Hashed page table entries and entry groups.
//!
//! A page table entry is two 32-bit words. The hardware fetches the upper word first and
//! only looks at the rest of the entry if its valid bit is set, so the lower word is always
//! written before the upper word turns the entry on.
//!
//! ```text
//! upper: | V | VSID (24) | H | API (6) |
//! lower: | RPN (20) | /// | R | C | W | I | M | G | / | PP (2) |
//! ```
//!
//! Field declarations below are LSB-first, the reverse of the big-endian bit numbering used
//! by the architecture manuals.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use bitfield_struct::bitfield;

use crate::{PageFlags, PhysicalAddress, VirtualAddress, arch};

/// Number of entries in one group.
pub const ENTRIES_PER_GROUP: usize = 8;

/// Mask applied to the VSID before it enters the primary hash.
const HASH_VSID_MASK: u32 = 0x7_FFFF;

/// Mask applied to the page index before it enters the primary hash.
const HASH_PAGE_INDEX_MASK: u32 = 0xFFFF;

/// Upper word of a page table entry.
#[bitfield(u32)]
pub struct EntryUpper {
    /// Abbreviated page index: the six most significant bits of the page index.
    #[bits(6)]
    pub abbreviated_page_index: u8,
    /// Set when the entry was placed through the secondary hash.
    pub secondary_hash: bool,
    /// Virtual segment id of the owning address space.
    #[bits(24)]
    pub virtual_segment_id: u32,
    /// Entry is a live translation.
    pub valid: bool,
}

/// Lower word of a page table entry.
#[bitfield(u32)]
pub struct EntryLower {
    /// Page protection (PP) bits, see [`PageProtection`].
    #[bits(2)]
    pub page_protection: u8,
    #[bits(1)]
    __reserved1: u8,
    /// Guarded storage.
    pub guarded: bool,
    /// Memory coherence required.
    pub memory_coherent: bool,
    /// Caching inhibited.
    pub caching_inhibited: bool,
    /// Write-through.
    pub write_through: bool,
    /// Changed (dirty) bit, set by hardware on store.
    pub changed: bool,
    /// Referenced bit, set by hardware on any access.
    pub referenced: bool,
    #[bits(3)]
    __reserved0: u8,
    /// Physical page number.
    #[bits(20)]
    pub physical_page_number: u32,
}

const UPPER_VALID: u32 = EntryUpper::new().with_valid(true).into_bits();
const LOWER_REFERENCED: u32 = EntryLower::new().with_referenced(true).into_bits();
const LOWER_CHANGED: u32 = EntryLower::new().with_changed(true).into_bits();
const LOWER_PROTECTION: u32 = EntryLower::new().with_page_protection(0b11).into_bits();

/// A virtual segment id: the address-space tag stored in every entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtualSegmentId(u32);

impl VirtualSegmentId {
    /// Largest representable VSID (24 bits).
    pub const MAX: u32 = (1 << 24) - 1;

    /// Creates a new VSID.
    ///
    /// # Panics
    ///
    /// Panics if the value does not fit in 24 bits.
    #[inline]
    pub const fn new(vsid: u32) -> Self {
        assert!(vsid <= Self::MAX, "virtual segment id exceeds 24 bits");
        Self(vsid)
    }

    /// Returns the raw VSID.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for VirtualSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualSegmentId({:#x})", self.0)
    }
}

impl fmt::Display for VirtualSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The primary hash of a (VSID, address) pair.
#[inline]
pub const fn primary_hash(vsid: VirtualSegmentId, address: VirtualAddress) -> u32 {
    let page_index = (address.as_usize() >> arch::PAGE_SHIFT) as u32 & HASH_PAGE_INDEX_MASK;
    (vsid.as_u32() & HASH_VSID_MASK) ^ page_index
}

/// The secondary hash, derived from the primary one.
#[inline]
pub const fn secondary_hash(primary: u32) -> u32 {
    !primary
}

/// The abbreviated page index stored in an entry to tell apart pages sharing a group.
#[inline]
pub const fn abbreviated_page_index(address: VirtualAddress) -> u8 {
    ((address.as_usize() >> 22) & 0x3F) as u8
}

/// Page protection encoded in the PP bits.
///
/// Supervisor accesses use key 0 and user accesses key 1, which gives:
///
/// | PP | supervisor | user       |
/// |----|------------|------------|
/// | 00 | read/write | none       |
/// | 01 | read/write | read-only  |
/// | 10 | read/write | read/write |
/// | 11 | read-only  | read-only  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageProtection {
    /// Supervisor read/write, no user access.
    SupervisorOnly = 0b00,
    /// Supervisor read/write, user read-only.
    UserReadOnly = 0b01,
    /// Read/write for everyone.
    ReadWrite = 0b10,
    /// Read-only for everyone.
    ReadOnly = 0b11,
}

impl PageProtection {
    /// Decodes the PP bits.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::SupervisorOnly,
            0b01 => Self::UserReadOnly,
            0b10 => Self::ReadWrite,
            _ => Self::ReadOnly,
        }
    }

    /// Derives the PP bits for a set of area attributes.
    ///
    /// User-visible areas get `ReadWrite` or `ReadOnly` depending on the user write bit.
    /// Kernel-only areas always get `SupervisorOnly`: the only PP value that read-protects
    /// supervisor memory also opens it to user reads.
    pub fn from_attributes(attributes: PageFlags) -> Self {
        if attributes.intersects(PageFlags::USER_PROTECTION) {
            if attributes.contains(PageFlags::WRITE) {
                Self::ReadWrite
            } else {
                Self::ReadOnly
            }
        } else {
            Self::SupervisorOnly
        }
    }

    /// Reports the protection as area attributes.
    ///
    /// Kernel addresses are never user-visible, so only the kernel bits are reported for them.
    pub fn to_attributes(self, kernel_address: bool) -> PageFlags {
        if kernel_address {
            return match self {
                Self::ReadOnly => PageFlags::KERNEL_READ,
                _ => PageFlags::KERNEL_READ | PageFlags::KERNEL_WRITE,
            };
        }

        match self {
            Self::SupervisorOnly => PageFlags::KERNEL_READ | PageFlags::KERNEL_WRITE,
            Self::UserReadOnly => {
                PageFlags::KERNEL_READ | PageFlags::KERNEL_WRITE | PageFlags::READ
            }
            Self::ReadWrite => {
                PageFlags::KERNEL_READ
                    | PageFlags::KERNEL_WRITE
                    | PageFlags::READ
                    | PageFlags::WRITE
            }
            Self::ReadOnly => PageFlags::KERNEL_READ | PageFlags::READ,
        }
    }

    /// Returns whether an access is permitted.
    pub const fn allows(self, user: bool, write: bool) -> bool {
        match (self, user) {
            (Self::ReadOnly, _) => !write,
            (_, false) => true,
            (Self::SupervisorOnly, true) => false,
            (Self::UserReadOnly, true) => !write,
            (Self::ReadWrite, true) => true,
        }
    }
}

/// A single hashed page table entry.
///
/// Both words are atomics: the hardware and other CPUs may read the entry while it is
/// being written, and the hardware sets the referenced and changed bits on its own.
#[repr(C)]
pub struct PageTableEntry {
    upper: AtomicU32,
    lower: AtomicU32,
}

impl PageTableEntry {
    /// Creates an invalid entry.
    pub const fn empty() -> Self {
        Self {
            upper: AtomicU32::new(0),
            lower: AtomicU32::new(0),
        }
    }

    /// Returns the upper word.
    #[inline]
    pub fn upper(&self) -> EntryUpper {
        EntryUpper::from_bits(self.upper.load(Ordering::Acquire))
    }

    /// Returns the lower word.
    #[inline]
    pub fn lower(&self) -> EntryLower {
        EntryLower::from_bits(self.lower.load(Ordering::Acquire))
    }

    /// Returns whether the entry is a live translation.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.upper().valid()
    }

    /// Returns whether the entry is the valid translation for the given tag.
    #[inline]
    pub fn matches(&self, vsid: VirtualSegmentId, secondary: bool, api: u8) -> bool {
        let upper = self.upper();
        upper.valid()
            && upper.virtual_segment_id() == vsid.as_u32()
            && upper.secondary_hash() == secondary
            && upper.abbreviated_page_index() == api
    }

    /// Returns the physical address this entry translates to.
    pub fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new((self.lower().physical_page_number() as usize) << arch::PAGE_SHIFT)
    }

    /// Returns the page protection.
    pub fn protection(&self) -> PageProtection {
        PageProtection::from_bits(self.lower().page_protection())
    }

    /// Reports the page state bits (`PRESENT`, `ACCESSED`, `MODIFIED`).
    pub fn state(&self) -> PageFlags {
        let mut flags = PageFlags::empty();
        let lower = self.lower();
        flags.set(PageFlags::PRESENT, self.is_valid());
        flags.set(PageFlags::ACCESSED, lower.referenced());
        flags.set(PageFlags::MODIFIED, lower.changed());
        flags
    }

    /// Writes a new translation into this slot and makes it valid.
    pub(crate) fn fill(
        &self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        physical: PhysicalAddress,
        protection: PageProtection,
        secondary: bool,
    ) {
        let lower = EntryLower::new()
            .with_physical_page_number(physical.frame_number().as_usize() as u32)
            .with_page_protection(protection as u8);
        self.lower.store(lower.into_bits(), Ordering::Relaxed);

        // The lower word must be visible before the entry becomes valid.
        arch::store_barrier();

        let upper = EntryUpper::new()
            .with_abbreviated_page_index(abbreviated_page_index(address))
            .with_secondary_hash(secondary)
            .with_virtual_segment_id(vsid.as_u32())
            .with_valid(true);
        self.upper.store(upper.into_bits(), Ordering::Release);

        arch::sync();
    }

    /// Clears the valid bit. The caller invalidates the TLB afterwards.
    pub(crate) fn invalidate(&self) {
        self.upper.fetch_and(!UPPER_VALID, Ordering::AcqRel);
        arch::sync();
    }

    /// Clears the referenced and/or changed bits, returning whether any bit was set.
    pub(crate) fn clear_state(&self, referenced: bool, changed: bool) -> bool {
        let mut mask = 0;
        if referenced {
            mask |= LOWER_REFERENCED;
        }
        if changed {
            mask |= LOWER_CHANGED;
        }
        let old = self.lower.fetch_and(!mask, Ordering::AcqRel);
        old & mask != 0
    }

    /// Rewrites the PP bits in place, returning whether they changed.
    pub(crate) fn set_protection(&self, protection: PageProtection) -> bool {
        let bits = protection as u32;
        let old = self
            .lower
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |lower| {
                Some((lower & !LOWER_PROTECTION) | bits)
            })
            .unwrap_or_else(|lower| lower);
        old & LOWER_PROTECTION != bits
    }

    /// Sets the referenced bit, and the changed bit for stores, the way the hardware does.
    pub(crate) fn record_access(&self, write: bool) {
        let mut bits = LOWER_REFERENCED;
        if write {
            bits |= LOWER_CHANGED;
        }
        self.lower.fetch_or(bits, Ordering::AcqRel);
    }
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("upper", &self.upper())
            .field("lower", &self.lower())
            .finish()
    }
}

/// A group of entries sharing one hash value.
#[repr(C, align(64))]
pub struct PageTableEntryGroup {
    entries: [PageTableEntry; ENTRIES_PER_GROUP],
}

impl PageTableEntryGroup {
    /// Creates a group of invalid entries.
    pub const fn new() -> Self {
        Self {
            entries: [const { PageTableEntry::empty() }; ENTRIES_PER_GROUP],
        }
    }

    /// Returns the entries of this group.
    #[inline]
    pub fn entries(&self) -> &[PageTableEntry; ENTRIES_PER_GROUP] {
        &self.entries
    }

    /// Returns the first entry that is not a live translation.
    #[inline]
    pub fn free_entry(&self) -> Option<(usize, &PageTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| !entry.is_valid())
    }

    /// Returns the valid entry for the given tag, if any.
    #[inline]
    pub fn find(
        &self,
        vsid: VirtualSegmentId,
        secondary: bool,
        api: u8,
    ) -> Option<(usize, &PageTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.matches(vsid, secondary, api))
    }
}

impl Default for PageTableEntryGroup {
    fn default() -> Self {
        Self::new()
    }
}
