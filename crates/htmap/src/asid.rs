//! Address space identifier allocation.
//!
//! Every translation map owns one identifier, and with it a block of eight consecutive
//! virtual segment ids. The kernel's map owns identifier 0, but kernel addresses span all
//! sixteen segments, so its VSIDs run into identifier 1's block as well; both are reserved
//! for the lifetime of the allocator.

use core::fmt;

use crate::{Error, VirtualAddress, VirtualSegmentId, arch};

/// Number of address space identifiers.
pub const MAX_ASIDS: usize = arch::PAGE_SIZE * 8;

/// Shift turning an identifier into the first VSID of its block.
pub const VSID_BASE_SHIFT: u32 = 3;

/// Number of bitmap words.
const BITMAP_WORDS: usize = MAX_ASIDS / u32::BITS as usize;

/// Identifiers permanently owned by the kernel map.
const KERNEL_RESERVED: u32 = 0b11;

/// An address space identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Asid(u16);

impl Asid {
    /// The kernel's identifier.
    pub const KERNEL: Asid = Asid(0);

    /// Creates an identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    pub const fn new(id: u16) -> Self {
        assert!((id as usize) < MAX_ASIDS, "address space identifier out of range");
        Self(id)
    }

    /// Returns the raw identifier.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the kernel's identifier.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 == Self::KERNEL.0
    }

    /// First VSID of this identifier's block.
    #[inline]
    pub const fn vsid_base(self) -> u32 {
        (self.0 as u32) << VSID_BASE_SHIFT
    }

    /// The VSID that `address` translates through in this address space.
    #[inline]
    pub const fn segment_id(self, address: VirtualAddress) -> VirtualSegmentId {
        VirtualSegmentId::new(self.vsid_base() + address.segment() as u32)
    }
}

impl fmt::Debug for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asid({})", self.0)
    }
}

impl fmt::Display for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitmap allocator for address space identifiers.
///
/// The bitmap lock is only ever taken with interrupts disabled, so the allocator can be used
/// from any context that can run map creation or destruction.
pub struct AsidAllocator {
    bitmap: spin::Mutex<[u32; BITMAP_WORDS]>,
}

impl AsidAllocator {
    /// Creates an allocator with only the kernel's identifiers in use.
    pub const fn new() -> Self {
        let mut bitmap = [0; BITMAP_WORDS];
        bitmap[0] = KERNEL_RESERVED;
        Self {
            bitmap: spin::Mutex::new(bitmap),
        }
    }

    /// Allocates the lowest free identifier.
    pub fn acquire(&self) -> Result<Asid, Error> {
        arch::without_interrupts(|| {
            let mut bitmap = self.bitmap.lock();

            // Fully allocated words are skipped without looking at their bits.
            let (index, word) = bitmap
                .iter_mut()
                .enumerate()
                .find(|(_, word)| **word != u32::MAX)
                .ok_or(Error::AsidExhausted)?;

            let bit = word.trailing_ones();
            *word |= 1 << bit;

            Ok(Asid((index * u32::BITS as usize + bit as usize) as u16))
        })
    }

    /// Returns an identifier to the pool.
    ///
    /// The kernel's identifiers are never released.
    pub fn release(&self, asid: Asid) {
        let (word, bit) = Self::position(asid);
        if word == 0 && KERNEL_RESERVED & (1 << bit) != 0 {
            log::warn!("ignoring release of reserved address space identifier {asid}");
            return;
        }

        arch::without_interrupts(|| {
            let mut bitmap = self.bitmap.lock();
            debug_assert!(
                bitmap[word] & (1 << bit) != 0,
                "address space identifier {asid} released twice"
            );
            bitmap[word] &= !(1 << bit);
        });
    }

    /// Returns whether an identifier is currently allocated.
    pub fn is_allocated(&self, asid: Asid) -> bool {
        let (word, bit) = Self::position(asid);
        arch::without_interrupts(|| self.bitmap.lock()[word] & (1 << bit) != 0)
    }

    /// Returns the number of identifiers in use, the kernel's included.
    pub fn in_use(&self) -> usize {
        arch::without_interrupts(|| {
            self.bitmap
                .lock()
                .iter()
                .map(|word| word.count_ones() as usize)
                .sum()
        })
    }

    const fn position(asid: Asid) -> (usize, u32) {
        (
            asid.as_usize() / u32::BITS as usize,
            (asid.as_usize() % u32::BITS as usize) as u32,
        )
    }
}

impl Default for AsidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
