//! Address types for physical and virtual memory.
//!
//! This module provides architecture-independent wrappers around physical and virtual
//! addresses, with the accessors the hashed page table needs to split an effective address
//! into segment, page index and offset.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PageNumber, arch};

/// Defines an address newtype with the alignment helpers, formatting and arithmetic
/// shared by real and effective addresses.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Wraps `addr` without checking its width.
            ///
            /// # Safety
            ///
            /// `addr` must fit the 32-bit address space.
            #[inline]
            pub const unsafe fn new_unchecked(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the address as an integer.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// Saturates at the last aligned address below the top of the address space.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                match self.0.checked_add(align - 1) {
                    Some(raised) if Self::is_valid(raised & !(align - 1)) => {
                        Self(raised & !(align - 1))
                    }
                    _ => Self(self.0 & !(align - 1)),
                }
            }

            /// Returns the offset within the page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (arch::PAGE_SIZE - 1)
            }

            /// Adds an offset, returning `None` if the result leaves the address space.
            #[inline]
            pub fn checked_add(self, rhs: usize) -> Option<Self> {
                self.0.checked_add(rhs).filter(|addr| Self::is_valid(*addr)).map(Self)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:p}", self.0 as *const u8)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr as usize)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical (real) memory address.\n\n\
     This is a newtype wrapper around a 32-bit real address. It provides methods for\n\
     address manipulation and alignment checks."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the architecture's maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    #[inline]
    const fn is_valid(addr: usize) -> bool {
        arch::validate_physical(addr)
    }

    /// Returns the corresponding frame number for this physical address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 >> arch::PAGE_SHIFT)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual (effective) memory address.\n\n\
     This is a newtype wrapper around a 32-bit effective address. It provides methods for\n\
     address manipulation, alignment checks, and extracting the fields the hashed page\n\
     table is indexed by."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit the effective address space.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_virtual(addr),
            "virtual address exceeds maximum width"
        );
        Self(addr)
    }

    #[inline]
    const fn is_valid(addr: usize) -> bool {
        arch::validate_virtual(addr)
    }

    /// Returns the segment register number selecting this address (bits 0-3).
    #[inline]
    pub const fn segment(self) -> usize {
        self.0 >> arch::SEGMENT_SHIFT
    }

    /// Returns the page index within the segment (16 bits).
    #[inline]
    pub const fn page_index(self) -> usize {
        (self.0 >> arch::PAGE_SHIFT) & ((1 << (arch::SEGMENT_SHIFT - arch::PAGE_SHIFT)) - 1)
    }

    /// Returns true if the address lies in the kernel half of the address space.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        arch::is_kernel_address(self.0)
    }

    /// Gets the corresponding page number for this virtual address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 >> arch::PAGE_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod physical_address {
        use super::*;

        #[test]
        fn top_of_real_address_space() {
            let max_addr = (1usize << arch::MAX_PHYSICAL_BITS) - 1;
            let addr = PhysicalAddress::new(max_addr);
            assert_eq!(addr.as_usize(), max_addr);
        }

        #[test]
        #[should_panic(expected = "physical address exceeds maximum width")]
        fn new_exceeds_max() {
            PhysicalAddress::new(1usize << arch::MAX_PHYSICAL_BITS);
        }

        #[test]
        fn align_down() {
            let addr = PhysicalAddress::new(0x0012_3456);
            assert_eq!(
                addr.align_down(arch::PAGE_SIZE),
                PhysicalAddress::new(0x0012_3000)
            );
        }

        #[test]
        fn align_up() {
            let addr = PhysicalAddress::new(0x0012_3456);
            assert_eq!(
                addr.align_up(arch::PAGE_SIZE),
                PhysicalAddress::new(0x0012_4000)
            );
        }

        #[test]
        fn frame_number() {
            let addr = PhysicalAddress::new(0x0012_3456);
            assert_eq!(addr.frame_number(), FrameNumber::new(0x123));
        }

        #[test]
        fn distance_between_addresses() {
            let diff = PhysicalAddress::new(0x5000) - PhysicalAddress::new(0x1000);
            assert_eq!(diff, 0x4000);
        }

        #[test]
        fn formats_as_hex() {
            let addr = PhysicalAddress::new(0x0100);
            assert_eq!(format!("{}", addr), "0x100");
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x100)");
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn new_top_of_address_space() {
            let addr = VirtualAddress::new(0xFFFF_FFFF);
            assert_eq!(addr.as_usize(), 0xFFFF_FFFF);
        }

        #[test]
        #[should_panic(expected = "virtual address exceeds maximum width")]
        fn new_exceeds_max() {
            VirtualAddress::new(1usize << arch::MAX_VIRTUAL_BITS);
        }

        #[test]
        fn segment_and_page_index() {
            let addr = VirtualAddress::new(0x9123_4567);
            assert_eq!(addr.segment(), 0x9);
            assert_eq!(addr.page_index(), 0x1234);
            assert_eq!(addr.page_offset(), 0x567);
        }

        #[test]
        fn kernel_half() {
            assert!(VirtualAddress::new(arch::KERNEL_BASE).is_kernel());
            assert!(VirtualAddress::new(0xFFFF_F000).is_kernel());
            assert!(!VirtualAddress::new(arch::USER_TOP).is_kernel());
        }

        #[test]
        fn align_up_saturates_at_top() {
            let addr = VirtualAddress::new(0xFFFF_F001);
            assert_eq!(
                addr.align_up(arch::PAGE_SIZE),
                VirtualAddress::new(0xFFFF_F000)
            );
        }

        #[test]
        fn checked_add_stops_at_top() {
            let addr = VirtualAddress::new(0xFFFF_F000);
            assert_eq!(addr.checked_add(arch::PAGE_SIZE), None);
            assert_eq!(
                addr.checked_add(0xFFF),
                Some(VirtualAddress::new(0xFFFF_FFFF))
            );
        }

        #[test]
        fn page_number() {
            let addr = VirtualAddress::new(0x0040_2010);
            assert_eq!(addr.page_number(), PageNumber::new(0x402));
        }
    }
}
