//! Page and frame number types.
//!
//! Frame numbers are what the hashed page table stores (the 20-bit RPN field); page numbers
//! are what range operations such as unmap and protect walk over.

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    arch,
};
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Defines a page-granular index newtype.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
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

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
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

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame numbers correspond to PAGE_SIZE-aligned physical addresses and are stored in\n\
     the physical page number field of a page table entry."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << arch::PAGE_SHIFT)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        addr.frame_number()
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Page numbers correspond to PAGE_SIZE-aligned virtual addresses."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << arch::PAGE_SHIFT)
    }

    /// Iterates over every page from `first` through `last`, both included.
    #[inline]
    pub const fn range_inclusive(first: PageNumber, last: PageNumber) -> PageRange {
        PageRange {
            next: first.0,
            last: last.0,
            done: first.0 > last.0,
        }
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        addr.page_number()
    }
}

/// Iterator over an inclusive range of pages.
///
/// Inclusive so that a range ending on the last page of the address space does not need an
/// exclusive end that would overflow it.
#[derive(Debug, Clone)]
pub struct PageRange {
    next: usize,
    last: usize,
    done: bool,
}

impl Iterator for PageRange {
    type Item = PageNumber;

    fn next(&mut self) -> Option<PageNumber> {
        if self.done {
            return None;
        }
        let page = PageNumber(self.next);
        if self.next == self.last {
            self.done = true;
        } else {
            self.next += 1;
        }
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done {
            0
        } else {
            self.last - self.next + 1
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PageRange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_address() {
        let frame = FrameNumber::new(3);
        assert_eq!(frame.start(), PhysicalAddress::new(3 * arch::PAGE_SIZE));
    }

    #[test]
    fn frame_from_unaligned_address() {
        let addr = PhysicalAddress::new(arch::PAGE_SIZE * 3 + 10);
        assert_eq!(FrameNumber::from(addr), FrameNumber::new(3));
    }

    #[test]
    fn page_round_trip() {
        let page = PageNumber::new(42);
        assert_eq!(PageNumber::from(page.start()), page);
    }

    #[test]
    fn page_arithmetic() {
        let page = PageNumber::new(10);
        assert_eq!(page + 5, PageNumber::new(15));
        assert_eq!(page - 3, PageNumber::new(7));
        assert_eq!(PageNumber::new(10) - PageNumber::new(3), 7);
    }

    #[test]
    fn range_includes_both_ends() {
        let pages: Vec<_> =
            PageNumber::range_inclusive(PageNumber::new(4), PageNumber::new(7)).collect();
        assert_eq!(
            pages,
            [4, 5, 6, 7].map(PageNumber::new).to_vec()
        );
    }

    #[test]
    fn range_of_one_page() {
        let mut range = PageNumber::range_inclusive(PageNumber::new(9), PageNumber::new(9));
        assert_eq!(range.len(), 1);
        assert_eq!(range.next(), Some(PageNumber::new(9)));
        assert_eq!(range.next(), None);
    }

    #[test]
    fn empty_range_when_reversed() {
        let range = PageNumber::range_inclusive(PageNumber::new(9), PageNumber::new(8));
        assert_eq!(range.count(), 0);
    }

    #[test]
    fn range_reaching_last_page() {
        let last = VirtualAddress::new(0xFFFF_FFFF).page_number();
        let pages: Vec<_> = PageNumber::range_inclusive(last - 1, last).collect();
        assert_eq!(pages, vec![last - 1, last]);
    }
}
