//! The I/O window: a fixed kernel alias for a slice of physical memory.
//!
//! The window is mapped once through the kernel's translation map. After that, borrowing a
//! physical page is pure arithmetic: the page's alias sits at the same offset from the
//! window's virtual base as the page does from the window's physical base.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{Error, Fatal, PhysicalAddress, VirtualAddress, arch, fatal};

/// Default size of the window (16 MiB).
pub const IO_WINDOW_SIZE: usize = 16 * 1024 * 1024;

/// Default virtual base of the window.
pub const IO_WINDOW_BASE: usize = 0xE000_0000;

/// Placement of the I/O window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoWindowConfig {
    /// First virtual address of the window.
    pub virtual_base: VirtualAddress,
    /// First physical address backing the window.
    pub physical_base: PhysicalAddress,
    /// Size of the window in bytes.
    pub size: usize,
}

impl Default for IoWindowConfig {
    fn default() -> Self {
        Self {
            virtual_base: VirtualAddress::new(IO_WINDOW_BASE),
            physical_base: PhysicalAddress::new(0),
            size: IO_WINDOW_SIZE,
        }
    }
}

/// The I/O window and its borrow accounting.
#[derive(Debug)]
pub struct IoWindow {
    config: IoWindowConfig,
    borrowed: AtomicUsize,
    mapped: AtomicBool,
}

impl IoWindow {
    /// Creates an unmapped window.
    ///
    /// The window must be page aligned, non-empty and lie entirely in kernel space.
    pub fn new(config: IoWindowConfig) -> Result<Self, Error> {
        let IoWindowConfig {
            virtual_base,
            physical_base,
            size,
        } = config;

        if !virtual_base.is_aligned(arch::PAGE_SIZE) {
            return Err(Error::Misaligned(virtual_base.as_usize()));
        }
        if !physical_base.is_aligned(arch::PAGE_SIZE) {
            return Err(Error::Misaligned(physical_base.as_usize()));
        }
        if size == 0 || size % arch::PAGE_SIZE != 0 {
            return Err(Error::Misaligned(size));
        }
        if !virtual_base.is_kernel() || virtual_base.checked_add(size - 1).is_none() {
            return Err(Error::AddressOutOfRange(virtual_base));
        }
        if physical_base.checked_add(size - 1).is_none() {
            return Err(Error::Misaligned(physical_base.as_usize()));
        }

        Ok(Self {
            config,
            borrowed: AtomicUsize::new(0),
            mapped: AtomicBool::new(false),
        })
    }

    /// Returns the window's placement.
    #[inline]
    pub fn config(&self) -> &IoWindowConfig {
        &self.config
    }

    /// Returns whether `address` lies inside the window.
    #[inline]
    pub fn contains(&self, address: VirtualAddress) -> bool {
        address >= self.config.virtual_base && address - self.config.virtual_base < self.config.size
    }

    /// Returns whether the window can provide `physical`.
    #[inline]
    pub fn backs(&self, physical: PhysicalAddress) -> bool {
        physical >= self.config.physical_base
            && physical - self.config.physical_base < self.config.size
    }

    /// Returns the number of pages currently borrowed.
    #[inline]
    pub fn borrowed(&self) -> usize {
        self.borrowed.load(Ordering::Relaxed)
    }

    /// Returns whether the window has been mapped.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    /// Records that the window is being mapped, failing if it already was.
    pub(crate) fn begin_mapping(&self) -> Result<(), Error> {
        if self.mapped.swap(true, Ordering::AcqRel) {
            return Err(Error::IoWindowMapped);
        }
        Ok(())
    }

    /// Undoes [`begin_mapping`](Self::begin_mapping) after a failed mapping attempt.
    pub(crate) fn abort_mapping(&self) {
        self.mapped.store(false, Ordering::Release);
    }

    /// Returns the alias of the page containing `physical`.
    ///
    /// Stops the system if the window does not cover `physical`.
    pub fn get(&self, physical: PhysicalAddress) -> VirtualAddress {
        let page = physical.align_down(arch::PAGE_SIZE);
        if !self.backs(page) {
            fatal(Fatal::PhysicalOutsideIoWindow(physical));
        }

        self.borrowed.fetch_add(1, Ordering::Relaxed);
        self.config.virtual_base + (page - self.config.physical_base)
    }

    /// Returns a page obtained from [`get`](Self::get).
    ///
    /// Stops the system if `address` is not inside the window.
    pub fn put(&self, address: VirtualAddress) {
        if !self.contains(address) {
            fatal(Fatal::VirtualOutsideIoWindow(address));
        }

        if self
            .borrowed
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            log::warn!("I/O window page {address} returned without being borrowed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catch_fatal;

    fn window() -> IoWindow {
        IoWindow::new(IoWindowConfig {
            virtual_base: VirtualAddress::new(0xE000_0000),
            physical_base: PhysicalAddress::new(0x0100_0000),
            size: 0x10_0000,
        })
        .unwrap()
    }

    #[test]
    fn default_window() {
        let window = IoWindow::new(IoWindowConfig::default()).unwrap();
        assert_eq!(
            window.get(PhysicalAddress::new(0x0012_3456)),
            VirtualAddress::new(IO_WINDOW_BASE + 0x0012_3000)
        );
    }

    #[test]
    fn alias_is_offset_into_window() {
        let window = window();
        let alias = window.get(PhysicalAddress::new(0x0104_2010));
        assert_eq!(alias, VirtualAddress::new(0xE004_2000));
        assert_eq!(window.borrowed(), 1);

        window.put(alias);
        assert_eq!(window.borrowed(), 0);
    }

    #[test]
    fn last_page_is_inside() {
        let window = window();
        assert_eq!(
            window.get(PhysicalAddress::new(0x010F_F000)),
            VirtualAddress::new(0xE00F_F000)
        );
    }

    #[test]
    fn physical_outside_window_is_fatal() {
        let window = window();
        for physical in [0x0000_0000, 0x00FF_F000, 0x0110_0000] {
            let physical = PhysicalAddress::new(physical);
            assert_eq!(
                catch_fatal(|| window.get(physical)),
                Err(Fatal::PhysicalOutsideIoWindow(physical))
            );
        }
        assert_eq!(window.borrowed(), 0);
    }

    #[test]
    fn virtual_outside_window_is_fatal() {
        let window = window();
        let address = VirtualAddress::new(0xE010_0000);
        assert_eq!(
            catch_fatal(|| window.put(address)),
            Err(Fatal::VirtualOutsideIoWindow(address))
        );
    }

    #[test]
    fn rejects_bad_placement() {
        let config = IoWindowConfig::default();
        assert_eq!(
            IoWindow::new(IoWindowConfig {
                virtual_base: VirtualAddress::new(0x1000_0000),
                ..config
            })
            .err(),
            Some(Error::AddressOutOfRange(VirtualAddress::new(0x1000_0000)))
        );
        assert_eq!(
            IoWindow::new(IoWindowConfig { size: 0x800, ..config }).err(),
            Some(Error::Misaligned(0x800))
        );
        assert_eq!(
            IoWindow::new(IoWindowConfig {
                virtual_base: VirtualAddress::new(0xFF80_0000),
                ..config
            })
            .err(),
            Some(Error::AddressOutOfRange(VirtualAddress::new(0xFF80_0000)))
        );
    }

    #[test]
    fn maps_once() {
        let window = window();
        assert_eq!(window.begin_mapping(), Ok(()));
        assert_eq!(window.begin_mapping(), Err(Error::IoWindowMapped));
        window.abort_mapping();
        assert!(!window.is_mapped());
    }
}
