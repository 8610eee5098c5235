//! Process-wide MMU state and translation map creation.
//!
//! One [`Mmu`] exists per system. It owns the hashed page table, the identifier allocator,
//! the TLB and the I/O window, and hands out [`TranslationMap`]s that borrow it. The kernel
//! brings it up in three steps:
//!
//! 1. adopt the hashed page table described by the [`BootArgs`] and add any early mappings
//!    through a [`BootstrapMapper`](crate::BootstrapMapper);
//! 2. build the [`Mmu`] and publish it with [`init`];
//! 3. create the kernel map and map the I/O window through it.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    Asid, AsidAllocator, Error, HashedPageTable, IoWindow, IoWindowConfig, PageFlags,
    PageTableEntryGroup, PhysicalAddress, Tlb, TranslationMap, VirtualAddress, arch,
};

/// Where the boot loader put the hashed page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableRegion {
    /// Kernel virtual address of the table.
    pub virtual_base: VirtualAddress,
    /// Physical address of the table.
    pub physical_base: PhysicalAddress,
    /// Size of the table in bytes.
    pub size: usize,
}

/// The part of the kernel arguments this crate consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootArgs {
    /// The preallocated hashed page table.
    pub page_table: PageTableRegion,
    /// Placement of the I/O window.
    pub io_window: IoWindowConfig,
}

impl HashedPageTable {
    /// Adopts the hashed page table described by the boot arguments.
    ///
    /// # Safety
    ///
    /// The region must satisfy the requirements of [`HashedPageTable::from_raw`], and this
    /// must be called at most once.
    pub unsafe fn from_boot_args(args: &BootArgs) -> Result<Self, Error> {
        let region = &args.page_table;
        log::info!(
            "adopting hashed page table at {} (physical {})",
            region.virtual_base,
            region.physical_base
        );
        // SAFETY: Forwarded from the caller.
        unsafe {
            Self::from_raw(
                region.virtual_base.as_usize() as *mut PageTableEntryGroup,
                region.size,
            )
        }
    }
}

/// The system's hashed MMU.
pub struct Mmu {
    table: HashedPageTable,
    asids: AsidAllocator,
    tlb: Box<dyn Tlb>,
    io_window: IoWindow,
    kernel_map_created: AtomicBool,
}

impl Mmu {
    /// Creates the MMU state around an initialized hashed page table.
    pub fn new(
        table: HashedPageTable,
        io_window: IoWindowConfig,
        tlb: impl Tlb + 'static,
    ) -> Result<Self, Error> {
        let io_window = IoWindow::new(io_window)?;
        log::info!(
            "I/O window: {:#x} bytes at {} -> {}",
            io_window.config().size,
            io_window.config().virtual_base,
            io_window.config().physical_base
        );

        Ok(Self {
            table,
            asids: AsidAllocator::new(),
            tlb: Box::new(tlb),
            io_window,
            kernel_map_created: AtomicBool::new(false),
        })
    }

    /// Creates the MMU state straight from the boot arguments.
    ///
    /// # Safety
    ///
    /// See [`HashedPageTable::from_boot_args`].
    pub unsafe fn from_boot_args(args: &BootArgs, tlb: impl Tlb + 'static) -> Result<Self, Error> {
        // SAFETY: Forwarded from the caller.
        let table = unsafe { HashedPageTable::from_boot_args(args) }?;
        Self::new(table, args.io_window, tlb)
    }

    /// Returns the hashed page table.
    #[inline]
    pub fn table(&self) -> &HashedPageTable {
        &self.table
    }

    /// Returns the TLB.
    #[inline]
    pub fn tlb(&self) -> &dyn Tlb {
        &*self.tlb
    }

    /// Returns the I/O window.
    #[inline]
    pub fn io_window(&self) -> &IoWindow {
        &self.io_window
    }

    /// Returns the identifier allocator.
    #[inline]
    pub fn asids(&self) -> &AsidAllocator {
        &self.asids
    }

    /// Creates a translation map.
    ///
    /// The kernel map always uses identifier 0 and can exist only once. It starts out
    /// owning whatever kernel translations are already in the table, so pages mapped during
    /// bootstrap are accounted for. User maps get a fresh identifier.
    pub fn create_map(&self, kernel: bool) -> Result<TranslationMap<'_>, Error> {
        if kernel {
            if self.kernel_map_created.swap(true, Ordering::AcqRel) {
                return Err(Error::KernelMapExists);
            }

            let adopted = (0..arch::SEGMENT_COUNT)
                .map(|segment| {
                    let address = VirtualAddress::new(segment << arch::SEGMENT_SHIFT);
                    self.table.count_valid(Asid::KERNEL.segment_id(address))
                })
                .sum();
            log::debug!("created kernel translation map ({adopted} pages already mapped)");
            return Ok(TranslationMap::new(self, Asid::KERNEL, adopted));
        }

        let asid = self.asids.acquire()?;
        log::debug!("created translation map {asid}");
        Ok(TranslationMap::new(self, asid, 0))
    }

    /// Called by a translation map once it is torn down.
    pub(crate) fn release_map(&self, asid: Asid) {
        if asid.is_kernel() {
            self.kernel_map_created.store(false, Ordering::Release);
        } else {
            self.asids.release(asid);
        }
        log::debug!("destroyed translation map {asid}");
    }

    /// Maps the I/O window through the kernel map.
    pub fn map_io_window(&self, kernel: &TranslationMap<'_>) -> Result<(), Error> {
        let config = *self.io_window.config();
        if !kernel.is_kernel() {
            return Err(Error::AddressOutOfRange(config.virtual_base));
        }

        self.io_window.begin_mapping()?;
        let result = kernel.lock().map_range(
            config.virtual_base,
            config.physical_base,
            config.size,
            PageFlags::KERNEL_READ | PageFlags::KERNEL_WRITE,
        );
        if result.is_err() {
            self.io_window.abort_mapping();
        }
        result
    }
}

#[cfg(not(any(test, feature = "software-emulation")))]
static MMU: spin::Once<&'static Mmu> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static MMU: spin::Once<&'static Mmu> = const { spin::Once::new() };
}

/// Publishes the system's MMU.
///
/// This function must be called exactly once during initialization. Under test and
/// software emulation each thread has its own MMU.
///
/// # Panics
///
/// Panics if the MMU has already been set.
pub fn init(mmu: Mmu) -> &'static Mmu {
    let mmu: &'static Mmu = Box::leak(Box::new(mmu));

    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        if MMU.get().is_some() {
            panic!("MMU already initialized");
        }
        MMU.call_once(|| mmu);
    }

    #[cfg(any(test, feature = "software-emulation"))]
    MMU.with(|current| {
        if current.get().is_some() {
            panic!("MMU already initialized");
        }
        current.call_once(|| mmu);
    });

    mmu
}

/// Returns the system's MMU if it has been initialized.
pub fn try_current() -> Option<&'static Mmu> {
    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        MMU.get().copied()
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        MMU.with(|current| current.get().copied())
    }
}

/// Returns the system's MMU.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn current() -> &'static Mmu {
    match try_current() {
        Some(mmu) => mmu,
        None => panic!("MMU not initialized; call htmap::init during boot"),
    }
}
