//! Per-address-space translation maps.
//!
//! A translation map owns an address space identifier and, through it, a block of VSIDs in
//! the shared hashed page table. Everything a map does touches only entries tagged with its
//! own VSIDs, so maps need no lock other than their own; the table serializes slot claims
//! between them.
//!
//! Mutations go through a [`LockedMap`], obtained from [`TranslationMap::lock`]. For single
//! operations the map also offers self-locking shortcuts.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    Asid, Error, Fatal, Mmu, PageFlags, PageNumber, PageProtection, PageTableEntry,
    PhysicalAddress, VirtualAddress, VirtualSegmentId, arch, fatal,
};

/// The page table side of one address space.
pub struct TranslationMap<'m> {
    mmu: &'m Mmu,
    asid: Asid,
    lock: spin::Mutex<()>,
    mapped_pages: AtomicUsize,
}

impl<'m> TranslationMap<'m> {
    pub(crate) fn new(mmu: &'m Mmu, asid: Asid, mapped_pages: usize) -> Self {
        Self {
            mmu,
            asid,
            lock: spin::Mutex::new(()),
            mapped_pages: AtomicUsize::new(mapped_pages),
        }
    }

    /// Returns the map's address space identifier.
    #[inline]
    pub fn asid(&self) -> Asid {
        self.asid
    }

    /// Returns whether this is the kernel's map.
    #[inline]
    pub fn is_kernel(&self) -> bool {
        self.asid.is_kernel()
    }

    /// Returns the last address this map can translate.
    #[inline]
    pub fn top(&self) -> VirtualAddress {
        if self.is_kernel() {
            VirtualAddress::new(arch::KERNEL_TOP)
        } else {
            VirtualAddress::new(arch::USER_TOP)
        }
    }

    /// Returns whether `address` lies in the range this map translates.
    #[inline]
    pub fn covers(&self, address: VirtualAddress) -> bool {
        address <= self.top()
    }

    /// Returns the VSID `address` translates through, or `None` outside the map's range.
    pub fn segment_id(&self, address: VirtualAddress) -> Option<VirtualSegmentId> {
        self.covers(address).then(|| self.asid.segment_id(address))
    }

    /// Locks the map for a sequence of operations.
    pub fn lock(&self) -> LockedMap<'_, 'm> {
        LockedMap {
            map: self,
            _guard: self.lock.lock(),
        }
    }

    /// Returns the number of pages currently mapped.
    #[inline]
    pub fn mapped_size(&self) -> usize {
        self.mapped_pages.load(Ordering::Acquire)
    }

    /// Maps one page. See [`LockedMap::map`].
    pub fn map(
        &self,
        address: VirtualAddress,
        physical: PhysicalAddress,
        attributes: PageFlags,
    ) -> Result<(), Error> {
        self.lock().map(address, physical, attributes)
    }

    /// Unmaps a range. See [`LockedMap::unmap`].
    pub fn unmap(&self, start: VirtualAddress, end: VirtualAddress) {
        self.lock().unmap(start, end)
    }

    /// Looks up a translation. See [`LockedMap::query`].
    pub fn query(&self, address: VirtualAddress) -> (PhysicalAddress, PageFlags) {
        self.lock().query(address)
    }

    /// Changes protection over a range. See [`LockedMap::protect`].
    pub fn protect(&self, base: VirtualAddress, top: VirtualAddress, attributes: PageFlags) {
        self.lock().protect(base, top, attributes)
    }

    /// Clears page state bits. See [`LockedMap::clear_flags`].
    pub fn clear_flags(&self, address: VirtualAddress, flags: PageFlags) {
        self.lock().clear_flags(address, flags)
    }

    /// Drops every cached translation.
    pub fn flush(&self) {
        self.mmu.tlb().invalidate_all();
    }

    /// Returns the I/O window alias of the page containing `physical`.
    pub fn get_physical_page(&self, physical: PhysicalAddress) -> VirtualAddress {
        self.mmu.io_window().get(physical)
    }

    /// Returns a page obtained from [`get_physical_page`](Self::get_physical_page).
    pub fn put_physical_page(&self, address: VirtualAddress) {
        self.mmu.io_window().put(address)
    }

    /// Returns how many page table pages mapping `start..=end` could require.
    ///
    /// Always zero: translations live in the preallocated hashed page table.
    pub fn max_pages_needed(&self, _start: VirtualAddress, _end: VirtualAddress) -> usize {
        0
    }

    /// Destroys the map.
    ///
    /// Stops the system if any page is still mapped.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for TranslationMap<'_> {
    fn drop(&mut self) {
        let count = self.mapped_pages.load(Ordering::Acquire);
        if count != 0 {
            fatal(Fatal::DestroyWhileMapped {
                asid: self.asid,
                count,
            });
        }

        self.mmu.release_map(self.asid);
    }
}

/// A translation map with its lock held.
///
/// The lock is released when the guard is dropped or [`unlock`](Self::unlock)ed.
pub struct LockedMap<'a, 'm> {
    map: &'a TranslationMap<'m>,
    _guard: spin::MutexGuard<'a, ()>,
}

impl LockedMap<'_, '_> {
    /// Releases the lock.
    pub fn unlock(self) {}

    fn check_page(&self, address: VirtualAddress) -> Result<VirtualSegmentId, Error> {
        if !address.is_aligned(arch::PAGE_SIZE) {
            return Err(Error::Misaligned(address.as_usize()));
        }
        self.map
            .segment_id(address)
            .ok_or(Error::AddressOutOfRange(address))
    }

    fn find(&self, address: VirtualAddress) -> Option<(VirtualSegmentId, &PageTableEntry)> {
        let vsid = self.map.segment_id(address)?;
        let entry = self.map.mmu.table().lookup(vsid, address)?;
        Some((vsid, entry))
    }

    /// Pages from `start` through `end`, both rounded down to their page and clipped to the
    /// map's range.
    fn pages(
        &self,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> impl Iterator<Item = VirtualAddress> + use<> {
        let end = end.min(self.map.top());
        let (first, last) = (start.page_number(), end.page_number());
        let empty = start > end;
        PageNumber::range_inclusive(first, last)
            .filter(move |_| !empty)
            .map(PageNumber::start)
    }

    /// Maps the page at `address` to the frame at `physical`.
    ///
    /// Both addresses must be page aligned and `address` must lie in the map's range.
    /// An address that is already mapped is rejected. Stops the system if the hashed page
    /// table has no room for the translation.
    pub fn map(
        &mut self,
        address: VirtualAddress,
        physical: PhysicalAddress,
        attributes: PageFlags,
    ) -> Result<(), Error> {
        let vsid = self.check_page(address)?;
        if !physical.is_aligned(arch::PAGE_SIZE) {
            return Err(Error::Misaligned(physical.as_usize()));
        }

        let table = self.map.mmu.table();
        if table.lookup(vsid, address).is_some() {
            return Err(Error::AlreadyMapped(address));
        }

        table.insert(
            vsid,
            address,
            physical,
            PageProtection::from_attributes(attributes),
        );
        self.map.mapped_pages.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Maps `size` bytes of physically contiguous memory starting at `physical`.
    ///
    /// The range is checked for alignment and bounds before anything is mapped. A page that
    /// is already mapped stops the operation and the pages mapped so far are unmapped again.
    pub fn map_range(
        &mut self,
        address: VirtualAddress,
        physical: PhysicalAddress,
        size: usize,
        attributes: PageFlags,
    ) -> Result<(), Error> {
        if size % arch::PAGE_SIZE != 0 {
            return Err(Error::Misaligned(size));
        }
        if size == 0 {
            return Ok(());
        }
        self.check_page(address)?;
        let last = address
            .checked_add(size - arch::PAGE_SIZE)
            .ok_or(Error::AddressOutOfRange(address))?;
        self.check_page(last)?;
        physical
            .checked_add(size - 1)
            .ok_or(Error::Misaligned(physical.as_usize()))?;

        for offset in (0..size).step_by(arch::PAGE_SIZE) {
            if let Err(error) = self.map(address + offset, physical + offset, attributes) {
                if offset != 0 {
                    self.unmap(address, address + (offset - 1));
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Removes every translation from `start` through `end`.
    ///
    /// `end` is the last byte of the range. Pages that are not mapped are skipped.
    pub fn unmap(&mut self, start: VirtualAddress, end: VirtualAddress) {
        let tlb = self.map.mmu.tlb();
        let mut removed = 0;

        for page in self.pages(start, end) {
            let Some((vsid, entry)) = self.find(page) else {
                continue;
            };
            entry.invalidate();
            tlb.invalidate_address(vsid, page);
            removed += 1;
        }

        if removed != 0 {
            self.map.mapped_pages.fetch_sub(removed, Ordering::AcqRel);
            log::trace!(
                "asid {}: unmapped {removed} pages in {start}..={end}",
                self.map.asid
            );
        }
    }

    /// Returns the translation of the page containing `address`.
    ///
    /// An unmapped page yields a zero address and no flags.
    pub fn query(&self, address: VirtualAddress) -> (PhysicalAddress, PageFlags) {
        match self.find(address.align_down(arch::PAGE_SIZE)) {
            Some((_, entry)) => (
                entry.physical_address(),
                entry.protection().to_attributes(address.is_kernel()) | entry.state(),
            ),
            None => (PhysicalAddress::new(0), PageFlags::empty()),
        }
    }

    /// Changes the protection of every mapped page from `base` through `top`.
    ///
    /// `top` is the last byte of the range. Translations stay where they are.
    pub fn protect(&mut self, base: VirtualAddress, top: VirtualAddress, attributes: PageFlags) {
        let protection = PageProtection::from_attributes(attributes);
        let tlb = self.map.mmu.tlb();

        for page in self.pages(base, top) {
            if let Some((vsid, entry)) = self.find(page) {
                if entry.set_protection(protection) {
                    tlb.invalidate_address(vsid, page);
                }
            }
        }
    }

    /// Clears `ACCESSED` and/or `MODIFIED` on the page containing `address`.
    pub fn clear_flags(&mut self, address: VirtualAddress, flags: PageFlags) {
        let page = address.align_down(arch::PAGE_SIZE);
        let Some((vsid, entry)) = self.find(page) else {
            return;
        };

        let changed = entry.clear_state(
            flags.contains(PageFlags::ACCESSED),
            flags.contains(PageFlags::MODIFIED),
        );
        if changed {
            self.map.mmu.tlb().invalidate_address(vsid, page);
        }
    }

    /// Drops every cached translation.
    pub fn flush(&mut self) {
        self.map.flush();
    }
}
