//! Early mappings, before the MMU state exists.
//!
//! During boot there is no allocator, no lock and no translation map yet, but the kernel
//! already needs to map pages. The bootstrap mapper writes kernel translations straight into
//! the hashed page table, using the same placement code as the runtime path. Holding the
//! table by `&mut` guarantees nothing else can touch it meanwhile.

use crate::{
    Asid, Error, HashedPageTable, PageFlags, PageProtection, PhysicalAddress, VirtualAddress,
    arch,
};

/// Maps kernel pages into a hashed page table that is not shared yet.
pub struct BootstrapMapper<'t> {
    table: &'t mut HashedPageTable,
}

impl<'t> BootstrapMapper<'t> {
    /// Takes exclusive hold of `table` for early mapping.
    pub fn new(table: &'t mut HashedPageTable) -> Self {
        Self { table }
    }

    /// Maps the kernel page at `address` to the frame at `physical`.
    ///
    /// `page_supplier` hands out zeroed physical pages for page table structures. A hashed
    /// page table has none, so it is never called; it is accepted so early boot code can use
    /// the same call on every architecture.
    pub fn quick_map(
        &mut self,
        address: VirtualAddress,
        physical: PhysicalAddress,
        attributes: PageFlags,
        _page_supplier: &mut dyn FnMut() -> PhysicalAddress,
    ) -> Result<(), Error> {
        if !address.is_aligned(arch::PAGE_SIZE) {
            return Err(Error::Misaligned(address.as_usize()));
        }
        if !physical.is_aligned(arch::PAGE_SIZE) {
            return Err(Error::Misaligned(physical.as_usize()));
        }

        let vsid = Asid::KERNEL.segment_id(address);
        if self.table.lookup(vsid, address).is_some() {
            return Err(Error::AlreadyMapped(address));
        }

        log::debug!("quick map {address} -> {physical}");
        self.table.insert_exclusive(
            vsid,
            address,
            physical,
            PageProtection::from_attributes(attributes),
        );
        Ok(())
    }

    /// Returns the frame the kernel page containing `address` is mapped to.
    pub fn query(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        let page = address.align_down(arch::PAGE_SIZE);
        self.table
            .lookup(Asid::KERNEL.segment_id(page), page)
            .map(|entry| entry.physical_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fatal, MIN_GROUPS, VirtualSegmentId, catch_fatal};

    const KERNEL_RW: PageFlags = PageFlags::KERNEL_READ.union(PageFlags::KERNEL_WRITE);

    fn never_called() -> PhysicalAddress {
        panic!("the bootstrap mapper needs no page table pages")
    }

    #[test]
    fn quick_map_uses_kernel_segments() {
        let mut table = HashedPageTable::with_groups(MIN_GROUPS).unwrap();
        let mut mapper = BootstrapMapper::new(&mut table);
        let address = VirtualAddress::new(0xC000_5000);
        mapper
            .quick_map(
                address,
                PhysicalAddress::new(0x0070_0000),
                KERNEL_RW,
                &mut never_called,
            )
            .unwrap();

        assert_eq!(
            mapper.query(address + 0x10),
            Some(PhysicalAddress::new(0x0070_0000))
        );
        assert_eq!(mapper.query(address + 0x1000), None);

        let entry = table.lookup(VirtualSegmentId::new(0xC), address).unwrap();
        assert_eq!(entry.protection(), PageProtection::SupervisorOnly);
        assert_eq!(table.count_valid(VirtualSegmentId::new(0xC)), 1);
    }

    #[test]
    fn quick_map_rejects_bad_requests() {
        let mut table = HashedPageTable::with_groups(MIN_GROUPS).unwrap();
        let mut mapper = BootstrapMapper::new(&mut table);
        assert_eq!(
            mapper.quick_map(
                VirtualAddress::new(0x8000_0010),
                PhysicalAddress::new(0),
                KERNEL_RW,
                &mut never_called,
            ),
            Err(Error::Misaligned(0x8000_0010))
        );

        let address = VirtualAddress::new(0x8000_0000);
        mapper
            .quick_map(address, PhysicalAddress::new(0), KERNEL_RW, &mut never_called)
            .unwrap();
        assert_eq!(
            mapper.quick_map(address, PhysicalAddress::new(0x1000), KERNEL_RW, &mut never_called),
            Err(Error::AlreadyMapped(address))
        );
    }

    #[test]
    fn quick_map_overflow_is_fatal() {
        let mut table = HashedPageTable::with_groups(MIN_GROUPS).unwrap();
        let mut mapper = BootstrapMapper::new(&mut table);
        // Same segment, same page index modulo the group mask: all share both hash groups.
        for n in 0..16 {
            mapper
                .quick_map(
                    VirtualAddress::new(0x8000_0000 + (n << 22)),
                    PhysicalAddress::new(0),
                    KERNEL_RW,
                    &mut never_called,
                )
                .unwrap();
        }

        let address = VirtualAddress::new(0x8000_0000 + (16 << 22));
        let result = catch_fatal(|| {
            mapper.quick_map(address, PhysicalAddress::new(0), KERNEL_RW, &mut never_called)
        });
        assert_eq!(
            result,
            Err(Fatal::HashTableFull {
                vsid: VirtualSegmentId::new(8),
                address
            })
        );
    }
}
