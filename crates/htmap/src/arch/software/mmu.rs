//! Emulated hashed MMU.

use crate::{HashedPageTable, PhysicalAddress, VirtualAddress, VirtualSegmentId};

/// Why an emulated access did not translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessFault {
    /// Neither hash group holds a translation (a DSI with "page not found" on hardware).
    #[error("no translation for {address} in segment {vsid}")]
    NotMapped {
        vsid: VirtualSegmentId,
        address: VirtualAddress,
    },
    /// The translation exists but its protection forbids the access.
    #[error("protection violation at {address} in segment {vsid}")]
    Protection {
        vsid: VirtualSegmentId,
        address: VirtualAddress,
    },
}

/// Performs memory accesses against a hashed page table the way the hardware does.
///
/// Each access searches the primary and then the secondary group, checks the PP bits
/// against the access, and sets the referenced bit (and the changed bit for stores) on
/// success.
pub struct SoftwareMmu<'t> {
    table: &'t HashedPageTable,
}

impl<'t> SoftwareMmu<'t> {
    /// Creates an MMU translating through `table`.
    pub const fn new(table: &'t HashedPageTable) -> Self {
        Self { table }
    }

    /// Translates a load from `address`.
    pub fn read(
        &self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        user: bool,
    ) -> Result<PhysicalAddress, AccessFault> {
        self.access(vsid, address, user, false)
    }

    /// Translates a store to `address`.
    pub fn write(
        &self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        user: bool,
    ) -> Result<PhysicalAddress, AccessFault> {
        self.access(vsid, address, user, true)
    }

    fn access(
        &self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        user: bool,
        write: bool,
    ) -> Result<PhysicalAddress, AccessFault> {
        let entry = self
            .table
            .lookup(vsid, address)
            .ok_or(AccessFault::NotMapped { vsid, address })?;

        if !entry.protection().allows(user, write) {
            return Err(AccessFault::Protection { vsid, address });
        }

        entry.record_access(write);
        Ok(entry.physical_address() + address.page_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageProtection;

    #[test]
    fn access_sets_state_bits() {
        let table = HashedPageTable::with_groups(1024).unwrap();
        let vsid = VirtualSegmentId::new(16);
        let address = VirtualAddress::new(0x0001_0000);
        table.insert(
            vsid,
            address,
            PhysicalAddress::new(0x0030_0000),
            PageProtection::ReadWrite,
        );

        let mmu = SoftwareMmu::new(&table);
        assert_eq!(
            mmu.read(vsid, address + 0x12, true),
            Ok(PhysicalAddress::new(0x0030_0012))
        );
        let entry = table.lookup(vsid, address).unwrap();
        assert!(entry.lower().referenced());
        assert!(!entry.lower().changed());

        mmu.write(vsid, address, true).unwrap();
        assert!(entry.lower().changed());
    }

    #[test]
    fn protection_faults() {
        let table = HashedPageTable::with_groups(1024).unwrap();
        let vsid = VirtualSegmentId::new(16);
        let address = VirtualAddress::new(0x0002_0000);
        table.insert(
            vsid,
            address,
            PhysicalAddress::new(0x5000),
            PageProtection::SupervisorOnly,
        );

        let mmu = SoftwareMmu::new(&table);
        assert_eq!(
            mmu.read(vsid, address, true),
            Err(AccessFault::Protection { vsid, address })
        );
        assert!(mmu.write(vsid, address, false).is_ok());
    }

    #[test]
    fn missing_translation() {
        let table = HashedPageTable::with_groups(1024).unwrap();
        let mmu = SoftwareMmu::new(&table);
        let vsid = VirtualSegmentId::new(3);
        let address = VirtualAddress::new(0x3000);
        assert_eq!(
            mmu.read(vsid, address, false),
            Err(AccessFault::NotMapped { vsid, address })
        );
    }
}
