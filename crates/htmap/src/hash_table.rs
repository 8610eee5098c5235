//! The hashed page table shared by every address space.
//!
//! A translation for (VSID, address) lives in one of two groups: the one selected by the
//! primary hash, or failing that the one selected by its complement. There is no chaining
//! and no eviction; when both groups are full the system stops.
//!
//! Slots are claimed in one of two ways. At runtime any number of translation maps insert
//! concurrently, each holding only its own lock, so a claim on a group is serialized by one
//! of a fixed set of stripe locks. During bootstrap the table is held by `&mut` and nothing
//! else can touch it, so no lock is taken. Both paths run the same placement code.

use alloc::boxed::Box;
use core::mem;

use crate::{
    Error, Fatal, PageProtection, PageTableEntry, PageTableEntryGroup, PhysicalAddress,
    VirtualAddress, VirtualSegmentId, abbreviated_page_index, fatal, primary_hash,
    secondary_hash,
};

/// Smallest supported table, in groups (64 KiB).
///
/// With at least this many groups the group index supplies the ten low bits of the page
/// index and the abbreviated page index the six high ones, so an entry identifies its page.
pub const MIN_GROUPS: usize = 1024;

/// Largest supported table, in groups (32 MiB).
pub const MAX_GROUPS: usize = 1 << 19;

/// Number of locks serializing slot claims.
const CLAIM_STRIPES: usize = 64;

/// Where an insertion put a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Index of the group holding the entry.
    pub group: usize,
    /// Slot within the group.
    pub slot: usize,
    /// Whether the entry went through the secondary hash.
    pub secondary: bool,
}

/// The hashed page table.
pub struct HashedPageTable {
    groups: &'static [PageTableEntryGroup],
    hash_mask: u32,
    stripes: [spin::Mutex<()>; CLAIM_STRIPES],
}

impl HashedPageTable {
    /// Allocates a zeroed table of `count` groups on the heap.
    ///
    /// The table is never freed.
    pub fn with_groups(count: usize) -> Result<Self, Error> {
        Self::validate(count)?;
        let groups: Box<[PageTableEntryGroup]> =
            (0..count).map(|_| PageTableEntryGroup::new()).collect();
        Ok(Self::from_groups(Box::leak(groups)))
    }

    /// Adopts a table already present in memory.
    ///
    /// Existing entries are kept, so a table populated by the boot loader keeps its
    /// translations.
    ///
    /// # Safety
    ///
    /// `base` must point to `size` bytes of mapped memory, aligned to `size`, holding valid
    /// or zeroed entries, that stays alive and is not accessed other than through the
    /// returned table for the rest of the system's lifetime.
    pub unsafe fn from_raw(base: *mut PageTableEntryGroup, size: usize) -> Result<Self, Error> {
        let count = size / mem::size_of::<PageTableEntryGroup>();
        if size % mem::size_of::<PageTableEntryGroup>() != 0 {
            return Err(Error::InvalidTableSize(size));
        }
        Self::validate(count)?;
        if (base as usize) % size != 0 {
            return Err(Error::InvalidTableSize(size));
        }

        // SAFETY: The caller guarantees the region is live, exclusive and correctly sized.
        let groups = unsafe { core::slice::from_raw_parts(base, count) };
        Ok(Self::from_groups(groups))
    }

    fn validate(count: usize) -> Result<(), Error> {
        if !count.is_power_of_two() || !(MIN_GROUPS..=MAX_GROUPS).contains(&count) {
            return Err(Error::InvalidTableSize(
                count * mem::size_of::<PageTableEntryGroup>(),
            ));
        }
        Ok(())
    }

    fn from_groups(groups: &'static [PageTableEntryGroup]) -> Self {
        log::info!(
            "hashed page table at {:p}: {} groups ({:#x} bytes)",
            groups.as_ptr(),
            groups.len(),
            mem::size_of_val(groups)
        );
        Self {
            groups,
            hash_mask: (groups.len() - 1) as u32,
            stripes: [const { spin::Mutex::new(()) }; CLAIM_STRIPES],
        }
    }

    /// Returns the number of groups.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Returns the mask applied to a hash to select a group.
    #[inline]
    pub fn hash_mask(&self) -> u32 {
        self.hash_mask
    }

    /// Returns the group a hash selects.
    #[inline]
    pub fn group(&self, hash: u32) -> &PageTableEntryGroup {
        &self.groups[(hash & self.hash_mask) as usize]
    }

    /// Returns every entry in the table.
    pub fn entries(&self) -> impl Iterator<Item = &PageTableEntry> {
        self.groups.iter().flat_map(|group| group.entries().iter())
    }

    /// Counts the valid entries belonging to `vsid`.
    pub fn count_valid(&self, vsid: VirtualSegmentId) -> usize {
        self.entries()
            .filter(|entry| {
                let upper = entry.upper();
                upper.valid() && upper.virtual_segment_id() == vsid.as_u32()
            })
            .count()
    }

    /// Inserts a translation from a concurrent context.
    ///
    /// The caller must hold the lock of the translation map owning `vsid` and must have
    /// checked that no translation for `address` exists yet.
    pub fn insert(
        &self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        physical: PhysicalAddress,
        protection: PageProtection,
    ) -> Placement {
        self.place(vsid, address, physical, protection, |group| {
            Some(self.stripes[group % CLAIM_STRIPES].lock())
        })
    }

    /// Inserts a translation while holding the table exclusively.
    pub fn insert_exclusive(
        &mut self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        physical: PhysicalAddress,
        protection: PageProtection,
    ) -> Placement {
        self.place(vsid, address, physical, protection, |_| None)
    }

    fn place<'a>(
        &'a self,
        vsid: VirtualSegmentId,
        address: VirtualAddress,
        physical: PhysicalAddress,
        protection: PageProtection,
        claim: impl Fn(usize) -> Option<spin::MutexGuard<'a, ()>>,
    ) -> Placement {
        let primary = primary_hash(vsid, address);
        for (secondary, hash) in [(false, primary), (true, secondary_hash(primary))] {
            let group = (hash & self.hash_mask) as usize;
            let _claim = claim(group);
            if let Some((slot, entry)) = self.groups[group].free_entry() {
                entry.fill(vsid, address, physical, protection, secondary);
                log::trace!(
                    "vsid {vsid} {address} -> {physical} in group {group:#x} slot {slot}{}",
                    if secondary { " (secondary)" } else { "" }
                );
                return Placement {
                    group,
                    slot,
                    secondary,
                };
            }
        }

        fatal(Fatal::HashTableFull { vsid, address })
    }

    /// Finds the valid translation for (VSID, address).
    pub fn lookup(&self, vsid: VirtualSegmentId, address: VirtualAddress) -> Option<&PageTableEntry> {
        let api = abbreviated_page_index(address);
        let primary = primary_hash(vsid, address);
        [(false, primary), (true, secondary_hash(primary))]
            .into_iter()
            .find_map(|(secondary, hash)| {
                self.group(hash)
                    .find(vsid, secondary, api)
                    .map(|(_, entry)| entry)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameNumber, PageNumber, arch, catch_fatal};
    use proptest::prelude::*;

    fn table() -> HashedPageTable {
        HashedPageTable::with_groups(MIN_GROUPS).unwrap()
    }

    /// Addresses in segment 0 that share a primary hash with 0x0000_0000 for `vsid`.
    ///
    /// Varying only bits 22-27 keeps the hashed page index (bits 12-27, masked to the group
    /// bits) fixed while changing the abbreviated page index.
    fn colliding(count: usize) -> impl Iterator<Item = VirtualAddress> {
        (0..count).map(|i| VirtualAddress::new(i << 22))
    }

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(
            HashedPageTable::with_groups(512).err(),
            Some(Error::InvalidTableSize(512 * 64))
        );
        assert_eq!(
            HashedPageTable::with_groups(1536).err(),
            Some(Error::InvalidTableSize(1536 * 64))
        );
        assert!(HashedPageTable::with_groups(2048).is_ok());
    }

    #[test]
    fn insert_then_lookup() {
        let table = table();
        let vsid = VirtualSegmentId::new(16);
        let address = VirtualAddress::new(0x0123_4000);
        let placement = table.insert(
            vsid,
            address,
            PhysicalAddress::new(0x0100_0000),
            PageProtection::ReadWrite,
        );

        assert!(!placement.secondary);
        assert_eq!(
            placement.group,
            (primary_hash(vsid, address) & table.hash_mask()) as usize
        );
        let entry = table.lookup(vsid, address).unwrap();
        assert_eq!(entry.physical_address(), PhysicalAddress::new(0x0100_0000));
        assert!(table.lookup(VirtualSegmentId::new(17), address).is_none());
        assert!(table.lookup(vsid, address + arch::PAGE_SIZE).is_none());
        assert_eq!(table.count_valid(vsid), 1);
    }

    #[test]
    fn overflows_into_secondary_group() {
        let table = table();
        let vsid = VirtualSegmentId::new(40);
        let placements: Vec<_> = colliding(16)
            .enumerate()
            .map(|(i, address)| {
                table.insert(
                    vsid,
                    address,
                    PhysicalAddress::new(i * arch::PAGE_SIZE),
                    PageProtection::ReadWrite,
                )
            })
            .collect();

        assert!(placements[..8].iter().all(|p| !p.secondary));
        assert!(placements[8..].iter().all(|p| p.secondary));
        assert_ne!(placements[0].group, placements[8].group);

        for (i, address) in colliding(16).enumerate() {
            let entry = table.lookup(vsid, address).unwrap();
            assert_eq!(entry.physical_address(), PhysicalAddress::new(i * arch::PAGE_SIZE));
        }
    }

    #[test]
    fn full_groups_are_fatal() {
        let table = table();
        let vsid = VirtualSegmentId::new(40);
        for address in colliding(16) {
            table.insert(vsid, address, PhysicalAddress::new(0), PageProtection::ReadWrite);
        }

        let address = VirtualAddress::new(16 << 22);
        let result = catch_fatal(|| {
            table.insert(vsid, address, PhysicalAddress::new(0), PageProtection::ReadWrite)
        });
        assert_eq!(result, Err(Fatal::HashTableFull { vsid, address }));
    }

    #[test]
    fn invalidated_slot_is_reused() {
        let table = table();
        let vsid = VirtualSegmentId::new(40);
        for address in colliding(8) {
            table.insert(vsid, address, PhysicalAddress::new(0), PageProtection::ReadWrite);
        }
        let victim = VirtualAddress::new(3 << 22);
        table.lookup(vsid, victim).unwrap().invalidate();

        let placement = table.insert(
            vsid,
            VirtualAddress::new(20 << 22),
            PhysicalAddress::new(0x9000),
            PageProtection::ReadOnly,
        );
        assert_eq!(placement.slot, 3);
        assert!(!placement.secondary);
        assert!(table.lookup(vsid, victim).is_none());
    }

    #[test]
    fn exclusive_insert_matches_shared_insert() {
        let mut exclusive = table();
        let shared = table();
        let vsid = VirtualSegmentId::new(5);
        let address = VirtualAddress::new(0xF012_3000);

        let a = exclusive.insert_exclusive(
            vsid,
            address,
            PhysicalAddress::new(0x4000),
            PageProtection::SupervisorOnly,
        );
        let b = shared.insert(
            vsid,
            address,
            PhysicalAddress::new(0x4000),
            PageProtection::SupervisorOnly,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn adopts_existing_memory() {
        let size = MIN_GROUPS * mem::size_of::<PageTableEntryGroup>();
        let layout = std::alloc::Layout::from_size_align(size, size).unwrap();
        // SAFETY: The layout has a nonzero size.
        let base = unsafe { std::alloc::alloc_zeroed(layout) } as *mut PageTableEntryGroup;
        assert!(!base.is_null());

        // SAFETY: The region is zeroed, aligned to its size and never freed.
        let table = unsafe { HashedPageTable::from_raw(base, size) }.unwrap();
        assert_eq!(table.group_count(), MIN_GROUPS);
        assert_eq!(table.entries().filter(|entry| entry.is_valid()).count(), 0);

        // SAFETY: Same region, now offset so it is no longer aligned to its size.
        let misaligned = unsafe { HashedPageTable::from_raw(base.add(1), size) };
        assert_eq!(misaligned.err(), Some(Error::InvalidTableSize(size)));
    }

    proptest! {
        #[test]
        fn lookup_finds_inserted_translation(
            vsid in 0u32..=VirtualSegmentId::MAX,
            page in 0usize..(1 << 20),
            frame in 0usize..(1 << 20),
        ) {
            let table = table();
            let vsid = VirtualSegmentId::new(vsid);
            let address = PageNumber::new(page).start();
            let placement = table.insert(
                vsid,
                address,
                FrameNumber::new(frame).start(),
                PageProtection::ReadWrite,
            );

            let primary = primary_hash(vsid, address);
            let hash = if placement.secondary { secondary_hash(primary) } else { primary };
            prop_assert_eq!(placement.group, (hash & table.hash_mask()) as usize);

            let entry = table.lookup(vsid, address).unwrap();
            prop_assert_eq!(entry.physical_address(), FrameNumber::new(frame).start());
            prop_assert_eq!(entry.upper().secondary_hash(), placement.secondary);
        }

        // Four VSIDs and four low page indexes land on group pairs 0-3, so the table fills
        // up and spills into the secondary groups.
        #[test]
        fn crowded_groups_round_trip(
            keys in prop::collection::hash_set((0u32..4, 0usize..4, 0usize..64), 48..200),
        ) {
            let table = table();
            let has_room = |hash: u32| {
                table.group(hash).entries().iter().any(|entry| !entry.is_valid())
            };

            let mut placed = Vec::new();
            let mut skipped = Vec::new();
            for (n, (vsid, low, high)) in keys.into_iter().enumerate() {
                let vsid = VirtualSegmentId::new(vsid);
                let address = VirtualAddress::new((high << 22) | (low << 12));
                let primary = primary_hash(vsid, address);
                if !has_room(primary) && !has_room(secondary_hash(primary)) {
                    skipped.push((vsid, address));
                    continue;
                }

                let physical = FrameNumber::new(n).start();
                let placement = table.insert(vsid, address, physical, PageProtection::ReadWrite);
                placed.push((vsid, address, physical, placement));
            }

            prop_assert!(placed.iter().any(|(.., placement)| placement.secondary));
            for (vsid, address, physical, placement) in placed {
                let entry = table.lookup(vsid, address).unwrap();
                prop_assert_eq!(entry.physical_address(), physical);
                prop_assert_eq!(entry.upper().secondary_hash(), placement.secondary);
                prop_assert!(placement.group < 4 || placement.group >= MIN_GROUPS - 4);
            }
            for (vsid, address) in skipped {
                prop_assert!(table.lookup(vsid, address).is_none());
            }
        }
    }
}
