//! Area attributes and page state flags.

bitflags::bitflags! {
    /// Flags exchanged with the generic VM layer.
    ///
    /// The low byte carries area protection, as passed to `map` and `protect` and reported
    /// back by `query`. The next bits carry page state, reported by `query` and accepted by
    /// `clear_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u32 {
        /// User code may read the page.
        const READ = 1 << 0;
        /// User code may write the page.
        const WRITE = 1 << 1;
        /// User code may execute the page.
        const EXECUTE = 1 << 2;
        /// Kernel code may read the page.
        const KERNEL_READ = 1 << 4;
        /// Kernel code may write the page.
        const KERNEL_WRITE = 1 << 5;
        /// Kernel code may execute the page.
        const KERNEL_EXECUTE = 1 << 6;

        /// The page has been written since the bit was last cleared.
        const MODIFIED = 1 << 8;
        /// The page has been accessed since the bit was last cleared.
        const ACCESSED = 1 << 9;
        /// The page is mapped.
        const PRESENT = 1 << 10;

        /// Protection bits that make a page user-visible.
        const USER_PROTECTION = Self::READ.bits() | Self::WRITE.bits();
        /// All protection bits.
        const PROTECTION = Self::READ.bits()
            | Self::WRITE.bits()
            | Self::EXECUTE.bits()
            | Self::KERNEL_READ.bits()
            | Self::KERNEL_WRITE.bits()
            | Self::KERNEL_EXECUTE.bits();
    }
}
