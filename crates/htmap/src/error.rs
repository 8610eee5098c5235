//! Recoverable errors and fatal invariant violations.
//!
//! Anything the generic VM layer can reasonably handle is an [`Error`] and comes back as a
//! `Result`. Anything that means the translation state can no longer be trusted is a
//! [`Fatal`] and never returns: it goes through [`fatal`] to the kernel's halt path.

use crate::{Asid, PhysicalAddress, VirtualAddress, VirtualSegmentId};

/// Recoverable translation map errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Every address space identifier is in use.
    #[error("out of address space identifiers")]
    AsidExhausted,
    /// The kernel translation map has already been created.
    #[error("the kernel translation map already exists")]
    KernelMapExists,
    /// The address is not page aligned.
    #[error("address {0:#x} is not page aligned")]
    Misaligned(usize),
    /// The address lies outside the range the translation map covers.
    #[error("address {0} is outside the range of this translation map")]
    AddressOutOfRange(VirtualAddress),
    /// The address already has a translation in this address space.
    #[error("address {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    /// The hashed page table storage has an unusable geometry.
    #[error("unusable hashed page table of {0:#x} bytes")]
    InvalidTableSize(usize),
    /// The I/O window has already been mapped.
    #[error("the I/O window is already mapped")]
    IoWindowMapped,
}

/// Invariant violations that halt the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fatal {
    /// Both the primary and the secondary group of a translation are full.
    #[error("hash table full: no free slot for vsid {vsid} at {address}")]
    HashTableFull {
        vsid: VirtualSegmentId,
        address: VirtualAddress,
    },
    /// A translation map was destroyed while it still had mappings.
    #[error("translation map {asid} destroyed with {count} pages still mapped")]
    DestroyWhileMapped { asid: Asid, count: usize },
    /// A physical page outside the I/O window's backing range was requested.
    #[error("physical address {0} cannot be provided by the I/O window")]
    PhysicalOutsideIoWindow(PhysicalAddress),
    /// An address outside the I/O window was handed back.
    #[error("virtual address {0} is outside the I/O window")]
    VirtualOutsideIoWindow(VirtualAddress),
}

/// A handler that stops the kernel after a fatal translation error.
pub type FatalHandler = fn(&Fatal) -> !;

static FATAL_HANDLER: spin::Once<FatalHandler> = spin::Once::new();

/// Installs the kernel's fatal error handler.
///
/// Until a handler is installed, fatal errors panic.
///
/// # Panics
///
/// Panics if a handler has already been installed.
pub fn set_fatal_handler(handler: FatalHandler) {
    if !install_handler(&FATAL_HANDLER, handler) {
        panic!("fatal handler already set");
    }
}

/// Stores `handler` in `slot`, returning whether this call was the one that set it.
fn install_handler(slot: &spin::Once<FatalHandler>, handler: FatalHandler) -> bool {
    let mut installed = false;
    slot.call_once(|| {
        installed = true;
        handler
    });
    installed
}

/// Stops the kernel on an unrecoverable translation error.
#[cold]
pub fn fatal(error: Fatal) -> ! {
    log::error!("{error}");

    if let Some(handler) = FATAL_HANDLER.get() {
        handler(&error);
    }

    // Under test the payload is the error itself so `catch_fatal` can hand it back.
    #[cfg(test)]
    std::panic::panic_any(error);

    #[cfg(not(test))]
    panic!("{error}");
}

/// Runs `f`, converting a fatal stop into an `Err`.
#[cfg(test)]
pub(crate) fn catch_fatal<R>(f: impl FnOnce() -> R) -> Result<R, Fatal> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        match payload.downcast::<Fatal>() {
            Ok(error) => *error,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}
