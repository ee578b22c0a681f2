//! Handle: fixed-width reference to one occupied slot.

/// Slot index meaning "no slot". Also terminates bucket chains.
pub(crate) const NIL: u32 = u32::MAX;

/// Largest slot count a table may have; every index stays below `NIL`.
pub const MAX_CAPACITY: usize = NIL as usize;

/// Epoch of a freshly built table. Epoch 0 is never current, so
/// `Handle::INVALID` is always stale.
pub(crate) const FIRST_EPOCH: u32 = 1;

pub(crate) fn next_epoch(epoch: u32) -> u32 {
    match epoch.wrapping_add(1) {
        0 => FIRST_EPOCH,
        e => e,
    }
}

/// Opaque reference to an entry, as returned by `insert`, `activate`,
/// `find` and `handles`.
///
/// A handle is a plain 8-byte record (`slot`, `epoch`) so callers can keep
/// large arrays of them. It stays valid until the next rehash, explicit or
/// triggered by a growing insert; after that the table's epoch has moved on
/// and `unpack`/`assign` reject it with `HashmapError::StaleHandle`.
///
/// Erasing an entry does not change the epoch. A handle to an erased entry
/// is rejected while its slot is free, but may alias a newer entry once the
/// slot is reused.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle {
    slot: u32,
    epoch: u32,
}

impl Handle {
    /// Written by `find` for keys that are not present.
    pub const INVALID: Handle = Handle { slot: NIL, epoch: 0 };

    pub(crate) fn new(slot: u32, epoch: u32) -> Self {
        Handle { slot, epoch }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::INVALID
    }
}
