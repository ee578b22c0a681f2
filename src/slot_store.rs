//! SlotStore: fixed-capacity key/value byte storage with per-slot state.
//!
//! Keys and values live in two flat byte arrays indexed by slot. Each slot
//! also records the hash of its key (indexing and rehashing always use the
//! stored hash) and an occupancy state.
//!
//! Byte regions are written either through `&mut self`, or through the
//! unsafe `*_shared` writers used by parallel batches. The latter require
//! that the writer owns the slot exclusively: a freshly allocated slot that
//! no other worker can reach until it is published with a release store, or
//! a slot that appears once in a deduplicated write set.

use crate::error::{HashmapError, Result};
use crate::handle::Handle;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum SlotState {
    Empty = 0,
    Occupied = 1,
    /// Claimed by an erase; still linked until the unlink phase runs.
    Tombstone = 2,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::Occupied,
            2 => SlotState::Tombstone,
            _ => SlotState::Empty,
        }
    }
}

/// Allocates `len` elements, reporting allocation failure instead of aborting.
pub(crate) fn try_boxed<T>(len: usize, init: impl FnMut() -> T) -> Result<Box<[T]>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| HashmapError::AllocationFailed {
            bytes: len.saturating_mul(core::mem::size_of::<T>()),
        })?;
    v.resize_with(len, init);
    Ok(v.into_boxed_slice())
}

pub(crate) fn try_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| HashmapError::AllocationFailed { bytes: len })?;
    v.resize(len, 0);
    Ok(v)
}

fn cells_as_bytes(cells: &[UnsafeCell<u8>]) -> &[u8] {
    // UnsafeCell<u8> has the layout of u8. Shared readers never overlap an
    // exclusive writer of the same slot (see module docs).
    unsafe { &*(cells as *const [UnsafeCell<u8>] as *const [u8]) }
}

fn cells_as_bytes_mut(cells: &mut [UnsafeCell<u8>]) -> &mut [u8] {
    unsafe { &mut *(cells as *mut [UnsafeCell<u8>] as *mut [u8]) }
}

unsafe fn copy_to_cells(dst: &[UnsafeCell<u8>], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    core::ptr::copy_nonoverlapping(src.as_ptr(), UnsafeCell::raw_get(dst.as_ptr()), src.len());
}

pub(crate) struct SlotStore {
    key_width: usize,
    value_width: usize,
    keys: Box<[UnsafeCell<u8>]>,
    values: Box<[UnsafeCell<u8>]>,
    hashes: Box<[AtomicU64]>,
    states: Box<[AtomicU8]>,
}

// SAFETY: shared access only ever writes slots owned exclusively by the
// writer (see the `*_shared` methods); all other writes need `&mut self`.
unsafe impl Sync for SlotStore {}

impl SlotStore {
    pub(crate) fn try_new(capacity: usize, key_width: usize, value_width: usize) -> Result<Self> {
        let overflow = HashmapError::CapacityOverflow {
            requested: capacity,
        };
        let key_bytes = capacity.checked_mul(key_width).ok_or(overflow.clone())?;
        let value_bytes = capacity.checked_mul(value_width).ok_or(overflow)?;
        Ok(Self {
            key_width,
            value_width,
            keys: try_boxed(key_bytes, || UnsafeCell::new(0))?,
            values: try_boxed(value_bytes, || UnsafeCell::new(0))?,
            hashes: try_boxed(capacity, || AtomicU64::new(0))?,
            states: try_boxed(capacity, || AtomicU8::new(SlotState::Empty as u8))?,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn key_width(&self) -> usize {
        self.key_width
    }

    pub(crate) fn value_width(&self) -> usize {
        self.value_width
    }

    #[inline]
    fn key_cells(&self, slot: u32) -> &[UnsafeCell<u8>] {
        let start = slot as usize * self.key_width;
        &self.keys[start..start + self.key_width]
    }

    #[inline]
    fn value_cells(&self, slot: u32) -> &[UnsafeCell<u8>] {
        let start = slot as usize * self.value_width;
        &self.values[start..start + self.value_width]
    }

    #[inline]
    pub(crate) fn key(&self, slot: u32) -> &[u8] {
        cells_as_bytes(self.key_cells(slot))
    }

    #[inline]
    pub(crate) fn value(&self, slot: u32) -> &[u8] {
        cells_as_bytes(self.value_cells(slot))
    }

    pub(crate) fn value_mut(&mut self, slot: u32) -> &mut [u8] {
        let start = slot as usize * self.value_width;
        cells_as_bytes_mut(&mut self.values[start..start + self.value_width])
    }

    #[inline]
    pub(crate) fn hash(&self, slot: u32) -> u64 {
        self.hashes[slot as usize].load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn state(&self, slot: u32) -> SlotState {
        SlotState::from_u8(self.states[slot as usize].load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_occupied(&self, slot: u32) -> bool {
        self.state(slot) == SlotState::Occupied
    }

    /// Fills a slot and marks it occupied. With `value == None` the value
    /// region keeps whatever bytes it held.
    pub(crate) fn write(&mut self, slot: u32, key: &[u8], value: Option<&[u8]>, hash: u64) {
        // SAFETY: `&mut self` gives exclusive access to every slot.
        unsafe { self.write_shared(slot, key, value, hash) }
    }

    /// Shared-access variant of `write`.
    ///
    /// # Safety
    /// The caller must own `slot` exclusively: no other thread reads or
    /// writes it until the caller publishes it with a release operation.
    pub(crate) unsafe fn write_shared(&self, slot: u32, key: &[u8], value: Option<&[u8]>, hash: u64) {
        copy_to_cells(self.key_cells(slot), key);
        if let Some(value) = value {
            copy_to_cells(self.value_cells(slot), value);
        }
        self.hashes[slot as usize].store(hash, Ordering::Relaxed);
        self.states[slot as usize].store(SlotState::Occupied as u8, Ordering::Relaxed);
    }

    /// Overwrites the value region of one slot under shared access.
    ///
    /// # Safety
    /// No other thread may access the value of `slot` during the call.
    pub(crate) unsafe fn write_value_shared(&self, slot: u32, value: &[u8]) {
        copy_to_cells(self.value_cells(slot), value);
    }

    /// Moves an occupied slot to `Tombstone`. Exactly one concurrent caller
    /// per slot succeeds.
    pub(crate) fn try_tombstone(&self, slot: u32) -> bool {
        self.states[slot as usize]
            .compare_exchange(
                SlotState::Occupied as u8,
                SlotState::Tombstone as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn clear(&mut self, slot: u32) {
        *self.states[slot as usize].get_mut() = SlotState::Empty as u8;
    }

    /// Rejects stale handles and handles to free slots among the selected
    /// elements. Runs before any output is written.
    pub(crate) fn check_handles(
        &self,
        epoch: u32,
        handles: &[Handle],
        masks: Option<&[bool]>,
    ) -> Result<()> {
        for (i, h) in handles.iter().enumerate() {
            if !masks.map_or(true, |m| m[i]) {
                continue;
            }
            if h.epoch() != epoch {
                return Err(HashmapError::StaleHandle {
                    handle_epoch: h.epoch(),
                    table_epoch: epoch,
                });
            }
            if h.slot() as usize >= self.capacity() || !self.is_occupied(h.slot()) {
                return Err(HashmapError::InvalidHandle { slot: h.slot() });
            }
        }
        Ok(())
    }
}
