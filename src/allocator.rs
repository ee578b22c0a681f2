//! FreeSlotAllocator: atomic stack of free slot indices.
//!
//! `slots[top..]` holds the free indices. Allocation bumps `top` with a
//! single `fetch_add`, so concurrent callers always receive disjoint
//! indices. Release pushes an index back below `top` and needs exclusive
//! access; batches release their leftovers after the parallel phase.

use crate::error::Result;
use crate::slot_store::try_boxed;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub(crate) struct FreeSlotAllocator {
    slots: Box<[AtomicU32]>,
    top: AtomicUsize,
}

impl FreeSlotAllocator {
    pub(crate) fn try_new(capacity: usize) -> Result<Self> {
        let mut next = 0u32;
        let slots = try_boxed(capacity, || {
            let s = AtomicU32::new(next);
            next = next.wrapping_add(1);
            s
        })?;
        Ok(Self {
            slots,
            top: AtomicUsize::new(0),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently handed out.
    pub(crate) fn allocated(&self) -> usize {
        self.top.load(Ordering::Acquire).min(self.capacity())
    }

    pub(crate) fn available(&self) -> usize {
        self.capacity() - self.allocated()
    }

    pub(crate) fn allocate(&self) -> Option<u32> {
        let pos = self.top.fetch_add(1, Ordering::AcqRel);
        if pos < self.slots.len() {
            Some(self.slots[pos].load(Ordering::Acquire))
        } else {
            self.top.fetch_sub(1, Ordering::AcqRel);
            None
        }
    }

    /// Allocates up to `count` slots at once; returns fewer when the store
    /// is exhausted.
    pub(crate) fn allocate_many(&self, count: usize) -> Vec<u32> {
        let start = self.top.fetch_add(count, Ordering::AcqRel);
        let granted = self.capacity().saturating_sub(start).min(count);
        if granted < count {
            self.top.fetch_sub(count - granted, Ordering::AcqRel);
        }
        if granted == 0 {
            return Vec::new();
        }
        self.slots[start..start + granted]
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .collect()
    }

    pub(crate) fn release(&mut self, slot: u32) {
        let top = self.top.get_mut();
        debug_assert!(*top > 0, "release without a matching allocation");
        *top -= 1;
        *self.slots[*top].get_mut() = slot;
    }
}
