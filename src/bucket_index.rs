//! BucketIndex: per-bucket singly linked chains of slot indices.
//!
//! A key's bucket is `hash % bucket_count`. The bucket head and each slot's
//! `next` link are atomics; a new slot is published by a compare-and-swap
//! on the head, so concurrent inserters of the same key agree on a single
//! winner. Links are written before the release CAS and read with acquire
//! loads, so a traversal only ever reaches fully written slots.

use crate::error::Result;
use crate::handle::NIL;
use crate::slot_store::{try_boxed, SlotState, SlotStore};
use core::sync::atomic::{AtomicU32, Ordering};

pub(crate) struct BucketIndex {
    heads: Box<[AtomicU32]>,
    next: Box<[AtomicU32]>,
}

impl BucketIndex {
    pub(crate) fn try_new(bucket_count: usize, capacity: usize) -> Result<Self> {
        Ok(Self {
            heads: try_boxed(bucket_count, || AtomicU32::new(NIL))?,
            next: try_boxed(capacity, || AtomicU32::new(NIL))?,
        })
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub(crate) fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.heads.len() as u64) as usize
    }

    #[inline]
    pub(crate) fn head(&self, bucket: usize) -> u32 {
        self.heads[bucket].load(Ordering::Acquire)
    }

    /// Slots reachable from `start`, in chain order.
    pub(crate) fn chain(&self, start: u32) -> Chain<'_> {
        Chain {
            index: self,
            cur: start,
        }
    }

    /// Finds the slot holding `key` in the chain starting at `start`.
    /// Tombstoned slots still match; callers decide what that means.
    pub(crate) fn lookup(&self, start: u32, hash: u64, key: &[u8], store: &SlotStore) -> Option<u32> {
        self.chain(start)
            .find(|&slot| store.hash(slot) == hash && store.key(slot) == key)
    }

    /// Links `slot` in front of `expected`. On contention returns the
    /// head that won, so the caller can rescan and retry.
    pub(crate) fn try_link(&self, bucket: usize, expected: u32, slot: u32) -> core::result::Result<(), u32> {
        self.next[slot as usize].store(expected, Ordering::Relaxed);
        self.heads[bucket]
            .compare_exchange(expected, slot, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    /// Removes every tombstoned slot from one bucket's chain and returns
    /// them. Each bucket must be handled by a single worker.
    pub(crate) fn unlink_tombstones(&self, bucket: usize, store: &SlotStore) -> Vec<u32> {
        let mut removed = Vec::new();
        let mut prev = NIL;
        let mut cur = self.head(bucket);
        while cur != NIL {
            let next = self.next[cur as usize].load(Ordering::Acquire);
            if store.state(cur) == SlotState::Tombstone {
                if prev == NIL {
                    self.heads[bucket].store(next, Ordering::Release);
                } else {
                    self.next[prev as usize].store(next, Ordering::Release);
                }
                removed.push(cur);
            } else {
                prev = cur;
            }
            cur = next;
        }
        removed
    }

    pub(crate) fn bucket_sizes(&self) -> Vec<usize> {
        (0..self.bucket_count())
            .map(|b| self.chain(self.head(b)).count())
            .collect()
    }
}

pub(crate) struct Chain<'a> {
    index: &'a BucketIndex,
    cur: u32,
}

impl<'a> Iterator for Chain<'a> {
    type Item = u32;
    #[inline]
    fn next(&mut self) -> Option<u32> {
        if self.cur == NIL {
            return None;
        }
        let slot = self.cur;
        self.cur = self.index.next[slot as usize].load(Ordering::Acquire);
        Some(slot)
    }
}
