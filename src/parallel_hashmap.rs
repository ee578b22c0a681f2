//! ParallelHashmap: data-parallel backend on rayon.
//!
//! Every batch element is processed by an independent rayon task. The only
//! coordination is atomic:
//! - Insert reserves one slot per element up front (`allocate_many`), so
//!   workers never contend on the allocator. A worker scans its bucket
//!   chain, and only if the key is absent writes its slot and tries to
//!   link it with a CAS on the bucket head. A failed CAS means another
//!   worker linked first; the chain is rescanned from the new head, which
//!   either reveals the same key (this worker lost) or lets it retry.
//!   Unused reservations go back to the allocator after the parallel phase.
//! - Erase claims slots with a CAS `Occupied -> Tombstone`, then unlinks
//!   the tombstones bucket by bucket and releases them.
//!
//! Read-only batches (`find`, `unpack`, `handles`) need no coordination.

use crate::allocator::FreeSlotAllocator;
use crate::bucket_index::BucketIndex;
use crate::device::{is_selected, DeviceHashmap, TableShape};
use crate::error::{HashmapError, Result};
use crate::handle::{next_epoch, Handle};
use crate::slot_store::SlotStore;
use core::hash::BuildHasher;
use hashbrown::HashMap;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;

pub(crate) struct ParallelHashmap<S> {
    hasher: S,
    store: SlotStore,
    index: BucketIndex,
    allocator: FreeSlotAllocator,
    pool: Option<Arc<ThreadPool>>,
    epoch: u32,
}

impl<S> ParallelHashmap<S>
where
    S: BuildHasher + Clone + Send + Sync,
{
    pub(crate) fn try_new(
        hasher: S,
        shape: TableShape,
        pool: Option<Arc<ThreadPool>>,
        epoch: u32,
    ) -> Result<Self> {
        // The bucket index goes first: an oversized bucket count fails
        // before any slot storage is touched.
        let index = BucketIndex::try_new(shape.bucket_count, shape.capacity)?;
        Ok(Self {
            hasher,
            store: SlotStore::try_new(shape.capacity, shape.key_width, shape.value_width)?,
            index,
            allocator: FreeSlotAllocator::try_new(shape.capacity)?,
            pool,
            epoch,
        })
    }

    /// Runs `op` inside the dedicated pool when one was configured.
    fn run<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn lookup(&self, key: &[u8]) -> Option<u32> {
        let hash = self.hasher.hash_one(key);
        let head = self.index.head(self.index.bucket_of(hash));
        self.index.lookup(head, hash, key, &self.store)
    }

    /// Inserts one key using the reserved `slot`. Returns the entry's handle
    /// and whether `slot` was linked.
    fn insert_one(&self, key: &[u8], value: Option<&[u8]>, slot: u32) -> (Handle, bool) {
        let hash = self.hasher.hash_one(key);
        let bucket = self.index.bucket_of(hash);
        let mut head = self.index.head(bucket);
        let mut written = false;
        loop {
            if let Some(existing) = self.index.lookup(head, hash, key, &self.store) {
                return (Handle::new(existing, self.epoch), false);
            }
            if !written {
                // SAFETY: `slot` came from this batch's reservation and is
                // owned by this element alone; it becomes reachable only
                // through the release CAS in `try_link`.
                unsafe { self.store.write_shared(slot, key, value, hash) };
                written = true;
            }
            match self.index.try_link(bucket, head, slot) {
                Ok(()) => return (Handle::new(slot, self.epoch), true),
                Err(current) => head = current,
            }
        }
    }
}

impl<S> DeviceHashmap for ParallelHashmap<S>
where
    S: BuildHasher + Clone + Send + Sync,
{
    fn insert(
        &mut self,
        keys: &[u8],
        values: Option<&[u8]>,
        mut handles: Option<&mut [Handle]>,
        mut masks: Option<&mut [bool]>,
    ) -> Result<()> {
        let (kw, vw) = (self.store.key_width(), self.store.value_width());
        let count = keys.len() / kw;
        let reserved = self.allocator.allocate_many(count);
        if reserved.len() < count {
            let available = reserved.len();
            for slot in reserved {
                self.allocator.release(slot);
            }
            return Err(HashmapError::CapacityExhausted {
                requested: count,
                available,
            });
        }

        let outcomes: Vec<(Handle, bool)> = self.run(|| {
            keys.par_chunks(kw)
                .zip(reserved.par_iter())
                .enumerate()
                .map(|(i, (key, &slot))| {
                    let value = values.map(|v| &v[i * vw..(i + 1) * vw]);
                    self.insert_one(key, value, slot)
                })
                .collect()
        });

        for (i, &(handle, linked)) in outcomes.iter().enumerate() {
            if !linked {
                self.store.clear(reserved[i]);
                self.allocator.release(reserved[i]);
            }
            if let Some(h) = handles.as_deref_mut() {
                h[i] = handle;
            }
            if let Some(m) = masks.as_deref_mut() {
                m[i] = linked;
            }
        }
        Ok(())
    }

    fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]) {
        let kw = self.store.key_width();
        let epoch = self.epoch;
        self.run(|| {
            keys.par_chunks(kw)
                .zip(handles.par_iter_mut())
                .zip(masks.par_iter_mut())
                .for_each(|((key, handle), mask)| match self.lookup(key) {
                    Some(slot) => {
                        *handle = Handle::new(slot, epoch);
                        *mask = true;
                    }
                    None => {
                        *handle = Handle::INVALID;
                        *mask = false;
                    }
                })
        });
    }

    fn erase(&mut self, keys: &[u8], masks: Option<&mut [bool]>) {
        let kw = self.store.key_width();
        let claimed: Vec<Option<u32>> = self.run(|| {
            keys.par_chunks(kw)
                .map(|key| {
                    self.lookup(key)
                        .filter(|&slot| self.store.try_tombstone(slot))
                })
                .collect()
        });

        let mut buckets: Vec<usize> = claimed
            .iter()
            .flatten()
            .map(|&slot| self.index.bucket_of(self.store.hash(slot)))
            .collect();
        buckets.sort_unstable();
        buckets.dedup();
        let freed: Vec<u32> = self.run(|| {
            buckets
                .par_iter()
                .flat_map_iter(|&b| self.index.unlink_tombstones(b, &self.store))
                .collect()
        });
        for slot in freed {
            self.store.clear(slot);
            self.allocator.release(slot);
        }

        if let Some(masks) = masks {
            for (m, c) in masks.iter_mut().zip(&claimed) {
                *m = c.is_some();
            }
        }
    }

    fn handles(&self) -> Vec<Handle> {
        let capacity = self.store.capacity() as u32;
        let epoch = self.epoch;
        self.run(|| {
            (0..capacity)
                .into_par_iter()
                .filter(|&slot| self.store.is_occupied(slot))
                .map(|slot| Handle::new(slot, epoch))
                .collect()
        })
    }

    fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        keys_out: Option<&mut [u8]>,
        values_out: Option<&mut [u8]>,
    ) -> Result<()> {
        self.store.check_handles(self.epoch, handles, masks)?;
        let (kw, vw) = (self.store.key_width(), self.store.value_width());
        let store = &self.store;
        self.run(|| {
            if let Some(out) = keys_out {
                out.par_chunks_mut(kw)
                    .zip(handles.par_iter())
                    .enumerate()
                    .filter(|(i, _)| is_selected(masks, *i))
                    .for_each(|(_, (dst, h))| dst.copy_from_slice(store.key(h.slot())));
            }
            if let (Some(out), true) = (values_out, vw > 0) {
                out.par_chunks_mut(vw)
                    .zip(handles.par_iter())
                    .enumerate()
                    .filter(|(i, _)| is_selected(masks, *i))
                    .for_each(|(_, (dst, h))| dst.copy_from_slice(store.value(h.slot())));
            }
        });
        Ok(())
    }

    fn assign(&mut self, handles: &[Handle], masks: Option<&[bool]>, values: &[u8]) -> Result<()> {
        self.store.check_handles(self.epoch, handles, masks)?;
        let vw = self.store.value_width();
        if vw == 0 {
            return Ok(());
        }
        // Last occurrence of a slot wins, matching the host backend.
        let mut last: HashMap<u32, usize> = HashMap::with_capacity(handles.len());
        for (i, h) in handles.iter().enumerate() {
            if is_selected(masks, i) {
                last.insert(h.slot(), i);
            }
        }
        let writes: Vec<(u32, usize)> = last.into_iter().collect();
        let store = &self.store;
        self.run(|| {
            writes.par_iter().for_each(|&(slot, i)| {
                // SAFETY: each slot occurs once in `writes`, and `&mut self`
                // keeps every other reader out for the duration.
                unsafe { store.write_value_shared(slot, &values[i * vw..(i + 1) * vw]) }
            })
        });
        Ok(())
    }

    fn rehash(&mut self, bucket_count: usize, capacity: usize) -> Result<()> {
        let (keys, values) = self.dump()?;
        let shape = TableShape {
            bucket_count,
            capacity,
            ..self.shape()
        };
        let mut fresh = Self::try_new(
            self.hasher.clone(),
            shape,
            self.pool.clone(),
            next_epoch(self.epoch),
        )?;
        fresh.insert(&keys, Some(&values), None, None)?;
        *self = fresh;
        Ok(())
    }

    fn size(&self) -> usize {
        self.allocator.allocated()
    }

    fn shape(&self) -> TableShape {
        TableShape {
            bucket_count: self.index.bucket_count(),
            capacity: self.store.capacity(),
            key_width: self.store.key_width(),
            value_width: self.store.value_width(),
        }
    }

    fn bucket_sizes(&self) -> Vec<usize> {
        self.index.bucket_sizes()
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }
}
