//! HostHashmap: sequential backend over a `hashbrown::HashTable` probe index.
//!
//! The index stores slot numbers only; keys, values and hashes live in the
//! `SlotStore`. Probing compares the stored hash before the key bytes and
//! rehashing the index reuses stored hashes, so keys are hashed once.

use crate::allocator::FreeSlotAllocator;
use crate::device::{is_selected, DeviceHashmap, TableShape};
use crate::error::{HashmapError, Result};
use crate::handle::{next_epoch, Handle};
use crate::slot_store::SlotStore;
use core::hash::BuildHasher;
use hashbrown::hash_table::Entry;
use hashbrown::HashTable;

pub(crate) struct HostHashmap<S> {
    hasher: S,
    index: HashTable<u32>,
    store: SlotStore,
    allocator: FreeSlotAllocator,
    /// Virtual; no bucket array backs it.
    bucket_count: usize,
    epoch: u32,
}

impl<S> HostHashmap<S>
where
    S: BuildHasher + Clone,
{
    pub(crate) fn try_new(hasher: S, shape: TableShape, epoch: u32) -> Result<Self> {
        let store = SlotStore::try_new(shape.capacity, shape.key_width, shape.value_width)?;
        let allocator = FreeSlotAllocator::try_new(shape.capacity)?;
        let mut index = HashTable::new();
        index
            .try_reserve(shape.capacity, |&s| store.hash(s))
            .map_err(|_| HashmapError::AllocationFailed {
                bytes: shape.capacity.saturating_mul(core::mem::size_of::<u32>()),
            })?;
        Ok(Self {
            hasher,
            index,
            store,
            allocator,
            bucket_count: shape.bucket_count,
            epoch,
        })
    }

    fn lookup(&self, key: &[u8]) -> Option<u32> {
        let hash = self.hasher.hash_one(key);
        self.index
            .find(hash, |&s| self.store.hash(s) == hash && self.store.key(s) == key)
            .copied()
    }

    fn insert_one(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(Handle, bool)> {
        let hash = self.hasher.hash_one(key);
        let epoch = self.epoch;
        match self.index.entry(
            hash,
            |&s| self.store.hash(s) == hash && self.store.key(s) == key,
            |&s| self.store.hash(s),
        ) {
            Entry::Occupied(o) => Ok((Handle::new(*o.get(), epoch), false)),
            Entry::Vacant(v) => {
                let slot = self
                    .allocator
                    .allocate()
                    .ok_or(HashmapError::CapacityExhausted {
                        requested: 1,
                        available: 0,
                    })?;
                self.store.write(slot, key, value, hash);
                v.insert(slot);
                Ok((Handle::new(slot, epoch), true))
            }
        }
    }

    fn erase_one(&mut self, key: &[u8]) -> bool {
        let hash = self.hasher.hash_one(key);
        let removed = match self
            .index
            .find_entry(hash, |&s| self.store.hash(s) == hash && self.store.key(s) == key)
        {
            Ok(o) => o.remove().0,
            Err(_) => return false,
        };
        self.store.clear(removed);
        self.allocator.release(removed);
        true
    }
}

impl<S> DeviceHashmap for HostHashmap<S>
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
        let available = self.allocator.available();
        if available < count {
            return Err(HashmapError::CapacityExhausted {
                requested: count,
                available,
            });
        }
        for (i, key) in keys.chunks_exact(kw).enumerate() {
            let value = values.map(|v| &v[i * vw..(i + 1) * vw]);
            let (handle, inserted) = self.insert_one(key, value)?;
            if let Some(h) = handles.as_deref_mut() {
                h[i] = handle;
            }
            if let Some(m) = masks.as_deref_mut() {
                m[i] = inserted;
            }
        }
        Ok(())
    }

    fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]) {
        let kw = self.store.key_width();
        for ((key, handle), mask) in keys.chunks_exact(kw).zip(handles).zip(masks) {
            match self.lookup(key) {
                Some(slot) => {
                    *handle = Handle::new(slot, self.epoch);
                    *mask = true;
                }
                None => {
                    *handle = Handle::INVALID;
                    *mask = false;
                }
            }
        }
    }

    fn erase(&mut self, keys: &[u8], mut masks: Option<&mut [bool]>) {
        let kw = self.store.key_width();
        for (i, key) in keys.chunks_exact(kw).enumerate() {
            let erased = self.erase_one(key);
            if let Some(m) = masks.as_deref_mut() {
                m[i] = erased;
            }
        }
    }

    fn handles(&self) -> Vec<Handle> {
        self.index
            .iter()
            .map(|&slot| Handle::new(slot, self.epoch))
            .collect()
    }

    fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        mut keys_out: Option<&mut [u8]>,
        mut values_out: Option<&mut [u8]>,
    ) -> Result<()> {
        self.store.check_handles(self.epoch, handles, masks)?;
        let (kw, vw) = (self.store.key_width(), self.store.value_width());
        for (i, h) in handles.iter().enumerate() {
            if !is_selected(masks, i) {
                continue;
            }
            if let Some(out) = keys_out.as_deref_mut() {
                out[i * kw..(i + 1) * kw].copy_from_slice(self.store.key(h.slot()));
            }
            if let Some(out) = values_out.as_deref_mut() {
                out[i * vw..(i + 1) * vw].copy_from_slice(self.store.value(h.slot()));
            }
        }
        Ok(())
    }

    fn assign(&mut self, handles: &[Handle], masks: Option<&[bool]>, values: &[u8]) -> Result<()> {
        self.store.check_handles(self.epoch, handles, masks)?;
        let vw = self.store.value_width();
        for (i, h) in handles.iter().enumerate() {
            if is_selected(masks, i) {
                self.store
                    .value_mut(h.slot())
                    .copy_from_slice(&values[i * vw..(i + 1) * vw]);
            }
        }
        Ok(())
    }

    fn rehash(&mut self, bucket_count: usize, capacity: usize) -> Result<()> {
        let (keys, values) = self.dump()?;
        let shape = TableShape {
            bucket_count,
            capacity,
            ..self.shape()
        };
        let mut fresh = Self::try_new(self.hasher.clone(), shape, next_epoch(self.epoch))?;
        fresh.insert(&keys, Some(&values), None, None)?;
        *self = fresh;
        Ok(())
    }

    fn size(&self) -> usize {
        self.index.len()
    }

    fn shape(&self) -> TableShape {
        TableShape {
            bucket_count: self.bucket_count,
            capacity: self.store.capacity(),
            key_width: self.store.key_width(),
            value_width: self.store.value_width(),
        }
    }

    /// Entries per bucket, counting each entry in bucket `hash % bucket_count`.
    fn bucket_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.bucket_count];
        for &slot in self.index.iter() {
            sizes[(self.store.hash(slot) % self.bucket_count as u64) as usize] += 1;
        }
        sizes
    }

    fn epoch(&self) -> u32 {
        self.epoch
    }
}
