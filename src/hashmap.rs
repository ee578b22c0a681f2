//! Hashmap: the public front end.
//!
//! Every call is validated here before it reaches a backend: buffer sizes
//! must be whole multiples of the configured widths and every side buffer
//! must match the batch length. A rejected call leaves the table untouched.
//! Growing inserts rehash before the batch runs, never in the middle of it.

use crate::config::HashmapConfig;
use crate::device::{make_backend, Device, DeviceHashmap};
use crate::error::{HashmapError, Result};
use crate::handle::{Handle, MAX_CAPACITY};
use core::fmt;
use core::hash::BuildHasher;
use std::collections::hash_map::RandomState;

/// Batch hash table over fixed-width binary keys and values.
///
/// Keys and values are passed as contiguous byte buffers holding `count`
/// elements of `key_width` and `value_width` bytes. Entries are referenced
/// through [`Handle`]s, which stay valid until the next rehash.
///
/// ```
/// use device_hashmap::{Device, Handle, Hashmap};
///
/// let mut map = Hashmap::new(16, 4, 4, Device::Host).unwrap();
/// let keys: Vec<u8> = [1i32, 2, 3].iter().flat_map(|k| k.to_le_bytes()).collect();
/// let values: Vec<u8> = [10i32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
/// let mut masks = [false; 3];
/// map.insert(&keys, &values, None, Some(&mut masks)).unwrap();
/// assert_eq!(masks, [true; 3]);
///
/// let (mut handles, mut found) = ([Handle::INVALID; 1], [false; 1]);
/// map.find(&2i32.to_le_bytes(), &mut handles, &mut found).unwrap();
/// let mut value = [0u8; 4];
/// map.unpack(&handles, Some(&found), None, Some(&mut value)).unwrap();
/// assert_eq!(i32::from_le_bytes(value), 20);
/// ```
pub struct Hashmap {
    backend: Box<dyn DeviceHashmap>,
    config: HashmapConfig,
    /// Slots per bucket at construction; growth keeps this ratio.
    capacity_per_bucket: f64,
}

impl Hashmap {
    /// Table with `capacity` slots and twice as many buckets.
    pub fn new(capacity: usize, key_width: usize, value_width: usize, device: Device) -> Result<Self> {
        Self::with_config(
            HashmapConfig::new(key_width, value_width)
                .with_capacity(capacity)
                .on_device(device),
        )
    }

    pub fn with_buckets(
        bucket_count: usize,
        capacity: usize,
        key_width: usize,
        value_width: usize,
        device: Device,
    ) -> Result<Self> {
        Self::with_config(
            HashmapConfig::new(key_width, value_width)
                .with_buckets(bucket_count)
                .with_capacity(capacity)
                .on_device(device),
        )
    }

    pub fn with_config(config: HashmapConfig) -> Result<Self> {
        Self::with_config_and_hasher(config, RandomState::new())
    }

    /// Builds a table hashing key bytes with `hasher`.
    pub fn with_config_and_hasher<S>(config: HashmapConfig, hasher: S) -> Result<Self>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        config.validate()?;
        let backend = make_backend(&config, hasher)?;
        let capacity_per_bucket = config.initial_capacity as f64 / config.bucket_count() as f64;
        log::debug!(
            "hashmap created: device={} buckets={} capacity={} key_width={} value_width={}",
            config.device,
            config.bucket_count(),
            config.initial_capacity,
            config.key_width,
            config.value_width
        );
        Ok(Self {
            backend,
            config,
            capacity_per_bucket,
        })
    }

    /// Inserts every absent key with its value.
    ///
    /// `masks[i]` is `true` when `keys[i]` was inserted and `false` when it
    /// was already present (including earlier in the same batch), in which
    /// case the stored value is left as is. `handles[i]` refers to the entry
    /// holding `keys[i]` either way. May rehash first, see [`Hashmap::rehash`].
    pub fn insert(
        &mut self,
        keys: &[u8],
        values: &[u8],
        handles: Option<&mut [Handle]>,
        masks: Option<&mut [bool]>,
    ) -> Result<()> {
        self.insert_batch(keys, Some(values), handles, masks)
    }

    /// Like [`Hashmap::insert`] without copying values. The value bytes of
    /// newly inserted entries are unspecified until written by
    /// [`Hashmap::assign`].
    pub fn activate(
        &mut self,
        keys: &[u8],
        handles: Option<&mut [Handle]>,
        masks: Option<&mut [bool]>,
    ) -> Result<()> {
        self.insert_batch(keys, None, handles, masks)
    }

    fn insert_batch(
        &mut self,
        keys: &[u8],
        values: Option<&[u8]>,
        handles: Option<&mut [Handle]>,
        masks: Option<&mut [bool]>,
    ) -> Result<()> {
        let count = self.key_count(keys)?;
        if let Some(values) = values {
            self.check_values(values, count)?;
        }
        if let Some(h) = handles.as_deref() {
            check_len("handle", count, h.len())?;
        }
        if let Some(m) = masks.as_deref() {
            check_len("mask", count, m.len())?;
        }
        if count == 0 {
            return Ok(());
        }
        self.reserve(count)?;
        log::trace!(
            "{} {} keys on {}",
            if values.is_some() { "insert" } else { "activate" },
            count,
            self.config.device
        );
        self.backend.insert(keys, values, handles, masks)
    }

    /// Looks up every key. Misses get `masks[i] == false` and
    /// `Handle::INVALID`.
    pub fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]) -> Result<()> {
        let count = self.key_count(keys)?;
        check_len("handle", count, handles.len())?;
        check_len("mask", count, masks.len())?;
        if count == 0 {
            return Ok(());
        }
        log::trace!("find {} keys on {}", count, self.config.device);
        self.backend.find(keys, handles, masks);
        Ok(())
    }

    /// Removes every present key. `masks[i]` is `true` only for the element
    /// that actually removed its key; absent keys are not an error.
    pub fn erase(&mut self, keys: &[u8], masks: Option<&mut [bool]>) -> Result<()> {
        let count = self.key_count(keys)?;
        if let Some(m) = masks.as_deref() {
            check_len("mask", count, m.len())?;
        }
        if count == 0 {
            return Ok(());
        }
        log::trace!("erase {} keys on {}", count, self.config.device);
        self.backend.erase(keys, masks);
        Ok(())
    }

    /// Handles to every entry, in no particular order.
    pub fn handles(&self) -> Vec<Handle> {
        self.backend.handles()
    }

    /// Writes a handle for every entry into the front of `out` and returns
    /// how many were written (always `size()`).
    pub fn get_handles(&self, out: &mut [Handle]) -> Result<usize> {
        let size = self.size();
        if out.len() < size {
            return Err(HashmapError::LengthMismatch {
                what: "handle",
                expected: size,
                actual: out.len(),
            });
        }
        let handles = self.backend.handles();
        out[..handles.len()].copy_from_slice(&handles);
        Ok(handles.len())
    }

    /// Copies out the keys and/or values that `handles` refer to. Elements
    /// whose mask is `false` are skipped and their output regions keep
    /// their previous contents.
    ///
    /// Fails with `StaleHandle` for handles issued before the last rehash
    /// and `InvalidHandle` for handles to free slots; nothing is written
    /// then.
    pub fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        keys_out: Option<&mut [u8]>,
        values_out: Option<&mut [u8]>,
    ) -> Result<()> {
        let count = handles.len();
        if let Some(m) = masks {
            check_len("mask", count, m.len())?;
        }
        if let Some(k) = keys_out.as_deref() {
            check_len("key output", byte_len(count, self.key_width())?, k.len())?;
        }
        if let Some(v) = values_out.as_deref() {
            check_len("value output", byte_len(count, self.value_width())?, v.len())?;
        }
        if count == 0 {
            return Ok(());
        }
        self.backend.unpack(handles, masks, keys_out, values_out)
    }

    /// Overwrites the values that `handles` refer to; keys are untouched.
    /// When several elements name the same entry the last one wins.
    pub fn assign(&mut self, handles: &[Handle], masks: Option<&[bool]>, values: &[u8]) -> Result<()> {
        let count = handles.len();
        if let Some(m) = masks {
            check_len("mask", count, m.len())?;
        }
        self.check_values(values, count)?;
        if count == 0 {
            return Ok(());
        }
        log::trace!("assign {} values on {}", count, self.config.device);
        self.backend.assign(handles, masks, values)
    }

    /// Rebuilds the table with `bucket_count` buckets, keeping every entry.
    ///
    /// Capacity follows the construction-time slots-per-bucket ratio but
    /// never shrinks and always covers the current size. Every handle
    /// issued so far becomes stale. On failure the table is unchanged.
    pub fn rehash(&mut self, bucket_count: usize) -> Result<()> {
        if bucket_count == 0 {
            return Err(HashmapError::InvalidBucketCount);
        }
        let size = self.size();
        self.grow(bucket_count, size)
    }

    pub fn size(&self) -> usize {
        self.backend.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.backend.shape().capacity
    }

    pub fn bucket_count(&self) -> usize {
        self.backend.shape().bucket_count
    }

    /// Entry count of every bucket; sums to `size()`.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.backend.bucket_sizes()
    }

    pub fn load_factor(&self) -> f64 {
        self.size() as f64 / self.bucket_count() as f64
    }

    pub fn key_width(&self) -> usize {
        self.config.key_width
    }

    pub fn value_width(&self) -> usize {
        self.config.value_width
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    /// Incremented by every rehash; handles carry the epoch they were
    /// issued in.
    pub fn epoch(&self) -> u32 {
        self.backend.epoch()
    }

    /// The configuration the table was built with.
    pub fn config(&self) -> &HashmapConfig {
        &self.config
    }

    fn key_count(&self, keys: &[u8]) -> Result<usize> {
        let width = self.key_width();
        if keys.len() % width != 0 {
            return Err(HashmapError::KeyWidthMismatch {
                width,
                len: keys.len(),
            });
        }
        Ok(keys.len() / width)
    }

    fn check_values(&self, values: &[u8], count: usize) -> Result<()> {
        let width = self.value_width();
        let expected = byte_len(count, width)?;
        if values.len() != expected {
            return Err(HashmapError::ValueWidthMismatch {
                width,
                count,
                expected,
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Makes room for `incoming` new entries: enough free slots and a load
    /// factor within bounds even if every key is new.
    fn reserve(&mut self, incoming: usize) -> Result<()> {
        let shape = self.backend.shape();
        let required = self.size().saturating_add(incoming);
        if required > MAX_CAPACITY {
            return Err(HashmapError::CapacityOverflow {
                requested: required,
            });
        }
        let max_load_factor = self.config.max_load_factor;
        if required <= shape.capacity && required as f64 <= shape.bucket_count as f64 * max_load_factor {
            return Ok(());
        }
        let bucket_count = ((required as f64 / max_load_factor).ceil() as usize)
            .max(shape.bucket_count.saturating_mul(2))
            .max(1);
        let min_capacity = if required > shape.capacity {
            required.max(shape.capacity.saturating_mul(2).min(MAX_CAPACITY))
        } else {
            required
        };
        self.grow(bucket_count, min_capacity)
    }

    fn grow(&mut self, bucket_count: usize, min_capacity: usize) -> Result<()> {
        let shape = self.backend.shape();
        let scaled = ((bucket_count as f64 * self.capacity_per_bucket).ceil() as usize).min(MAX_CAPACITY);
        let capacity = shape.capacity.max(min_capacity).max(scaled);
        log::debug!(
            "rehash: buckets {} -> {}, capacity {} -> {}, size {}",
            shape.bucket_count,
            bucket_count,
            shape.capacity,
            capacity,
            self.size()
        );
        self.backend.rehash(bucket_count, capacity)
    }
}

/// Buffer size of `count` elements of `width` bytes.
fn byte_len(count: usize, width: usize) -> Result<usize> {
    count
        .checked_mul(width)
        .ok_or(HashmapError::CapacityOverflow { requested: count })
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(HashmapError::LengthMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

impl fmt::Debug for Hashmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hashmap")
            .field("device", &self.device())
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("bucket_count", &self.bucket_count())
            .field("key_width", &self.key_width())
            .field("value_width", &self.value_width())
            .field("epoch", &self.epoch())
            .finish()
    }
}
