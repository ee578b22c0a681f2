//! Device dispatch: backend selection and the contract both backends share.

use crate::config::HashmapConfig;
use crate::error::{HashmapError, Result};
use crate::handle::{Handle, FIRST_EPOCH};
use crate::host_hashmap::HostHashmap;
use crate::parallel_hashmap::ParallelHashmap;
use crate::slot_store::try_zeroed;
use core::fmt;
use core::hash::BuildHasher;
use rayon::ThreadPoolBuilder;
use std::sync::Arc;

/// Where batch operations execute.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Device {
    /// Sequential execution on the calling thread. Probing uses an
    /// open-addressing index, so the bucket count is virtual: it drives the
    /// growth policy and `bucket_sizes` (entries grouped by
    /// `hash % bucket_count`) but no bucket array is allocated.
    #[default]
    Host,
    /// Data-parallel execution on a rayon thread pool; one worker per batch
    /// element, coordinated only through atomics.
    Parallel,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Host => f.write_str("host"),
            Device::Parallel => f.write_str("parallel"),
        }
    }
}

/// Sizes that define a backend's storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct TableShape {
    pub(crate) bucket_count: usize,
    pub(crate) capacity: usize,
    pub(crate) key_width: usize,
    pub(crate) value_width: usize,
}

pub(crate) fn is_selected(masks: Option<&[bool]>, i: usize) -> bool {
    masks.map_or(true, |m| m[i])
}

/// Batch engine contract. Inputs arrive validated by `Hashmap`: buffers are
/// whole multiples of the widths, output slices match the batch length, and
/// enough free slots exist for every key of an insert.
pub(crate) trait DeviceHashmap: Send + Sync {
    fn insert(
        &mut self,
        keys: &[u8],
        values: Option<&[u8]>,
        handles: Option<&mut [Handle]>,
        masks: Option<&mut [bool]>,
    ) -> Result<()>;

    fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]);

    fn erase(&mut self, keys: &[u8], masks: Option<&mut [bool]>);

    fn handles(&self) -> Vec<Handle>;

    fn unpack(
        &self,
        handles: &[Handle],
        masks: Option<&[bool]>,
        keys_out: Option<&mut [u8]>,
        values_out: Option<&mut [u8]>,
    ) -> Result<()>;

    fn assign(&mut self, handles: &[Handle], masks: Option<&[bool]>, values: &[u8]) -> Result<()>;

    /// Rebuilds storage with the given sizes and bumps the epoch. Leaves
    /// the table untouched on failure.
    fn rehash(&mut self, bucket_count: usize, capacity: usize) -> Result<()>;

    fn size(&self) -> usize;

    fn shape(&self) -> TableShape;

    fn bucket_sizes(&self) -> Vec<usize>;

    fn epoch(&self) -> u32;

    /// Copies every live pair into contiguous key and value buffers.
    fn dump(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let shape = self.shape();
        let live = self.handles();
        let mut keys = try_zeroed(live.len() * shape.key_width)?;
        let mut values = try_zeroed(live.len() * shape.value_width)?;
        self.unpack(
            &live,
            None,
            Some(keys.as_mut_slice()),
            Some(values.as_mut_slice()),
        )?;
        Ok((keys, values))
    }
}

pub(crate) fn make_backend<S>(config: &HashmapConfig, hasher: S) -> Result<Box<dyn DeviceHashmap>>
where
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    let shape = TableShape {
        bucket_count: config.bucket_count(),
        capacity: config.initial_capacity,
        key_width: config.key_width,
        value_width: config.value_width,
    };
    match config.device {
        Device::Host => Ok(Box::new(HostHashmap::try_new(hasher, shape, FIRST_EPOCH)?)),
        Device::Parallel => {
            let pool = match config.num_threads {
                Some(n) => Some(Arc::new(
                    ThreadPoolBuilder::new()
                        .num_threads(n)
                        .thread_name(|i| format!("device-hashmap-{}", i))
                        .build()
                        .map_err(|e| HashmapError::ThreadPool(e.to_string()))?,
                )),
                None => None,
            };
            Ok(Box::new(ParallelHashmap::try_new(
                hasher,
                shape,
                pool,
                FIRST_EPOCH,
            )?))
        }
    }
}
