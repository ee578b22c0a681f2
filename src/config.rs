//! Construction parameters for `Hashmap`.

use crate::device::Device;
use crate::error::{HashmapError, Result};
use crate::handle::MAX_CAPACITY;

/// Slot count used when none is given.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Load factor above which an insert grows the bucket index first.
pub const DEFAULT_MAX_LOAD_FACTOR: f64 = 1.0;

/// Everything fixed at construction. Widths and device never change;
/// bucket count and capacity are only the starting point and grow through
/// rehash.
#[derive(Clone, Debug, PartialEq)]
pub struct HashmapConfig {
    /// Bucket index size. `None` means twice the initial capacity.
    pub initial_bucket_count: Option<usize>,
    /// Slot store size.
    pub initial_capacity: usize,
    /// Bytes per key; must be non-zero.
    pub key_width: usize,
    /// Bytes per value; zero turns the table into a set.
    pub value_width: usize,
    pub device: Device,
    pub max_load_factor: f64,
    /// Worker count for `Device::Parallel`. `None` uses rayon's global pool;
    /// `Some(0)` builds a dedicated pool with rayon's default size.
    pub num_threads: Option<usize>,
}

impl HashmapConfig {
    pub fn new(key_width: usize, value_width: usize) -> Self {
        Self {
            initial_bucket_count: None,
            initial_capacity: DEFAULT_CAPACITY,
            key_width,
            value_width,
            device: Device::default(),
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            num_threads: None,
        }
    }

    pub fn with_buckets(mut self, bucket_count: usize) -> Self {
        self.initial_bucket_count = Some(bucket_count);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_max_load_factor(mut self, max_load_factor: f64) -> Self {
        self.max_load_factor = max_load_factor;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// The bucket count the table starts with.
    pub fn bucket_count(&self) -> usize {
        self.initial_bucket_count
            .unwrap_or_else(|| self.initial_capacity.saturating_mul(2).max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_width == 0 {
            return Err(HashmapError::ZeroKeyWidth);
        }
        if self.bucket_count() == 0 {
            return Err(HashmapError::InvalidBucketCount);
        }
        if !(self.max_load_factor.is_finite() && self.max_load_factor > 0.0) {
            return Err(HashmapError::InvalidLoadFactor(self.max_load_factor));
        }
        if self.initial_capacity > MAX_CAPACITY {
            return Err(HashmapError::CapacityOverflow {
                requested: self.initial_capacity,
            });
        }
        Ok(())
    }
}
