//! Error taxonomy for table construction and batch operations.
//!
//! Missing keys and duplicate inserts are not errors; they are reported
//! through per-element masks. Everything here aborts the call before any
//! state is touched.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HashmapError {
    /// The key buffer is not a whole number of keys.
    #[error("key buffer of {len} bytes is not a whole number of {width}-byte keys")]
    KeyWidthMismatch { width: usize, len: usize },

    /// The value buffer does not hold exactly one value per key.
    #[error("value buffer holds {actual} bytes, expected {expected} ({count} values of {width} bytes)")]
    ValueWidthMismatch {
        width: usize,
        count: usize,
        expected: usize,
        actual: usize,
    },

    /// A caller-provided output or side buffer has the wrong length.
    #[error("{what} buffer has {actual} elements, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("key width must be non-zero")]
    ZeroKeyWidth,

    #[error("bucket count must be non-zero")]
    InvalidBucketCount,

    #[error("max load factor must be finite and positive, got {0}")]
    InvalidLoadFactor(f64),

    /// The requested slot count does not fit the 32-bit slot index space.
    #[error("capacity of {requested} slots exceeds the slot index space")]
    CapacityOverflow { requested: usize },

    /// The free-slot allocator could not cover a batch. The front end
    /// reserves capacity before every batch, so this indicates a bug.
    #[error("{requested} slots requested but only {available} are free")]
    CapacityExhausted { requested: usize, available: usize },

    /// A handle issued before the last rehash.
    #[error("handle from epoch {handle_epoch} used after rehash (table epoch {table_epoch})")]
    StaleHandle { handle_epoch: u32, table_epoch: u32 },

    /// A handle of the current epoch whose slot holds no entry.
    #[error("handle refers to slot {slot}, which holds no entry")]
    InvalidHandle { slot: u32 },

    #[error("failed to allocate {bytes} bytes of table storage")]
    AllocationFailed { bytes: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = core::result::Result<T, HashmapError>;
