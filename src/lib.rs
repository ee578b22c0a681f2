//! device-hashmap: a batch hash table for fixed-width binary keys and
//! values, with a sequential host backend and a data-parallel backend.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: associate millions of fixed-width keys (voxel coordinates,
//!   packed ids) with fixed-width values per call, identically on one
//!   thread or on all of them.
//! - Layers:
//!   - SlotStore: flat key/value byte arrays plus per-slot stored hash
//!     and occupancy state (`Empty`, `Occupied`, `Tombstone`).
//!   - FreeSlotAllocator: atomic stack of free slot indices; concurrent
//!     allocations receive disjoint slots.
//!   - BucketIndex: per-bucket chains of slot indices linked by
//!     compare-and-swap on the bucket head. Only the parallel engine
//!     uses it.
//!   - HostHashmap / ParallelHashmap: the two batch engines behind the
//!     crate-private `DeviceHashmap` trait. The host engine probes a
//!     `hashbrown::HashTable`; its bucket count is virtual and only
//!     shapes growth and `bucket_sizes`.
//!   - Hashmap: public front end; validates every call, grows the table
//!     before a batch that could overflow it, dispatches once per batch.
//!
//! Constraints
//! - Keys and values are opaque bytes of widths fixed at construction;
//!   equality is bitwise.
//! - Insert never overwrites; duplicates (also within one batch) resolve
//!   to a single entry and report `false` in the mask.
//! - Mutating batches take `&mut self`, read-only ones `&self`, so calls
//!   never overlap; only elements of one batch run concurrently.
//!
//! Handles
//! - A `Handle` is `{ slot, epoch }`. Every rehash bumps the epoch and
//!   moves entries, so older handles are rejected by `unpack`/`assign`
//!   with `HashmapError::StaleHandle`. Handles to free slots are rejected
//!   with `HashmapError::InvalidHandle`.
//!
//! Hasher and rehashing invariants
//! - Each slot stores the `u64` hash of its key; both backends compare the
//!   stored hash before key bytes. Rehash reinserts into fresh storage and
//!   swaps it in only once it is complete.
//!
//! Notes and non-goals
//! - No variable-width keys, persistence or distribution.
//! - No logger is installed; diagnostics go through the `log` facade.

mod allocator;
mod bucket_index;
pub mod config;
mod device;
pub mod error;
mod handle;
pub mod hashmap;
mod hashmap_proptest;
mod host_hashmap;
mod parallel_hashmap;
mod slot_store;
mod unique;

// Public surface
pub use config::{HashmapConfig, DEFAULT_CAPACITY, DEFAULT_MAX_LOAD_FACTOR};
pub use device::Device;
pub use error::{HashmapError, Result};
pub use handle::{Handle, MAX_CAPACITY};
pub use hashmap::Hashmap;
pub use unique::{unique, unique_keys};
