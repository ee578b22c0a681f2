//! Batch deduplication of fixed-width keys.
//!
//! The building block for one-point-per-voxel downsampling: quantized voxel
//! coordinates go in, a selection mask comes out.

use crate::device::Device;
use crate::error::Result;
use crate::hashmap::Hashmap;

/// Marks one occurrence of every distinct key in `keys`.
///
/// Returns one flag per input element; exactly one element of each group
/// of equal keys is `true`. On `Device::Host` that is the first
/// occurrence; on `Device::Parallel` which occurrence wins is unspecified.
pub fn unique(keys: &[u8], key_width: usize, device: Device) -> Result<Vec<bool>> {
    let count = keys.len().checked_div(key_width).unwrap_or(0);
    let mut set = Hashmap::new(count, key_width, 0, device)?;
    let mut masks = vec![false; count];
    set.activate(keys, None, Some(&mut masks))?;
    Ok(masks)
}

/// The distinct keys of `keys`, each once, in the order their selected
/// occurrence appears in the input.
pub fn unique_keys(keys: &[u8], key_width: usize, device: Device) -> Result<Vec<u8>> {
    let masks = unique(keys, key_width, device)?;
    let mut out = Vec::with_capacity(masks.iter().filter(|&&m| m).count() * key_width);
    for (key, &selected) in keys.chunks_exact(key_width).zip(&masks) {
        if selected {
            out.extend_from_slice(key);
        }
    }
    Ok(out)
}
