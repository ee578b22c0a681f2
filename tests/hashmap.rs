// Hashmap integration suite.
//
// Every scenario runs on both devices. The core invariants exercised:
// - Uniqueness: a key occupies at most one entry, also when a batch
//   repeats it.
// - Insert is insert-if-absent: present keys report `false` and keep
//   their value; the returned handle refers to the existing entry.
// - Erase reports `true` exactly once per removed key; absent keys are
//   not an error.
// - Handles: valid until the next rehash, then rejected as stale.
// - Validation: malformed calls fail before any state changes.
use device_hashmap::{Device, Handle, Hashmap, HashmapConfig, HashmapError};
use std::collections::HashSet;

const DEVICES: [Device; 2] = [Device::Host, Device::Parallel];

fn i32s(xs: &[i32]) -> Vec<u8> {
    xs.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn to_i32s(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn int_map(device: Device) -> Hashmap {
    Hashmap::with_buckets(10, 10, 4, 4, device).unwrap()
}

/// Sorted (key, value) pairs of the whole table.
fn contents(m: &Hashmap) -> Vec<(i32, i32)> {
    let handles = m.handles();
    let mut keys = vec![0u8; handles.len() * 4];
    let mut values = vec![0u8; handles.len() * 4];
    m.unpack(&handles, None, Some(&mut keys), Some(&mut values))
        .unwrap();
    let mut pairs: Vec<(i32, i32)> = to_i32s(&keys).into_iter().zip(to_i32s(&values)).collect();
    pairs.sort_unstable();
    pairs
}

// Test: construction.
// Verifies: the requested shape is reported and the table starts empty.
#[test]
fn init() {
    for device in DEVICES {
        let m = Hashmap::with_buckets(10, 20, 4, 8, device).unwrap();
        assert_eq!(m.size(), 0);
        assert!(m.is_empty());
        assert_eq!(m.bucket_count(), 10);
        assert_eq!(m.capacity(), 20);
        assert_eq!(m.key_width(), 4);
        assert_eq!(m.value_width(), 8);
        assert_eq!(m.device(), device);
        assert_eq!(m.bucket_sizes(), vec![0; 10]);
        assert_eq!(m.load_factor(), 0.0);
        assert!(m.handles().is_empty());

        let d = Hashmap::new(16, 4, 4, device).unwrap();
        assert_eq!(d.bucket_count(), 32);
        assert_eq!(d.capacity(), 16);
    }
}

// Test: find after insert.
// Verifies: masks match presence, found handles unpack to the right
// pairs, misses get Handle::INVALID.
#[test]
fn find() {
    for device in DEVICES {
        let mut m = int_map(device);
        m.insert(&i32s(&[100, 300, 500, 700, 900]), &i32s(&[1, 3, 5, 7, 9]), None, None)
            .unwrap();

        let query = i32s(&[100, 500, 800, 900, 1000]);
        let mut handles = vec![Handle::INVALID; 5];
        let mut masks = vec![false; 5];
        m.find(&query, &mut handles, &mut masks).unwrap();
        assert_eq!(masks, vec![true, true, false, true, false]);
        assert_eq!(handles[2], Handle::INVALID);
        assert_eq!(handles[4], Handle::INVALID);

        let found: Vec<Handle> = handles
            .iter()
            .zip(&masks)
            .filter(|(_, hit)| **hit)
            .map(|(h, _)| *h)
            .collect();
        let mut keys = vec![0u8; 12];
        let mut values = vec![0u8; 12];
        m.unpack(&found, None, Some(&mut keys), Some(&mut values))
            .unwrap();
        assert_eq!(to_i32s(&keys), vec![100, 500, 900]);
        assert_eq!(to_i32s(&values), vec![1, 5, 9]);
    }
}

// Test: insert-if-absent.
// Verifies: second batch inserts only the new keys, values of present
// keys are untouched and their handles point at the existing entries.
#[test]
fn insert() {
    for device in DEVICES {
        let mut m = int_map(device);
        let mut first = vec![Handle::INVALID; 5];
        let mut masks = vec![false; 5];
        m.insert(
            &i32s(&[100, 300, 500, 700, 900]),
            &i32s(&[1, 3, 5, 7, 9]),
            Some(&mut first),
            Some(&mut masks),
        )
        .unwrap();
        assert_eq!(masks, vec![true; 5]);
        assert_eq!(m.size(), 5);

        let mut second = vec![Handle::INVALID; 5];
        m.insert(
            &i32s(&[100, 500, 800, 900, 1000]),
            &i32s(&[1, 5, 8, 9, 10]),
            Some(&mut second),
            Some(&mut masks),
        )
        .unwrap();
        assert_eq!(masks, vec![false, false, true, false, true]);
        assert_eq!(m.size(), 7);
        // No rehash happened, so duplicates resolve to the first handles.
        assert_eq!(second[0], first[0]);
        assert_eq!(second[1], first[2]);
        assert_eq!(second[3], first[4]);

        assert_eq!(
            contents(&m),
            vec![(100, 1), (300, 3), (500, 5), (700, 7), (800, 8), (900, 9), (1000, 10)]
        );
    }
}

// Test: erase.
// Verifies: only present keys report true, remaining pairs intact.
#[test]
fn erase() {
    for device in DEVICES {
        let mut m = int_map(device);
        m.insert(&i32s(&[100, 300, 500, 700, 900]), &i32s(&[1, 3, 5, 7, 9]), None, None)
            .unwrap();
        let mut masks = vec![false; 5];
        m.erase(&i32s(&[100, 500, 800, 900, 1000]), Some(&mut masks))
            .unwrap();
        assert_eq!(masks, vec![true, true, false, true, false]);
        assert_eq!(m.size(), 2);
        assert_eq!(contents(&m), vec![(300, 3), (700, 7)]);
        assert_eq!(m.bucket_sizes().iter().sum::<usize>(), 2);

        // Erasing again is a no-op.
        m.erase(&i32s(&[100, 500]), Some(&mut masks[..2])).unwrap();
        assert_eq!(&masks[..2], &[false, false]);
        assert_eq!(m.size(), 2);
    }
}

// Test: duplicate keys inside one batch.
// Verifies: exactly one element per key reports true, all elements of
// a key share one handle, and no slot is leaked.
#[test]
fn duplicates_within_one_batch() {
    for device in DEVICES {
        let mut m = Hashmap::new(2048, 4, 4, device).unwrap();
        let keys: Vec<i32> = (0..2000).map(|i| i % 37).collect();
        let values: Vec<i32> = keys.iter().map(|k| k * 2).collect();
        let mut handles = vec![Handle::INVALID; keys.len()];
        let mut masks = vec![false; keys.len()];
        m.insert(&i32s(&keys), &i32s(&values), Some(&mut handles), Some(&mut masks))
            .unwrap();
        assert_eq!(m.size(), 37);
        assert_eq!(masks.iter().filter(|&&b| b).count(), 37);
        for k in 0..37 {
            let group: HashSet<Handle> = keys
                .iter()
                .zip(&handles)
                .filter(|(key, _)| **key == k)
                .map(|(_, h)| *h)
                .collect();
            assert_eq!(group.len(), 1);
        }
        assert_eq!(contents(&m), (0..37).map(|k| (k, k * 2)).collect::<Vec<_>>());

        let mut erased = vec![false; keys.len()];
        m.erase(&i32s(&keys), Some(&mut erased)).unwrap();
        assert_eq!(erased.iter().filter(|&&b| b).count(), 37);
        assert!(m.is_empty());

        // Every slot came back: a full batch fits without growing.
        let epoch = m.epoch();
        let fill: Vec<i32> = (0..2048).collect();
        m.insert(&i32s(&fill), &i32s(&fill), None, None).unwrap();
        assert_eq!(m.size(), 2048);
        assert!(m.capacity() >= 2048);
        assert_eq!(m.epoch(), epoch);
    }
}

// Test: activate then assign.
// Verifies: activate reports like insert, assign fills the values, and
// the last of several writes to one entry wins.
#[test]
fn activate_and_assign() {
    for device in DEVICES {
        let mut m = int_map(device);
        let keys = i32s(&[4, 8, 4, 15]);
        let mut handles = vec![Handle::INVALID; 4];
        let mut masks = vec![false; 4];
        m.activate(&keys, Some(&mut handles), Some(&mut masks)).unwrap();
        assert_eq!(masks.iter().filter(|&&b| b).count(), 3);
        assert_eq!(handles[0], handles[2]);

        m.assign(&handles, None, &i32s(&[40, 80, 41, 150])).unwrap();
        assert_eq!(contents(&m), vec![(4, 41), (8, 80), (15, 150)]);

        // Masked-out elements are ignored.
        m.assign(&handles, Some(&[false, true, false, false]), &i32s(&[0, 81, 0, 0]))
            .unwrap();
        assert_eq!(contents(&m), vec![(4, 41), (8, 81), (15, 150)]);
    }
}

// Test: unpack leaves masked-out output untouched.
#[test]
fn unpack_respects_masks() {
    for device in DEVICES {
        let mut m = int_map(device);
        let mut handles = vec![Handle::INVALID; 2];
        m.insert(&i32s(&[1, 2]), &i32s(&[10, 20]), Some(&mut handles), None)
            .unwrap();
        let mut values = i32s(&[-1, -1]);
        m.unpack(&handles, Some(&[false, true]), None, Some(&mut values))
            .unwrap();
        assert_eq!(to_i32s(&values), vec![-1, 20]);
    }
}

// Test: handle lifetime across rehash.
// Assumes: rehash keeps every pair.
// Verifies: old handles are rejected as stale, fresh ones work, and the
// epoch advances.
#[test]
fn rehash_stales_handles() {
    for device in DEVICES {
        let mut m = int_map(device);
        let mut handles = vec![Handle::INVALID; 3];
        m.insert(&i32s(&[1, 2, 3]), &i32s(&[10, 20, 30]), Some(&mut handles), None)
            .unwrap();
        let before = contents(&m);
        let epoch = m.epoch();

        m.rehash(3).unwrap();
        assert_eq!(m.bucket_count(), 3);
        assert_eq!(m.epoch(), epoch + 1);
        assert_eq!(contents(&m), before);

        let mut out = vec![0u8; 12];
        assert_eq!(
            m.unpack(&handles, None, None, Some(&mut out)),
            Err(HashmapError::StaleHandle {
                handle_epoch: epoch,
                table_epoch: epoch + 1
            })
        );
        assert_eq!(out, vec![0u8; 12], "failed unpack must not write");
        assert!(matches!(
            m.assign(&handles, None, &i32s(&[0, 0, 0])),
            Err(HashmapError::StaleHandle { .. })
        ));
        assert_eq!(contents(&m), before);

        assert_eq!(m.rehash(0), Err(HashmapError::InvalidBucketCount));
        assert_eq!(m.epoch(), epoch + 1);
    }
}

// Test: handles to erased entries.
// Verifies: unpack and assign reject a current-epoch handle whose slot
// is free.
#[test]
fn erased_handle_is_rejected() {
    for device in DEVICES {
        let mut m = int_map(device);
        let mut handles = vec![Handle::INVALID; 2];
        m.insert(&i32s(&[1, 2]), &i32s(&[10, 20]), Some(&mut handles), None)
            .unwrap();
        m.erase(&i32s(&[1]), None).unwrap();
        let mut out = vec![0u8; 8];
        assert_eq!(
            m.unpack(&handles, None, None, Some(&mut out)),
            Err(HashmapError::InvalidHandle {
                slot: handles[0].slot()
            })
        );
        assert!(m.unpack(&handles[1..], None, None, Some(&mut out[4..])).is_ok());
        assert_eq!(to_i32s(&out[4..]), vec![20]);
        assert!(matches!(
            m.unpack(&[Handle::INVALID], None, None, None),
            Err(HashmapError::StaleHandle { .. })
        ));
    }
}

// Test: growth on insert.
// Verifies: a batch beyond the capacity rehashes first and keeps every
// pair; capacity never shrinks; load factor stays within bounds.
#[test]
fn insert_grows_table() {
    for device in DEVICES {
        let mut m = Hashmap::with_buckets(2, 4, 4, 4, device).unwrap();
        let mut total = Vec::new();
        for round in 0..10 {
            let keys: Vec<i32> = (round * 50..(round + 1) * 50).collect();
            m.insert(&i32s(&keys), &i32s(&keys), None, None).unwrap();
            total.extend(keys);
            assert!(m.load_factor() <= 1.0);
            assert!(m.size() <= m.capacity());
        }
        assert_eq!(m.size(), 500);
        assert!(m.epoch() > 1);
        assert_eq!(contents(&m), total.iter().map(|&k| (k, k)).collect::<Vec<_>>());
        assert_eq!(m.bucket_sizes().len(), m.bucket_count());
        assert_eq!(m.bucket_sizes().iter().sum::<usize>(), 500);
    }
}

// Test: validation.
// Verifies: each malformed call fails with its error and changes nothing.
#[test]
fn malformed_calls_change_nothing() {
    for device in DEVICES {
        let mut m = int_map(device);
        m.insert(&i32s(&[1]), &i32s(&[10]), None, None).unwrap();
        let epoch = m.epoch();

        assert_eq!(
            m.insert(&[1, 2, 3], &i32s(&[0]), None, None),
            Err(HashmapError::KeyWidthMismatch { width: 4, len: 3 })
        );
        assert_eq!(
            m.insert(&i32s(&[2, 3]), &i32s(&[0]), None, None),
            Err(HashmapError::ValueWidthMismatch {
                width: 4,
                count: 2,
                expected: 8,
                actual: 4
            })
        );
        let mut short = [false; 1];
        assert_eq!(
            m.insert(&i32s(&[2, 3]), &i32s(&[0, 0]), None, Some(&mut short)),
            Err(HashmapError::LengthMismatch {
                what: "mask",
                expected: 2,
                actual: 1
            })
        );
        let mut handles = [Handle::INVALID; 3];
        let mut masks = [false; 2];
        assert!(matches!(
            m.find(&i32s(&[1, 2]), &mut handles, &mut masks),
            Err(HashmapError::LengthMismatch { what: "handle", .. })
        ));
        assert!(matches!(
            m.erase(&i32s(&[1]), Some(&mut masks)),
            Err(HashmapError::LengthMismatch { .. })
        ));
        let live = m.handles();
        let mut keys_out = [0u8; 3];
        assert!(matches!(
            m.unpack(&live, None, Some(&mut keys_out), None),
            Err(HashmapError::LengthMismatch { what: "key output", .. })
        ));
        assert!(matches!(
            m.assign(&live, None, &[0u8; 5]),
            Err(HashmapError::ValueWidthMismatch { .. })
        ));
        let mut out = [Handle::INVALID; 0];
        assert!(matches!(
            m.get_handles(&mut out),
            Err(HashmapError::LengthMismatch { .. })
        ));

        assert_eq!(m.epoch(), epoch);
        assert_eq!(contents(&m), vec![(1, 10)]);
    }
}

// Test: construction errors.
#[test]
fn invalid_configuration() {
    assert_eq!(
        Hashmap::new(8, 0, 4, Device::Host).unwrap_err(),
        HashmapError::ZeroKeyWidth
    );
    assert_eq!(
        Hashmap::with_buckets(0, 8, 4, 4, Device::Parallel).unwrap_err(),
        HashmapError::InvalidBucketCount
    );
    assert!(matches!(
        Hashmap::with_config(HashmapConfig::new(4, 4).with_max_load_factor(-1.0)),
        Err(HashmapError::InvalidLoadFactor(_))
    ));
    assert!(matches!(
        Hashmap::with_config(HashmapConfig::new(4, 4).with_capacity(usize::MAX)),
        Err(HashmapError::CapacityOverflow { .. })
    ));
}

// Test: value-less tables behave as sets.
#[test]
fn zero_value_width() {
    for device in DEVICES {
        let mut m = Hashmap::new(4, 2, 0, device).unwrap();
        let mut masks = vec![false; 3];
        m.activate(&[1, 0, 2, 0, 1, 0], None, Some(&mut masks)).unwrap();
        assert_eq!(masks.iter().filter(|&&b| b).count(), 2);
        let handles = m.handles();
        let mut keys = vec![0u8; 4];
        let mut values = Vec::new();
        m.unpack(&handles, None, Some(&mut keys), Some(&mut values))
            .unwrap();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 0, 1, 2]);
        m.assign(&handles, None, &[]).unwrap();
    }
}

// Test: a dedicated worker pool.
// Verifies: a parallel table with an explicit thread count works end to end.
#[test]
fn dedicated_thread_pool() {
    let config = HashmapConfig::new(4, 4)
        .with_capacity(64)
        .with_num_threads(3)
        .on_device(Device::Parallel);
    let mut m = Hashmap::with_config(config).unwrap();
    let keys: Vec<i32> = (0..1000).collect();
    m.insert(&i32s(&keys), &i32s(&keys), None, None).unwrap();
    assert_eq!(m.size(), 1000);
    assert_eq!(m.config().num_threads, Some(3));
    let mut handles = vec![Handle::INVALID; 1000];
    let mut masks = vec![false; 1000];
    m.find(&i32s(&keys), &mut handles, &mut masks).unwrap();
    assert!(masks.iter().all(|&b| b));
}

// Test: empty batches.
// Verifies: zero-length calls succeed without touching the table.
#[test]
fn empty_batches_are_no_ops() {
    for device in DEVICES {
        let mut m = Hashmap::with_buckets(1, 0, 4, 4, device).unwrap();
        m.insert(&[], &[], Some(&mut []), Some(&mut [])).unwrap();
        m.activate(&[], None, None).unwrap();
        m.find(&[], &mut [], &mut []).unwrap();
        m.erase(&[], None).unwrap();
        m.unpack(&[], None, Some(&mut []), Some(&mut [])).unwrap();
        m.assign(&[], None, &[]).unwrap();
        assert_eq!(m.epoch(), 1);
        assert_eq!(m.capacity(), 0);
        assert_eq!(m.get_handles(&mut []).unwrap(), 0);
    }
}

// Test: storage allocation failure while growing.
// Assumes: a 4 EiB value region cannot be mapped on any target.
// Verifies: the growing activate fails with AllocationFailed and the
// table keeps its shape and epoch and stays usable.
#[test]
fn failed_growth_leaves_table_untouched() {
    for device in DEVICES {
        let mut m = Hashmap::with_buckets(1, 0, 4, 1 << 62, device).unwrap();
        let mut masks = vec![false; 1];
        assert!(matches!(
            m.activate(&i32s(&[7]), None, Some(&mut masks)),
            Err(HashmapError::AllocationFailed { .. })
        ));
        assert_eq!(masks, vec![false]);
        assert_eq!(m.size(), 0);
        assert_eq!(m.epoch(), 1);
        assert_eq!(m.capacity(), 0);
        assert_eq!(m.bucket_count(), 1);

        let mut handles = vec![Handle::INVALID; 1];
        m.find(&i32s(&[7]), &mut handles, &mut masks).unwrap();
        assert_eq!(masks, vec![false]);
    }
}

// Test: allocation failure during an explicit rehash.
// Assumes: the parallel backend sizes its bucket heads from the bucket
// count, so `usize::MAX` buckets cannot be allocated.
// Verifies: rehash fails with AllocationFailed; size, epoch, shape,
// contents and outstanding handles are unchanged.
#[test]
fn failed_rehash_leaves_table_untouched() {
    let mut m = int_map(Device::Parallel);
    let mut handles = vec![Handle::INVALID; 3];
    m.insert(&i32s(&[1, 2, 3]), &i32s(&[10, 20, 30]), Some(&mut handles), None)
        .unwrap();
    let before = contents(&m);

    assert!(matches!(
        m.rehash(usize::MAX),
        Err(HashmapError::AllocationFailed { .. })
    ));
    assert_eq!(m.size(), 3);
    assert_eq!(m.epoch(), 1);
    assert_eq!(m.bucket_count(), 10);
    assert_eq!(m.capacity(), 10);
    assert_eq!(contents(&m), before);

    let mut values = vec![0u8; 12];
    m.unpack(&handles, None, None, Some(&mut values)).unwrap();
    assert_eq!(to_i32s(&values), vec![10, 20, 30]);
}

// Test: a zero thread count.
// Verifies: `with_num_threads(0)` builds a dedicated pool sized by rayon
// instead of failing.
#[test]
fn zero_threads_lets_rayon_choose() {
    let config = HashmapConfig::new(4, 4)
        .with_num_threads(0)
        .on_device(Device::Parallel);
    let mut m = Hashmap::with_config(config).unwrap();
    let keys: Vec<i32> = (0..100).collect();
    m.insert(&i32s(&keys), &i32s(&keys), None, None).unwrap();
    assert_eq!(m.size(), 100);
}
