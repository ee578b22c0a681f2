#![cfg(test)]

// Property tests for Hashmap kept inside the crate so the collision hasher
// variant can reach `with_config_and_hasher` with a private hasher type.

use crate::config::HashmapConfig;
use crate::device::Device;
use crate::error::HashmapError;
use crate::handle::Handle;
use crate::hashmap::Hashmap;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;
use std::hash::Hasher;

const KEY_WIDTH: usize = 2;
const VALUE_WIDTH: usize = 4;

// Batches index a small key space so duplicates (across and within
// batches) are common. Values are derived from key and seed, which keeps
// in-batch duplicates carrying the same value.
#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u16>, i32),
    Activate(Vec<u16>, i32),
    Erase(Vec<u16>),
    Find(Vec<u16>),
    Assign(Vec<u16>, i32),
    Rehash(usize),
    Iterate,
}

fn value_of(key: u16, seed: i32) -> i32 {
    (key as i32).wrapping_mul(31).wrapping_add(seed)
}

fn key_bytes(keys: &[u16]) -> Vec<u8> {
    keys.iter().flat_map(|k| k.to_le_bytes()).collect()
}

fn value_bytes(keys: &[u16], seed: i32) -> Vec<u8> {
    keys.iter()
        .flat_map(|&k| value_of(k, seed).to_le_bytes())
        .collect()
}

fn ok<T>(r: crate::Result<T>) -> Result<T, TestCaseError> {
    r.map_err(|e| TestCaseError::fail(e.to_string()))
}

fn decode(keys: &[u8], values: &[u8]) -> Vec<(u16, i32)> {
    keys.chunks_exact(KEY_WIDTH)
        .zip(values.chunks_exact(VALUE_WIDTH))
        .map(|(k, v)| {
            (
                u16::from_le_bytes([k[0], k[1]]),
                i32::from_le_bytes([v[0], v[1], v[2], v[3]]),
            )
        })
        .collect()
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let batch = proptest::collection::vec(0u16..48, 0..24);
    let op = prop_oneof![
        3 => (batch.clone(), any::<i32>()).prop_map(|(k, s)| Op::Insert(k, s)),
        1 => (batch.clone(), any::<i32>()).prop_map(|(k, s)| Op::Activate(k, s)),
        2 => batch.clone().prop_map(Op::Erase),
        2 => batch.clone().prop_map(Op::Find),
        1 => (batch, any::<i32>()).prop_map(|(k, s)| Op::Assign(k, s)),
        1 => (1usize..64).prop_map(Op::Rehash),
        1 => Just(Op::Iterate),
    ];
    proptest::collection::vec(op, 1..40)
}

/// Checks per-element insert/activate outputs against the model before the
/// model is updated, then applies the batch to the model.
fn check_insert(
    sut: &Hashmap,
    model: &mut HashMap<u16, i32>,
    keys: &[u16],
    handles: &[Handle],
    masks: &[bool],
    seed: i32,
) -> Result<(), TestCaseError> {
    let mut winners: HashMap<u16, usize> = HashMap::new();
    for (&k, &m) in keys.iter().zip(masks) {
        if m {
            *winners.entry(k).or_default() += 1;
        }
    }
    for &k in keys {
        let expected = usize::from(!model.contains_key(&k));
        prop_assert_eq!(winners.get(&k).copied().unwrap_or(0), expected, "key {}", k);
    }
    let mut out = vec![0u8; keys.len() * KEY_WIDTH];
    ok(sut.unpack(handles, None, Some(&mut out), None))?;
    prop_assert_eq!(out, key_bytes(keys));
    for &k in keys {
        model.entry(k).or_insert_with(|| value_of(k, seed));
    }
    Ok(())
}

fn check_state(sut: &Hashmap, model: &HashMap<u16, i32>) -> Result<(), TestCaseError> {
    prop_assert_eq!(sut.size(), model.len());
    prop_assert_eq!(sut.is_empty(), model.is_empty());
    prop_assert!(sut.size() <= sut.capacity());
    let sizes = sut.bucket_sizes();
    prop_assert_eq!(sizes.len(), sut.bucket_count());
    prop_assert_eq!(sizes.iter().sum::<usize>(), model.len());

    let handles = sut.handles();
    prop_assert_eq!(handles.len(), model.len());
    let mut keys = vec![0u8; handles.len() * KEY_WIDTH];
    let mut values = vec![0u8; handles.len() * VALUE_WIDTH];
    ok(sut.unpack(&handles, None, Some(&mut keys), Some(&mut values)))?;
    let dumped: HashMap<u16, i32> = decode(&keys, &values).into_iter().collect();
    prop_assert_eq!(&dumped, model);
    Ok(())
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random batch sequences:
// - Each distinct new key in an insert/activate batch reports `true`
//   exactly once; present keys report `false` and keep their value.
// - Every returned handle unpacks to the key it was returned for.
// - Each distinct present key in an erase batch reports `true` exactly once.
// - `find` parity with the model, including values.
// - Rehash bumps the epoch, keeps every pair, and stales earlier handles.
// - After each op: size parity, bucket sizes sum to the size, and the full
//   dump equals the model.
fn run_state_machine(mut sut: Hashmap, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut model: HashMap<u16, i32> = HashMap::new();
    for op in ops {
        match op {
            Op::Insert(keys, seed) => {
                let mut handles = vec![Handle::INVALID; keys.len()];
                let mut masks = vec![false; keys.len()];
                ok(sut.insert(
                    &key_bytes(&keys),
                    &value_bytes(&keys, seed),
                    Some(&mut handles),
                    Some(&mut masks),
                ))?;
                check_insert(&sut, &mut model, &keys, &handles, &masks, seed)?;
            }
            Op::Activate(keys, seed) => {
                let mut handles = vec![Handle::INVALID; keys.len()];
                let mut masks = vec![false; keys.len()];
                ok(sut.activate(&key_bytes(&keys), Some(&mut handles), Some(&mut masks)))?;
                ok(sut.assign(&handles, Some(&masks), &value_bytes(&keys, seed)))?;
                check_insert(&sut, &mut model, &keys, &handles, &masks, seed)?;
            }
            Op::Erase(keys) => {
                let mut masks = vec![false; keys.len()];
                ok(sut.erase(&key_bytes(&keys), Some(&mut masks)))?;
                let mut erased: HashMap<u16, usize> = HashMap::new();
                for (&k, &m) in keys.iter().zip(&masks) {
                    if m {
                        *erased.entry(k).or_default() += 1;
                    }
                }
                for &k in &keys {
                    let expected = usize::from(model.contains_key(&k));
                    prop_assert_eq!(erased.get(&k).copied().unwrap_or(0), expected, "key {}", k);
                }
                for k in &keys {
                    model.remove(k);
                }
            }
            Op::Find(keys) => {
                let mut handles = vec![Handle::INVALID; keys.len()];
                let mut masks = vec![false; keys.len()];
                ok(sut.find(&key_bytes(&keys), &mut handles, &mut masks))?;
                for (i, k) in keys.iter().enumerate() {
                    prop_assert_eq!(masks[i], model.contains_key(k));
                    if !masks[i] {
                        prop_assert_eq!(handles[i], Handle::INVALID);
                    }
                }
                let mut values = vec![0u8; keys.len() * VALUE_WIDTH];
                ok(sut.unpack(&handles, Some(&masks), None, Some(&mut values)))?;
                for (i, v) in values.chunks_exact(VALUE_WIDTH).enumerate() {
                    if masks[i] {
                        let v = i32::from_le_bytes([v[0], v[1], v[2], v[3]]);
                        prop_assert_eq!(Some(&v), model.get(&keys[i]));
                    } else {
                        prop_assert_eq!(v, &[0u8; VALUE_WIDTH][..], "masked-out output touched");
                    }
                }
            }
            Op::Assign(keys, seed) => {
                let mut handles = vec![Handle::INVALID; keys.len()];
                let mut masks = vec![false; keys.len()];
                ok(sut.find(&key_bytes(&keys), &mut handles, &mut masks))?;
                ok(sut.assign(&handles, Some(&masks), &value_bytes(&keys, seed)))?;
                for &k in &keys {
                    if let Some(v) = model.get_mut(&k) {
                        *v = value_of(k, seed);
                    }
                }
            }
            Op::Rehash(n) => {
                let before = sut.handles();
                let epoch = sut.epoch();
                ok(sut.rehash(n))?;
                prop_assert_eq!(sut.epoch(), epoch + 1);
                prop_assert_eq!(sut.bucket_count(), n);
                if !before.is_empty() {
                    let stale = sut.unpack(&before, None, None, None);
                    prop_assert!(
                        matches!(stale, Err(HashmapError::StaleHandle { .. })),
                        "pre-rehash handles must be stale"
                    );
                }
            }
            Op::Iterate => {
                let mut out = vec![Handle::INVALID; sut.size() + 3];
                let n = ok(sut.get_handles(&mut out))?;
                prop_assert_eq!(n, model.len());
                let mut keys = vec![0u8; n * KEY_WIDTH];
                ok(sut.unpack(&out[..n], None, Some(&mut keys), None))?;
                let mut got: Vec<u16> = keys
                    .chunks_exact(KEY_WIDTH)
                    .map(|k| u16::from_le_bytes([k[0], k[1]]))
                    .collect();
                let mut want: Vec<u16> = model.keys().copied().collect();
                got.sort_unstable();
                want.sort_unstable();
                prop_assert_eq!(got, want);
            }
        }
        check_state(&sut, &model)?;
    }
    Ok(())
}

fn small_config(device: Device) -> HashmapConfig {
    // Starts tiny so growth triggers often.
    HashmapConfig::new(KEY_WIDTH, VALUE_WIDTH)
        .with_buckets(2)
        .with_capacity(4)
        .on_device(device)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_host(ops in arb_ops()) {
        run_state_machine(Hashmap::with_config(small_config(Device::Host)).unwrap(), ops)?;
    }

    #[test]
    fn prop_state_machine_parallel(ops in arb_ops()) {
        run_state_machine(Hashmap::with_config(small_config(Device::Parallel)).unwrap(), ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl std::hash::BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: Same state-machine invariants as above, with every key in one
// bucket chain (parallel) or one probe group (host).
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions(ops in arb_ops(), parallel in any::<bool>()) {
        let device = if parallel { Device::Parallel } else { Device::Host };
        let sut = Hashmap::with_config_and_hasher(small_config(device), ConstBuildHasher).unwrap();
        run_state_machine(sut, ops)?;
    }
}
