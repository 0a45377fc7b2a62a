//! The four canonical hash container shapes used across the rest of the
//! crate. Each is tuned for one specific key shape rather than being a
//! single generic `HashMap` wrapper: a distinct container per access
//! pattern instead of reaching for `std::collections::HashMap` everywhere
//! (see `ident::djb2` for the string hash this module reuses, and
//! `ident::mix_bits_64` for the pointer mix).
//!
//! - [`PtrMap`]: pointer-identity keys, quadratic probing.
//! - [`StrMap`]: interned-string keys, DJB2 + linear probing.
//! - [`U64Map`]: raw `u64` keys, SplitMix64 + a single-entry cache for the
//!   common case of repeated lookups of the same key (e.g. the layout
//!   cache hammering one type during a single elaboration pass).
//! - [`ConcurrentPtrMap`]: pointer-identity keys, lock-free, fixed bucket
//!   count. Used by the simulation kernel's signal-to-process fan-out table,
//!   which is populated from multiple worker threads during elaboration but
//!   only ever read from during simulation.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::ident::mix_bits_64;

const INITIAL_CAPACITY: usize = 16;
const MAX_LOAD_NUM: usize = 1;
const MAX_LOAD_DEN: usize = 2;

fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two().max(INITIAL_CAPACITY)
}

/// Pointer (arena-handle) identity keyed map. Open-addressed with quadratic
/// probing; rehashes into double the capacity once the load factor would
/// exceed one half.
pub struct PtrMap<V> {
    slots: Vec<Option<(usize, V)>>,
    len: usize,
}

impl<V> PtrMap<V> {
    pub fn new() -> Self {
        PtrMap {
            slots: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn probe(slots: &[Option<(usize, V)>], key: usize) -> usize {
        let mask = slots.len() - 1;
        let mut idx = (mix_bits_64(key as u64) as usize) & mask;
        let mut step = 1usize;
        while let Some((k, _)) = &slots[idx] {
            if *k == key {
                return idx;
            }
            idx = (idx + step * step) & mask;
            step += 1;
        }
        idx
    }

    fn maybe_grow(&mut self) {
        if self.len * MAX_LOAD_DEN >= self.slots.len() * MAX_LOAD_NUM {
            let new_cap = self.slots.len() * 2;
            let old = std::mem::replace(&mut self.slots, (0..new_cap).map(|_| None).collect());
            self.len = 0;
            for entry in old.into_iter().flatten() {
                self.insert(entry.0, entry.1);
            }
        }
    }

    pub fn insert(&mut self, key: usize, value: V) -> Option<V> {
        self.maybe_grow();
        let idx = Self::probe(&self.slots, key);
        match self.slots[idx].take() {
            Some((_, old)) => {
                self.slots[idx] = Some((key, value));
                Some(old)
            }
            None => {
                self.slots[idx] = Some((key, value));
                self.len += 1;
                None
            }
        }
    }

    pub fn get(&self, key: usize) -> Option<&V> {
        let mask = self.slots.len() - 1;
        let mut idx = (mix_bits_64(key as u64) as usize) & mask;
        let mut step = 1usize;
        loop {
            match &self.slots[idx] {
                Some((k, v)) if *k == key => return Some(v),
                Some(_) => {
                    idx = (idx + step * step) & mask;
                    step += 1;
                    if step > self.slots.len() {
                        return None;
                    }
                }
                None => return None,
            }
        }
    }
}

impl<V> Default for PtrMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// DJB2-hashed, linear-probed map for interned-string-like keys. Keys are
/// owned `String`s (rather than borrowed `&str`) so the container can own
/// its entries independent of wherever the string came from; callers
/// working with `Ident` should key on `ident.as_str().to_owned()` once at
/// insertion and compare by value thereafter.
pub struct StrMap<V> {
    slots: Vec<Option<(String, V)>>,
    len: usize,
}

fn djb2(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

impl<V> StrMap<V> {
    pub fn new() -> Self {
        StrMap {
            slots: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn maybe_grow(&mut self) {
        if self.len * MAX_LOAD_DEN >= self.slots.len() * MAX_LOAD_NUM {
            let new_cap = self.slots.len() * 2;
            let old = std::mem::replace(&mut self.slots, (0..new_cap).map(|_| None).collect());
            self.len = 0;
            for entry in old.into_iter().flatten() {
                self.insert(entry.0, entry.1);
            }
        }
    }

    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        self.maybe_grow();
        let mask = self.slots.len() - 1;
        let mut idx = (djb2(key.as_bytes()) as usize) & mask;
        loop {
            match &self.slots[idx] {
                Some((k, _)) if *k == key => {
                    let old = self.slots[idx].take().map(|(_, v)| v);
                    self.slots[idx] = Some((key, value));
                    return old;
                }
                None => {
                    self.slots[idx] = Some((key, value));
                    self.len += 1;
                    return None;
                }
                Some(_) => idx = (idx + 1) & mask,
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let mask = self.slots.len() - 1;
        let mut idx = (djb2(key.as_bytes()) as usize) & mask;
        let mut probes = 0;
        loop {
            match &self.slots[idx] {
                Some((k, v)) if k == key => return Some(v),
                Some(_) => {
                    idx = (idx + 1) & mask;
                    probes += 1;
                    if probes > self.slots.len() {
                        return None;
                    }
                }
                None => return None,
            }
        }
    }
}

impl<V> Default for StrMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// `u64`-keyed map with SplitMix64 mixing and open addressing by linear
/// probing, plus a single-entry cache for the hot path of repeated lookups
/// on the same key (the layout memoization table's dominant access pattern
/// within one elaboration pass: the same type is queried many times in a
/// row while a hierarchy is instantiated).
pub struct U64Map<V: Clone> {
    slots: Vec<Option<(u64, V)>>,
    len: usize,
    cache: Option<(u64, V)>,
}

impl<V: Clone> U64Map<V> {
    pub fn new() -> Self {
        U64Map {
            slots: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            len: 0,
            cache: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn maybe_grow(&mut self) {
        if self.len * MAX_LOAD_DEN >= self.slots.len() * MAX_LOAD_NUM {
            let new_cap = self.slots.len() * 2;
            let old = std::mem::replace(&mut self.slots, (0..new_cap).map(|_| None).collect());
            self.len = 0;
            for entry in old.into_iter().flatten() {
                self.insert(entry.0, entry.1);
            }
        }
    }

    pub fn insert(&mut self, key: u64, value: V) -> Option<V> {
        self.maybe_grow();
        self.cache = Some((key, value.clone()));
        let mask = self.slots.len() - 1;
        let mut idx = (splitmix64(key) as usize) & mask;
        loop {
            match &self.slots[idx] {
                Some((k, _)) if *k == key => {
                    let old = self.slots[idx].take().map(|(_, v)| v);
                    self.slots[idx] = Some((key, value));
                    return old;
                }
                None => {
                    self.slots[idx] = Some((key, value));
                    self.len += 1;
                    return None;
                }
                Some(_) => idx = (idx + 1) & mask,
            }
        }
    }

    pub fn get(&mut self, key: u64) -> Option<&V> {
        if let Some((k, _)) = &self.cache {
            if *k == key {
                return self.cache.as_ref().map(|(_, v)| v);
            }
        }

        let mask = self.slots.len() - 1;
        let mut idx = (splitmix64(key) as usize) & mask;
        let mut probes = 0;
        loop {
            match &self.slots[idx] {
                Some((k, v)) if *k == key => {
                    self.cache = Some((key, v.clone()));
                    return self.cache.as_ref().map(|(_, v)| v);
                }
                Some(_) => {
                    idx = (idx + 1) & mask;
                    probes += 1;
                    if probes > self.slots.len() {
                        return None;
                    }
                }
                None => return None,
            }
        }
    }
}

impl<V: Clone> Default for U64Map<V> {
    fn default() -> Self {
        Self::new()
    }
}

struct Node<V> {
    key: usize,
    value: V,
    next: AtomicPtr<Node<V>>,
}

/// Lock-free, pointer-keyed map with a fixed bucket count chosen at
/// construction and never resized: insertion only ever CASes a new node
/// onto a bucket's head. Suited to write-once-many-readers tables built
/// once during elaboration (single-threaded in this crate, per spec's
/// concurrency model) and never touched again during simulation, where
/// resizing would otherwise force synchronization between readers.
pub struct ConcurrentPtrMap<V> {
    buckets: Vec<AtomicPtr<Node<V>>>,
    len: AtomicUsize,
}

impl<V> ConcurrentPtrMap<V> {
    pub fn with_bucket_count(buckets: usize) -> Self {
        let buckets = buckets.max(1);
        ConcurrentPtrMap {
            buckets: (0..buckets).map(|_| AtomicPtr::new(std::ptr::null_mut())).collect(),
            len: AtomicUsize::new(0),
        }
    }

    fn bucket_index(&self, key: usize) -> usize {
        (mix_bits_64(key as u64) as usize) % self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `(key, value)` onto its bucket's head via compare-and-swap.
    /// Does not check for an existing `key`; callers that need
    /// insert-or-update semantics should look up first (this container is
    /// meant for write-once tables where a key is inserted exactly once).
    pub fn insert(&self, key: usize, value: V) {
        let bucket = self.bucket_index(key);
        let node = Box::into_raw(Box::new(Node {
            key,
            value,
            next: AtomicPtr::new(std::ptr::null_mut()),
        }));

        loop {
            let head = self.buckets[bucket].load(Ordering::Acquire);
            unsafe {
                (*node).next.store(head, Ordering::Relaxed);
            }
            if self.buckets[bucket]
                .compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.len.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    pub fn get(&self, key: usize) -> Option<&V> {
        let bucket = self.bucket_index(key);
        let mut cur = self.buckets[bucket].load(Ordering::Acquire);
        while !cur.is_null() {
            let node = unsafe { &*cur };
            if node.key == key {
                return Some(&node.value);
            }
            cur = node.next.load(Ordering::Acquire);
        }
        None
    }
}

impl<V> Drop for ConcurrentPtrMap<V> {
    fn drop(&mut self) {
        for bucket in &self.buckets {
            let mut cur = bucket.load(Ordering::Relaxed);
            while !cur.is_null() {
                let node = unsafe { Box::from_raw(cur) };
                cur = node.next.load(Ordering::Relaxed);
            }
        }
    }
}

unsafe impl<V: Send> Send for ConcurrentPtrMap<V> {}
unsafe impl<V: Send + Sync> Sync for ConcurrentPtrMap<V> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_map_insert_get_and_grow() {
        let mut m = PtrMap::new();
        for i in 0..64usize {
            m.insert(i * 8, i);
        }
        for i in 0..64usize {
            assert_eq!(m.get(i * 8), Some(&i));
        }
        assert_eq!(m.len(), 64);
    }

    #[test]
    fn ptr_map_overwrite_returns_old_value() {
        let mut m = PtrMap::new();
        m.insert(8, "a");
        let old = m.insert(8, "b");
        assert_eq!(old, Some("a"));
        assert_eq!(m.get(8), Some(&"b"));
    }

    #[test]
    fn str_map_insert_get_and_grow() {
        let mut m = StrMap::new();
        for i in 0..64 {
            m.insert(format!("key{}", i), i);
        }
        for i in 0..64 {
            assert_eq!(m.get(&format!("key{}", i)), Some(&i));
        }
    }

    #[test]
    fn u64_map_cache_hits_on_repeat_lookup() {
        let mut m = U64Map::new();
        m.insert(42, "answer");
        assert_eq!(m.get(42), Some(&"answer"));
        assert_eq!(m.get(42), Some(&"answer"));
        assert_eq!(m.get(7), None);
    }

    #[test]
    fn concurrent_ptr_map_never_resizes_and_chains_collisions() {
        let map: ConcurrentPtrMap<usize> = ConcurrentPtrMap::with_bucket_count(4);
        for i in 0..100 {
            map.insert(i, i * i);
        }
        for i in 0..100 {
            assert_eq!(map.get(i), Some(&(i * i)));
        }
        assert_eq!(map.len(), 100);
    }

    /// A concurrent map survives N writer threads each doing M insertions,
    /// with final membership equal to the union of all inserted keys.
    /// Each writer owns a disjoint key range, so final membership can be
    /// checked without needing insert-or-update semantics from `insert`.
    #[test]
    fn concurrent_ptr_map_survives_many_writer_threads() {
        use std::sync::Arc;
        use std::thread;

        const WRITERS: usize = 8;
        const PER_WRITER: usize = 500;

        let map = Arc::new(ConcurrentPtrMap::with_bucket_count(64));
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        let key = w * PER_WRITER + i;
                        map.insert(key, key * 2);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(map.len(), WRITERS * PER_WRITER);
        for w in 0..WRITERS {
            for i in 0..PER_WRITER {
                let key = w * PER_WRITER + i;
                assert_eq!(map.get(key), Some(&(key * 2)));
            }
        }
    }
}
