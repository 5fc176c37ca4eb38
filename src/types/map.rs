use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash, Hasher};

use tracing::debug;

/// Bucket count used by [Map::new].
pub const DEFAULT_CAPACITY: usize = 256;

/// Maximum `(length + tombs) / capacity` tolerated after an insertion,
/// expressed as a fraction to keep the check in integer arithmetic.
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, byte at a time.
#[derive(Clone, Copy, Debug)]
pub struct FnvHasher(u64);

impl Default for FnvHasher {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FnvBuildHasher;

impl BuildHasher for FnvBuildHasher {
    type Hasher = FnvHasher;

    fn build_hasher(&self) -> FnvHasher {
        FnvHasher::default()
    }
}

/// Next bucket to visit after `idx` in a table of `capacity` buckets.
///
/// The sequence produced from any start index must reach every bucket of
/// the table, otherwise inserts may fail to find a free slot.
pub type Probe = fn(usize, usize) -> usize;

pub fn linear_probe(idx: usize, capacity: usize) -> usize {
    (idx + 1) % capacity
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketState {
    Null,
    Tomb,
    Full,
}

#[derive(Clone)]
enum Bucket<K, V> {
    Null,
    Tomb,
    Full { hash: u64, key: K, value: V },
}

impl<K, V> Bucket<K, V> {
    fn state(&self) -> BucketState {
        match self {
            Bucket::Null => BucketState::Null,
            Bucket::Tomb => BucketState::Tomb,
            Bucket::Full { .. } => BucketState::Full,
        }
    }
}

enum Slot {
    Existing(usize),
    Vacant(usize),
}

/// Open addressing hash table with tombstones.
///
/// Buckets move `Null -> Full` on insert, `Full -> Tomb` on removal and
/// `Tomb -> Full` when an insert reuses the first tombstone found on its
/// probe path. `Null` is only restored by [Map::rehash] or [Map::clear].
/// Keys and values are dropped when their bucket leaves the `Full` state.
#[derive(Clone)]
pub struct Map<K, V, S = FnvBuildHasher> {
    buckets: Box<[Bucket<K, V>]>,
    length: usize,
    tombs: usize,
    rehashes: usize,
    hasher: S,
    probe: Probe,
}

fn alloc_buckets<K, V>(capacity: usize) -> Box<[Bucket<K, V>]> {
    (0..capacity.max(1)).map(|_| Bucket::Null).collect()
}

fn max_load(capacity: usize) -> usize {
    capacity * MAX_LOAD_NUM / MAX_LOAD_DEN
}

impl<K, V> Map<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, FnvBuildHasher)
    }
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Map<K, V, S> {
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            buckets: alloc_buckets(capacity),
            length: 0,
            tombs: 0,
            rehashes: 0,
            hasher,
            probe: linear_probe,
        }
    }

    /// Replace the probe function, only allowed while the map is empty.
    pub fn with_probe(mut self, probe: Probe) -> Self {
        assert!(
            self.length == 0 && self.tombs == 0,
            "probe function changed on a populated map"
        );
        self.probe = probe;
        self
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn tombs(&self) -> usize {
        self.tombs
    }

    /// Number of table reallocations since creation.
    pub fn rehashes(&self) -> usize {
        self.rehashes
    }

    pub fn load_factor(&self) -> f32 {
        (self.length + self.tombs) as f32 / self.capacity() as f32
    }

    pub fn bucket_state(&self, idx: usize) -> Option<BucketState> {
        self.buckets.get(idx).map(Bucket::state)
    }

    pub fn clear(&mut self) {
        if self.length == 0 && self.tombs == 0 {
            return;
        }
        self.buckets.iter_mut().for_each(|bucket| *bucket = Bucket::Null);
        self.length = 0;
        self.tombs = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().filter_map(|bucket| match bucket {
            Bucket::Full { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.buckets.iter_mut().filter_map(|bucket| match bucket {
            Bucket::Full { key, value, .. } => Some((&*key, value)),
            _ => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Remove every entry for which `keep` returns false, leaving
    /// tombstones behind.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        for bucket in self.buckets.iter_mut() {
            let Bucket::Full { key, value, .. } = bucket else {
                continue;
            };
            if !keep(key, value) {
                *bucket = Bucket::Tomb;
                self.length -= 1;
                self.tombs += 1;
            }
        }
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.hasher.hash_one(key)
    }

    fn start_index(&self, hash: u64) -> usize {
        // the modulo result always fits the table size
        (hash % self.capacity() as u64) as usize
    }

    fn find<Q>(&self, hash: u64, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let capacity = self.capacity();
        let mut idx = self.start_index(hash);
        for _ in 0..capacity {
            match &self.buckets[idx] {
                Bucket::Null => return None,
                Bucket::Full { hash: h, key: k, .. }
                    if *h == hash && k.borrow() == key =>
                {
                    return Some(idx)
                }
                Bucket::Full { .. } | Bucket::Tomb => {}
            }
            idx = (self.probe)(idx, capacity);
        }
        None
    }

    /// Locate the bucket for a write, remembering the first tombstone so
    /// the insert can reuse it when no live match exists.
    fn find_slot(&self, hash: u64, key: &K) -> Option<Slot> {
        let capacity = self.capacity();
        let mut idx = self.start_index(hash);
        let mut first_tomb = None;
        for _ in 0..capacity {
            match &self.buckets[idx] {
                Bucket::Full { hash: h, key: k, .. } if *h == hash && k == key => {
                    return Some(Slot::Existing(idx))
                }
                Bucket::Full { .. } => {}
                Bucket::Tomb => {
                    first_tomb.get_or_insert(idx);
                }
                Bucket::Null => {
                    return Some(Slot::Vacant(first_tomb.unwrap_or(idx)))
                }
            }
            idx = (self.probe)(idx, capacity);
        }
        first_tomb.map(Slot::Vacant)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.find(self.hash_of(key), key)?;
        match &self.buckets[idx] {
            Bucket::Full { value, .. } => Some(value),
            Bucket::Null | Bucket::Tomb => None,
        }
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.find(self.hash_of(key), key)?;
        match &mut self.buckets[idx] {
            Bucket::Full { value, .. } => Some(value),
            Bucket::Null | Bucket::Tomb => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(self.hash_of(key), key).is_some()
    }

    /// Insert or replace, returning the previous value of a live key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hash_of(&key);
        let mut slot = self.find_slot(hash, &key);
        if !matches!(slot, Some(Slot::Existing(_)))
            && self.length + self.tombs + 1 > max_load(self.capacity())
        {
            let capacity = self.capacity();
            // compact in place when tombstones are the reason for the load
            let new_capacity =
                if (self.length + 1) * 2 <= max_load(capacity) {
                    capacity
                } else {
                    capacity * 2
                };
            self.rehash_into(new_capacity);
            slot = self.find_slot(hash, &key);
        }

        match slot {
            Some(Slot::Existing(idx)) => match &mut self.buckets[idx] {
                Bucket::Full { value: old, .. } => {
                    Some(std::mem::replace(old, value))
                }
                Bucket::Null | Bucket::Tomb => None,
            },
            Some(Slot::Vacant(idx)) => {
                if matches!(self.buckets[idx], Bucket::Tomb) {
                    self.tombs -= 1;
                }
                self.buckets[idx] = Bucket::Full { hash, key, value };
                self.length += 1;
                None
            }
            None => panic!("map probe function does not cover the table"),
        }
    }

    /// Remove a live key, leaving a tombstone in its bucket.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.find(self.hash_of(key), key)?;
        let bucket = std::mem::replace(&mut self.buckets[idx], Bucket::Tomb);
        self.length -= 1;
        self.tombs += 1;
        match bucket {
            Bucket::Full { value, .. } => Some(value),
            Bucket::Null | Bucket::Tomb => None,
        }
    }

    /// Rebuild the table with `capacity` buckets, dropping all tombstones.
    ///
    /// `0` compacts using the current capacity, a capacity smaller than the
    /// current one is ignored.
    pub fn rehash(&mut self, capacity: usize) {
        let capacity = match capacity {
            0 => self.capacity(),
            n if n < self.capacity() => return,
            n => n,
        };
        self.rehash_into(capacity);
    }

    /// Make room for `additional` more entries without a rehash.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.length + additional;
        let capacity = (required * MAX_LOAD_DEN).div_ceil(MAX_LOAD_NUM);
        if capacity > self.capacity() {
            self.rehash_into(capacity);
        }
    }

    fn rehash_into(&mut self, capacity: usize) {
        debug!(
            from = self.capacity(),
            to = capacity,
            length = self.length,
            tombs = self.tombs,
            "map rehash"
        );
        let old = std::mem::replace(&mut self.buckets, alloc_buckets(capacity));
        self.length = 0;
        self.tombs = 0;
        self.rehashes += 1;
        for bucket in old.into_vec() {
            let Bucket::Full { hash, key, value } = bucket else {
                continue;
            };
            let capacity = self.capacity();
            let mut idx = self.start_index(hash);
            let mut placed = false;
            for _ in 0..capacity {
                if matches!(self.buckets[idx], Bucket::Null) {
                    self.buckets[idx] = Bucket::Full { hash, key, value };
                    placed = true;
                    break;
                }
                idx = (self.probe)(idx, capacity);
            }
            assert!(placed, "map probe function does not cover the table");
            self.length += 1;
        }
    }
}

impl<K: Debug, V: Debug, S> Debug for Map<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Extend<(K, V)> for Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for Map<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Map::new();
        map.extend(iter);
        map
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_get_replace() {
        let mut map: Map<u32, &str> = Map::with_capacity(8);
        assert_eq!(map.insert(1, "one"), None);
        assert_eq!(map.insert(2, "two"), None);
        assert_eq!(map.insert(1, "uno"), Some("one"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&"uno"));
        assert_eq!(map.get(&3), None);
    }

    #[test]
    fn remove_leaves_tombstone() {
        let mut map: Map<u32, u32> = Map::with_capacity(16);
        for i in 0..4 {
            map.insert(i, i * 10);
        }
        assert_eq!(map.remove(&2), Some(20));
        assert_eq!(map.remove(&2), None);
        assert_eq!(map.len(), 3);
        assert_eq!(map.tombs(), 1);
        assert!(map.get(&2).is_none());
        let tombs = (0..map.capacity())
            .filter(|idx| map.bucket_state(*idx) == Some(BucketState::Tomb))
            .count();
        assert_eq!(tombs, 1);
    }

    #[test]
    fn insert_reuses_tombstone() {
        let mut map: Map<u32, u32> = Map::with_capacity(16);
        map.insert(7, 1);
        map.remove(&7);
        assert_eq!(map.tombs(), 1);
        map.insert(7, 2);
        assert_eq!(map.tombs(), 0);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&7), Some(&2));
    }

    #[test]
    fn colliding_keys_survive_removal_in_the_middle() {
        // every key lands on the same start bucket
        #[derive(Clone, Copy, Default)]
        struct ZeroHasher;
        impl Hasher for ZeroHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }
        impl BuildHasher for ZeroHasher {
            type Hasher = ZeroHasher;
            fn build_hasher(&self) -> ZeroHasher {
                ZeroHasher
            }
        }

        let mut map = Map::with_capacity_and_hasher(16, ZeroHasher);
        for i in 0..5u32 {
            map.insert(i, i);
        }
        map.remove(&2);
        for i in [0, 1, 3, 4] {
            assert_eq!(map.get(&i), Some(&i));
        }
        map.insert(9, 9);
        assert_eq!(map.bucket_state(2), Some(BucketState::Full));
        assert_eq!(map.tombs(), 0);
    }

    #[test]
    fn rehash_compacts_tombstones() {
        let mut map: Map<u64, u64> = Map::with_capacity(64);
        for i in 0..40 {
            map.insert(i, i);
        }
        for i in 0..30 {
            map.remove(&i);
        }
        assert_eq!(map.tombs(), 30);
        map.rehash(0);
        assert_eq!(map.tombs(), 0);
        assert_eq!(map.capacity(), 64);
        assert_eq!(map.len(), 10);
        for i in 30..40 {
            assert_eq!(map.get(&i), Some(&i));
        }
    }

    #[test]
    fn load_factor_never_exceeds_limit() {
        let mut map: Map<u32, ()> = Map::with_capacity(4);
        for i in 0..500 {
            map.insert(i, ());
            if i % 3 == 0 {
                map.remove(&(i / 2));
            }
            assert!(map.load_factor() <= 0.75);
        }
    }

    #[test]
    fn len_matches_live_keys() {
        use std::collections::HashMap;

        // xorshift, so the sequence is the same on every run
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let mut map: Map<u32, u64> = Map::with_capacity(8);
        let mut model = HashMap::new();
        for _ in 0..4000 {
            let value = next();
            let key = (value % 97) as u32;
            if value & 0x300 == 0 {
                assert_eq!(map.remove(&key), model.remove(&key));
            } else {
                assert_eq!(map.insert(key, value), model.insert(key, value));
            }
            assert_eq!(map.len(), model.len());
            for key in 0..97 {
                assert_eq!(map.get(&key), model.get(&key));
            }
        }
        map.rehash(map.capacity());
        assert_eq!(map.tombs(), 0);
        assert_eq!(map.len(), model.len());
        assert!(model.iter().all(|(key, value)| map.get(key) == Some(value)));
    }

    #[test]
    fn custom_probe() {
        fn step7(idx: usize, capacity: usize) -> usize {
            (idx + 7) % capacity
        }
        let mut map: Map<u32, u32> = Map::with_capacity(16).with_probe(step7);
        for i in 0..100 {
            map.insert(i, i + 1);
        }
        assert!((0..100).all(|i| map.get(&i) == Some(&(i + 1))));
    }

    #[test]
    fn borrowed_lookup_and_retain() {
        let mut map: Map<String, usize> = Map::new();
        map.insert("start".to_string(), 0);
        map.insert("main".to_string(), 1);
        assert_eq!(map.get("main"), Some(&1));
        map.retain(|key, _| key != "start");
        assert!(!map.contains_key("start"));
        assert_eq!(map.tombs(), 1);
    }

    #[test]
    fn values_dropped_on_remove() {
        use std::rc::Rc;
        let tracker = Rc::new(());
        let mut map: Map<u8, Rc<()>> = Map::with_capacity(8);
        map.insert(1, Rc::clone(&tracker));
        assert_eq!(Rc::strong_count(&tracker), 2);
        drop(map.remove(&1));
        assert_eq!(Rc::strong_count(&tracker), 1);
        map.insert(2, Rc::clone(&tracker));
        map.clear();
        assert_eq!(Rc::strong_count(&tracker), 1);
    }
}
