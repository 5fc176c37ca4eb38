use std::hash::Hash;

use serde::Serialize;

use crate::error::MemoryError;
use crate::types::{Map, Vect};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Region<V> {
    pub start: u64,
    pub end: u64,
    pub value: V,
}

impl<V> Region<V> {
    pub fn contains(&self, address: u64) -> bool {
        (self.start..self.end).contains(&address)
    }
}

/// Address regions grouped under a key.
///
/// Regions of the same key may overlap, lookups return the most recently
/// inserted region containing the address.
#[derive(Clone, Debug)]
pub struct RegionMap<K, V> {
    regions: Map<K, Vect<Region<V>>>,
}

impl<K, V> Default for RegionMap<K, V> {
    fn default() -> Self {
        Self { regions: Map::new() }
    }
}

impl<K: Hash + Eq, V> RegionMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: K,
        start: u64,
        end: u64,
        value: V,
    ) -> Result<(), MemoryError> {
        if start >= end {
            return Err(MemoryError::EmptyRange { start, end });
        }
        let region = Region { start, end, value };
        match self.regions.get_mut(&key) {
            Some(regions) => regions.push(region),
            None => {
                self.regions.insert(key, [region].into_iter().collect());
            }
        }
        Ok(())
    }

    pub fn find(&self, key: &K, address: u64) -> Option<&Region<V>> {
        self.regions
            .get(key)?
            .iter()
            .rev()
            .find(|region| region.contains(address))
    }

    /// Regions of `key` in insertion order.
    pub fn regions(&self, key: &K) -> &[Region<V>] {
        self.regions
            .get(key)
            .map(|regions| regions.as_slice())
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.regions.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Region<V>)> {
        self.regions
            .iter()
            .flat_map(|(key, regions)| regions.iter().map(move |r| (key, r)))
    }

    pub fn remove_key(&mut self, key: &K) -> Option<Vect<Region<V>>> {
        self.regions.remove(key)
    }

    /// Number of regions over every key.
    pub fn len(&self) -> usize {
        self.regions.values().map(|regions| regions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
