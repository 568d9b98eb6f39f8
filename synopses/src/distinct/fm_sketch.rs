//! Flajolet-Martin style distinct counter with an adaptive sampling mask.
//!
//! The sketch keeps the exact set of hash values whose low bits (selected by
//! `mask`) are all zero. Whenever the set grows beyond `max_size`, the mask
//! gains one more bit and roughly half of the stored hashes are discarded, so
//! the estimate is `(mask + 1) * |set|`. Below `max_size` distinct values the
//! count is exact.

use std::hash::{BuildHasher, Hash};

use hashbrown::HashSet;

use crate::utils::SeededMurmur2;

#[derive(Debug, Clone)]
pub struct FmSketch<S = SeededMurmur2> {
    hash_builder: S,
    hashset: HashSet<u64>,
    mask: u64,
    max_size: usize,
}

impl FmSketch {
    pub fn new(max_size: usize) -> Self {
        Self::with_hasher(max_size, SeededMurmur2::default())
    }
}

impl<S> FmSketch<S> {
    pub fn with_hasher(max_size: usize, hash_builder: S) -> Self {
        Self {
            hash_builder,
            hashset: HashSet::with_capacity(max_size.min(1 << 16)),
            mask: 0,
            max_size: max_size.max(1),
        }
    }

    /// Inserts an already computed 64-bit hash.
    pub fn insert_hash(&mut self, hash: u64) {
        if hash & self.mask != 0 {
            return;
        }
        self.hashset.insert(hash);
        if self.hashset.len() > self.max_size {
            self.mask = self.mask * 2 + 1;
            let mask = self.mask;
            self.hashset.retain(|h| h & mask == 0);
        }
    }

    /// Approximate number of distinct values inserted so far.
    pub fn estimate(&self) -> f64 {
        (self.mask as f64 + 1.0) * self.hashset.len() as f64
    }

    /// [`FmSketch::estimate`] as a whole count.
    pub fn ndv(&self) -> u64 {
        (self.mask + 1).saturating_mul(self.hashset.len() as u64)
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of hash values currently retained.
    pub fn len(&self) -> usize {
        self.hashset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashset.is_empty()
    }

    /// Merges a sketch built over another partition of the same stream.
    ///
    /// The result is the sketch of the union: the coarser mask wins and every
    /// retained hash of `other` is re-inserted under it.
    pub fn merge(&mut self, other: &Self) {
        if self.mask < other.mask {
            self.mask = other.mask;
            let mask = self.mask;
            self.hashset.retain(|h| h & mask == 0);
        }
        for &hash in &other.hashset {
            self.insert_hash(hash);
        }
    }
}

impl<S: BuildHasher> FmSketch<S> {
    pub fn insert<Q>(&mut self, key: &Q)
    where
        Q: Hash + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.insert_hash(hash);
    }
}

impl<K, S> Extend<K> for FmSketch<S>
where
    K: Hash,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        for x in iter {
            self.insert(&x);
        }
    }
}
