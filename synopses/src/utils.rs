use std::hash::{BuildHasher, Hasher};

const M: u64 = 0xc6a4a7935bd1e995;
const R: u32 = 47;

/// Seed used by [`Murmur2Hash64a::default`].
pub const DEFAULT_SEED: u64 = 0x9747b28c;

/// MurmurHash2 64-bit hasher implementation
#[derive(Clone)]
pub struct Murmur2Hash64a {
    hash: u64,
    tail: u64,
    tail_len: usize,
    length: usize,
}

impl Default for Murmur2Hash64a {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Murmur2Hash64a {
    /// Creates a new MurmurHash2 64-bit hasher with the given seed
    pub fn new(seed: u64) -> Self {
        Self {
            hash: seed,
            tail: 0,
            tail_len: 0,
            length: 0,
        }
    }

    #[inline]
    fn process_chunk(&mut self, mut k: u64) {
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        self.hash ^= k;
        self.hash = self.hash.wrapping_mul(M);
    }
}

impl Hasher for Murmur2Hash64a {
    fn finish(&self) -> u64 {
        let mut h = self.hash;

        h ^= (self.length as u64).wrapping_mul(M);

        if self.tail_len > 0 {
            h ^= self.tail;
            h = h.wrapping_mul(M);
        }

        h ^= h >> R;
        h = h.wrapping_mul(M);
        h ^= h >> R;

        h
    }

    fn write(&mut self, bytes: &[u8]) {
        self.length += bytes.len();
        let mut data = bytes;

        // Complete a pending partial chunk first.
        if self.tail_len > 0 {
            let needed = 8 - self.tail_len;
            let available = data.len().min(needed);

            for b in data.iter().take(available) {
                self.tail |= (*b as u64) << (self.tail_len * 8);
                self.tail_len += 1;
            }

            data = &data[available..];

            if self.tail_len == 8 {
                self.process_chunk(self.tail);
                self.tail = 0;
                self.tail_len = 0;
            }
        }

        let mut chunks = data.chunks_exact(8);
        for chunk in chunks.by_ref() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            self.process_chunk(u64::from_le_bytes(word));
        }

        for (i, &byte) in chunks.remainder().iter().enumerate() {
            self.tail |= (byte as u64) << (i * 8);
            self.tail_len += 1;
        }
    }
}

/// A [`BuildHasher`] producing [`Murmur2Hash64a`] instances with a fixed seed.
///
/// Sketches that must agree across processes (merging, persistence) depend on
/// the seed being part of their configuration rather than random state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededMurmur2 {
    seed: u64,
}

impl SeededMurmur2 {
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for SeededMurmur2 {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl BuildHasher for SeededMurmur2 {
    type Hasher = Murmur2Hash64a;

    fn build_hasher(&self) -> Murmur2Hash64a {
        Murmur2Hash64a::new(self.seed)
    }
}

/// Hashes a byte string in one call.
#[inline]
pub fn murmur2_64a(seed: u64, bytes: &[u8]) -> u64 {
    let mut hasher = Murmur2Hash64a::new(seed);
    hasher.write(bytes);
    hasher.finish()
}
