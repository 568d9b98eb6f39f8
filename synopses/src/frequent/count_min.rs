//! Count-min sketch over byte keys.
//!
//! Every row of the counter table is indexed with double hashing
//! (`h1 + i * h2`), so a single pair of Murmur2 hashes serves all rows.
//! Point queries take the minimum over the rows and can only overestimate.

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{IncompatibleSketchSnafu, InvalidDimensionsSnafu};
use crate::utils::murmur2_64a;
use crate::Result;

const SEED1: u64 = 0;
const SEED2: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountMinSketch {
    depth: usize,
    width: usize,
    count: u64,
    default_value: u64,
    /// Set once any counter saturated.
    overflowed: bool,
    table: Vec<Vec<u32>>,
}

impl CountMinSketch {
    pub fn new(depth: usize, width: usize) -> Result<Self> {
        ensure!(depth > 0 && width > 0, InvalidDimensionsSnafu { depth, width });
        Ok(Self {
            depth,
            width,
            count: 0,
            default_value: 0,
            overflowed: false,
            table: vec![vec![0; width]; depth],
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Total number of insertions, weighted.
    pub fn total_count(&self) -> u64 {
        self.count
    }

    pub fn default_value(&self) -> u64 {
        self.default_value
    }

    pub fn set_default_value(&mut self, value: u64) {
        self.default_value = value;
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Average frequency of the values that are not covered by an explicit
    /// top-N list, returned for keys the sketch has never seen.
    pub fn calc_default_value(&mut self, ndv: u64, topn_total: u64, topn_num: u64) {
        self.default_value = if ndv > topn_num {
            self.count.saturating_sub(topn_total) / (ndv - topn_num)
        } else {
            0
        };
    }

    pub fn insert_bytes(&mut self, bytes: &[u8]) {
        self.insert_bytes_by_count(bytes, 1);
    }

    pub fn insert_bytes_by_count(&mut self, bytes: &[u8], count: u64) {
        self.count = self.count.saturating_add(count);
        let (h1, h2) = hash_pair(bytes);
        let add = u32::try_from(count).unwrap_or(u32::MAX);
        for (i, row) in self.table.iter_mut().enumerate() {
            let j = slot(h1, h2, i, self.width);
            let (sum, carry) = row[j].overflowing_add(add);
            if carry || add == u32::MAX {
                row[j] = u32::MAX;
                self.overflowed = true;
            } else {
                row[j] = sum;
            }
        }
    }

    /// Estimated frequency of `bytes`, never below the true count.
    pub fn query_bytes(&self, bytes: &[u8]) -> u64 {
        let (h1, h2) = hash_pair(bytes);
        let mut min = u64::MAX;
        for (i, row) in self.table.iter().enumerate() {
            let j = slot(h1, h2, i, self.width);
            let cell = row[j];
            let value = if cell == u32::MAX {
                self.count
            } else {
                u64::from(cell)
            };
            min = min.min(value);
        }
        if min == 0 {
            self.default_value
        } else {
            min
        }
    }

    pub fn merge(&mut self, other: &Self) -> Result<()> {
        ensure!(
            self.depth == other.depth && self.width == other.width,
            IncompatibleSketchSnafu {
                left: (self.depth, self.width),
                right: (other.depth, other.width),
            }
        );
        self.count = self.count.saturating_add(other.count);
        self.overflowed |= other.overflowed;
        for (row, other_row) in self.table.iter_mut().zip(&other.table) {
            for (cell, &other_cell) in row.iter_mut().zip(other_row) {
                let (sum, carry) = cell.overflowing_add(other_cell);
                if carry || sum == u32::MAX {
                    *cell = u32::MAX;
                    self.overflowed = true;
                } else {
                    *cell = sum;
                }
            }
        }
        Ok(())
    }
}

#[inline]
fn hash_pair(bytes: &[u8]) -> (u64, u64) {
    (murmur2_64a(SEED1, bytes), murmur2_64a(SEED2, bytes))
}

#[inline]
fn slot(h1: u64, h2: u64, row: usize, width: usize) -> usize {
    (h1.wrapping_add(h2.wrapping_mul(row as u64)) % width as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use test_case::test_case;

    #[test]
    fn rejects_empty_dimensions() {
        assert!(CountMinSketch::new(0, 10).is_err());
        assert!(CountMinSketch::new(5, 0).is_err());
    }

    #[test_case(5, 2048, 20_000, 0.0 ; "uniform")]
    #[test_case(5, 2048, 20_000, 1.1 ; "zipf_like")]
    #[test_case(1, 64, 5_000, 0.5 ; "narrow")]
    fn never_underestimates(depth: usize, width: usize, rows: usize, skew: f64) {
        let mut rng = StdRng::seed_from_u64(42);
        let mut sketch = CountMinSketch::new(depth, width).unwrap();
        let mut truth: HashMap<u64, u64> = HashMap::new();
        for _ in 0..rows {
            let x: f64 = rng.random_range(0.0..1.0);
            let key = (1000.0 * x.powf(1.0 + skew)) as u64;
            *truth.entry(key).or_default() += 1;
            sketch.insert_bytes(&key.to_be_bytes());
        }
        for (key, count) in truth {
            assert!(sketch.query_bytes(&key.to_be_bytes()) >= count);
        }
        assert_eq!(sketch.total_count(), rows as u64);
    }

    #[test]
    fn unseen_key_uses_default_value() {
        let mut sketch = CountMinSketch::new(5, 2048).unwrap();
        sketch.insert_bytes_by_count(b"a", 10);
        sketch.insert_bytes_by_count(b"b", 30);
        sketch.insert_bytes_by_count(b"c", 2);
        assert_eq!(sketch.query_bytes(b"zzz"), 0);
        // 42 rows, 30 of them in a top-N of one value, 3 distinct values.
        sketch.calc_default_value(3, 30, 1);
        assert_eq!(sketch.default_value(), 6);
        assert_eq!(sketch.query_bytes(b"zzz"), 6);
        assert_eq!(sketch.query_bytes(b"a"), 10);
    }

    #[test]
    fn default_value_is_zero_when_topn_covers_everything() {
        let mut sketch = CountMinSketch::new(2, 16).unwrap();
        sketch.insert_bytes(b"x");
        sketch.calc_default_value(1, 1, 1);
        assert_eq!(sketch.default_value(), 0);
    }

    #[test]
    fn saturated_counter_answers_total() {
        let mut sketch = CountMinSketch::new(3, 8).unwrap();
        sketch.insert_bytes_by_count(b"heavy", u64::from(u32::MAX) + 5);
        sketch.insert_bytes(b"light");
        assert!(sketch.overflowed());
        assert_eq!(sketch.query_bytes(b"heavy"), u64::from(u32::MAX) + 6);
    }

    #[test]
    fn merge_adds_counters() {
        let mut left = CountMinSketch::new(4, 256).unwrap();
        let mut right = CountMinSketch::new(4, 256).unwrap();
        left.insert_bytes_by_count(b"k", 3);
        right.insert_bytes_by_count(b"k", 4);
        right.insert_bytes(b"other");
        left.merge(&right).unwrap();
        assert!(left.query_bytes(b"k") >= 7);
        assert_eq!(left.total_count(), 8);
    }

    #[test]
    fn merge_rejects_mismatched_dimensions() {
        let mut left = CountMinSketch::new(4, 256).unwrap();
        let right = CountMinSketch::new(4, 128).unwrap();
        assert!(left.merge(&right).is_err());
    }
}
