//! Equi-depth histograms over [`Datum`] bounds.
//!
//! Buckets store cumulative counts: `count` of bucket `i` is the number of
//! non-null rows in buckets `0..=i`. `repeat` is the number of rows equal to
//! the bucket's upper bound.

mod estimate;
mod merge;
mod scalar;

pub use merge::merge_histograms;
use scalar::BucketScalar;

use std::fmt::Debug;

use crate::datum::Datum;

#[derive(Clone, PartialEq)]
pub struct Bucket {
    /// Inclusive lower bound.
    pub lower: Datum,
    /// Inclusive upper bound.
    pub upper: Datum,
    /// Cumulative count up to and including this bucket.
    pub count: u64,
    pub repeat: u64,
    /// Distinct values in the bucket, 0 when unknown.
    pub ndv: u64,
}

impl Bucket {
    pub fn new(lower: Datum, upper: Datum, count: u64, repeat: u64) -> Self {
        Self {
            lower,
            upper,
            count,
            repeat,
            ndv: 0,
        }
    }

    pub fn with_ndv(mut self, ndv: u64) -> Self {
        self.ndv = ndv;
        self
    }
}

impl Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:?}, {:?}]: {{ count:{}, repeat:{}, ndv:{} }}",
            self.lower, self.upper, self.count, self.repeat, self.ndv
        )
    }
}

#[derive(Clone)]
pub struct Histogram {
    pub id: i64,
    pub ndv: i64,
    pub null_count: i64,
    pub last_update_version: u64,
    pub tot_col_size: i64,
    pub correlation: f64,
    buckets: Vec<Bucket>,
    scalars: Vec<BucketScalar>,
}

impl PartialEq for Histogram {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.ndv == other.ndv
            && self.null_count == other.null_count
            && self.last_update_version == other.last_update_version
            && self.tot_col_size == other.tot_col_size
            && self.correlation.to_bits() == other.correlation.to_bits()
            && self.buckets == other.buckets
    }
}

impl Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Histogram {{ id:{}, ndv:{}, null_count:{}, version:{} }} {{",
            self.id, self.ndv, self.null_count, self.last_update_version
        )?;
        for (i, bucket) in self.buckets.iter().enumerate() {
            writeln!(
                f,
                "  {:?} <= x <= {:?}: {{ count:{}, repeat:{}, ndv:{} }},",
                bucket.lower,
                bucket.upper,
                self.bucket_count(i),
                bucket.repeat,
                bucket.ndv,
            )?;
        }
        write!(f, "}}")
    }
}

impl Histogram {
    pub fn new(id: i64, ndv: i64, null_count: i64, last_update_version: u64, tot_col_size: i64) -> Self {
        Self {
            id,
            ndv,
            null_count,
            last_update_version,
            tot_col_size,
            correlation: 0.0,
            buckets: Vec::new(),
            scalars: Vec::new(),
        }
    }

    /// An empty histogram, used when no statistics could be collected.
    pub fn empty(id: i64) -> Self {
        Self::new(id, 0, 0, 0, 0)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Rows covered by bucket `idx` alone.
    pub fn bucket_count(&self, idx: usize) -> u64 {
        let pre = if idx == 0 { 0 } else { self.buckets[idx - 1].count };
        self.buckets[idx].count.saturating_sub(pre)
    }

    pub fn not_null_count(&self) -> f64 {
        self.buckets.last().map_or(0.0, |b| b.count as f64)
    }

    pub fn total_row_count(&self) -> f64 {
        self.not_null_count() + self.null_count as f64
    }

    /// Smallest value covered by the histogram.
    pub fn min_value(&self) -> Option<&Datum> {
        self.buckets.first().map(|b| &b.lower)
    }

    /// Largest value covered by the histogram.
    pub fn max_value(&self) -> Option<&Datum> {
        self.buckets.last().map(|b| &b.upper)
    }

    pub fn append_bucket(&mut self, lower: Datum, upper: Datum, count: u64, repeat: u64) {
        self.append_bucket_with_ndv(lower, upper, count, repeat, 0);
    }

    pub fn append_bucket_with_ndv(&mut self, lower: Datum, upper: Datum, count: u64, repeat: u64, ndv: u64) {
        self.buckets.push(Bucket::new(lower, upper, count, repeat).with_ndv(ndv));
    }

    /// Extends the last bucket up to `upper`.
    pub(crate) fn update_last_bucket(&mut self, upper: Datum, count: u64, repeat: u64, need_bucket_ndv: bool) {
        if let Some(last) = self.buckets.last_mut() {
            last.upper = upper;
            last.count = count;
            last.repeat = repeat;
            if need_bucket_ndv {
                last.ndv += 1;
            }
        }
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut Vec<Bucket> {
        &mut self.buckets
    }

    /// Halves the bucket count by merging neighbours pairwise over
    /// `buckets[..=bucket_idx]`.
    ///
    /// A single-value bucket holding more than `keep_depth` rows is left on
    /// its own and the buckets around it pair up among themselves. Returns
    /// the number of buckets afterwards.
    pub fn merge_buckets(&mut self, bucket_idx: usize, keep_depth: u64) -> usize {
        if self.buckets.is_empty() {
            return 0;
        }
        let bucket_idx = bucket_idx.min(self.buckets.len() - 1);
        let mut merged: Vec<Bucket> = Vec::with_capacity(bucket_idx / 2 + 1);
        let mut pending: Option<Bucket> = None;
        for i in 0..=bucket_idx {
            let bucket = &self.buckets[i];
            let heavy = bucket.lower == bucket.upper && self.bucket_count(i) > keep_depth;
            if heavy {
                merged.extend(pending.take());
                merged.push(bucket.clone());
                continue;
            }
            match pending.take() {
                Some(left) => merged.push(Bucket {
                    lower: left.lower,
                    upper: bucket.upper.clone(),
                    count: bucket.count,
                    repeat: bucket.repeat,
                    ndv: left.ndv + bucket.ndv,
                }),
                None => pending = Some(bucket.clone()),
            }
        }
        merged.extend(pending);
        self.buckets = merged;
        self.scalars.clear();
        self.buckets.len()
    }

    /// Precomputes the numeric projection of every bucket so range queries
    /// can interpolate without re-inspecting datums.
    pub fn pre_calculate_scalar(&mut self) {
        self.scalars = self.buckets.iter().map(BucketScalar::new).collect();
    }

    pub fn has_scalars(&self) -> bool {
        self.scalars.len() == self.buckets.len()
    }

    /// Adds `count` rows equal to `value`, widening the bucket bounds when
    /// the value falls outside them.
    pub fn add_value_count(&mut self, value: &Datum, count: u64) {
        if count == 0 {
            return;
        }
        if self.buckets.is_empty() {
            self.append_bucket_with_ndv(value.clone(), value.clone(), count, count, 1);
            self.pre_calculate_scalar();
            return;
        }
        let (exceed, idx, in_bucket, matched) = self.locate_bucket(value);
        let idx = if exceed { self.buckets.len() - 1 } else { idx };
        {
            let bucket = &mut self.buckets[idx];
            if exceed {
                bucket.upper = value.clone();
                bucket.repeat = count;
                if bucket.ndv > 0 {
                    bucket.ndv += 1;
                }
            } else if matched {
                bucket.repeat += count;
            } else if !in_bucket {
                bucket.lower = value.clone();
                if bucket.ndv > 0 {
                    bucket.ndv += 1;
                }
            }
        }
        for bucket in &mut self.buckets[idx..] {
            bucket.count += count;
        }
        self.pre_calculate_scalar();
    }

    /// Takes `count` rows equal to `value` out of the histogram. Used when a
    /// value moves into the TopN list.
    pub fn remove_value_count(&mut self, value: &Datum, count: u64) {
        let (exceed, idx, in_bucket, matched) = self.locate_bucket(value);
        if exceed || !in_bucket || count == 0 {
            return;
        }
        let available = if matched {
            self.buckets[idx].repeat
        } else {
            self.bucket_count(idx).saturating_sub(self.buckets[idx].repeat)
        };
        let removed = count.min(available);
        if matched {
            self.buckets[idx].repeat -= removed;
        }
        for bucket in &mut self.buckets[idx..] {
            bucket.count -= removed;
        }
        if self.buckets[idx].ndv > 1 && removed == available {
            self.buckets[idx].ndv -= 1;
        }
        self.pre_calculate_scalar();
    }

    /// Checks the ordering invariants of the bucket sequence.
    pub fn is_well_formed(&self) -> bool {
        let mut pre_count = 0;
        for (i, b) in self.buckets.iter().enumerate() {
            if b.lower > b.upper || b.count < pre_count || b.repeat > b.count - pre_count {
                return false;
            }
            if i > 0 && self.buckets[i - 1].upper > b.lower {
                return false;
            }
            pre_count = b.count;
        }
        true
    }
}
