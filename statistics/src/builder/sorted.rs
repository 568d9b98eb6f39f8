use snafu::ensure;
use tracing::trace;

use crate::datum::Datum;
use crate::error::UnsortedInputSnafu;
use crate::histogram::Histogram;
use crate::Result;

/// Builds an equi-depth histogram from values arriving in non-decreasing
/// order, such as an index or primary key scan.
///
/// Buckets start with depth one. Whenever all `num_buckets` are full,
/// neighbours are merged pairwise and the depth doubles. A run of equal
/// values never spans two buckets, and a run that alone exceeds the depth is
/// split off into a bucket of its own and kept apart by later merges.
#[derive(Debug, Clone)]
pub struct SortedBuilder {
    hist: Histogram,
    num_buckets: usize,
    values_per_bucket: u64,
    /// Cumulative count before the open bucket.
    last_number: u64,
    bucket_idx: usize,
    count: u64,
    null_count: u64,
    need_bucket_ndv: bool,
    /// Previous distinct value of the open bucket, with the cumulative
    /// count and repeat it ended at.
    run_origin: Option<(Datum, u64, u64)>,
}

impl SortedBuilder {
    pub fn new(num_buckets: usize, id: i64, need_bucket_ndv: bool) -> Self {
        Self {
            hist: Histogram::new(id, 0, 0, 0, 0),
            num_buckets: num_buckets.max(1),
            values_per_bucket: 1,
            last_number: 0,
            bucket_idx: 0,
            count: 0,
            null_count: 0,
            need_bucket_ndv,
            run_origin: None,
        }
    }

    /// Non-null values seen so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    pub fn hist(&self) -> &Histogram {
        &self.hist
    }

    fn append_bucket(&mut self, value: Datum, count: u64) {
        let ndv = u64::from(self.need_bucket_ndv);
        self.hist
            .append_bucket_with_ndv(value.clone(), value, count, 1, ndv);
    }

    pub fn iterate(&mut self, value: Datum) -> Result<()> {
        if value.is_null() {
            self.null_count += 1;
            return Ok(());
        }
        self.hist.tot_col_size += value.mem_size() as i64;
        self.count += 1;
        if self.count == 1 {
            self.append_bucket(value, 1);
            self.hist.ndv = 1;
            return Ok(());
        }
        let bucket = &self.hist.buckets()[self.bucket_idx];
        ensure!(
            bucket.upper <= value,
            UnsortedInputSnafu {
                previous: bucket.upper.clone(),
                value,
            }
        );
        if bucket.upper == value {
            let bucket = &mut self.hist.buckets_mut()[self.bucket_idx];
            bucket.count += 1;
            bucket.repeat += 1;
            if bucket.repeat > self.values_per_bucket && self.run_origin.is_some() {
                self.isolate_run();
            }
            return Ok(());
        }

        let bucket = &self.hist.buckets()[self.bucket_idx];
        let origin = (bucket.upper.clone(), bucket.count, bucket.repeat);
        if bucket.count + 1 - self.last_number <= self.values_per_bucket {
            let count = bucket.count + 1;
            self.hist
                .update_last_bucket(value, count, 1, self.need_bucket_ndv);
            self.run_origin = Some(origin);
        } else {
            if self.bucket_idx + 1 == self.num_buckets {
                self.halve();
            }
            let bucket = &self.hist.buckets()[self.bucket_idx];
            let origin = (bucket.upper.clone(), bucket.count, bucket.repeat);
            if bucket.count + 1 - self.last_number <= self.values_per_bucket {
                let count = bucket.count + 1;
                self.hist
                    .update_last_bucket(value, count, 1, self.need_bucket_ndv);
                self.run_origin = Some(origin);
            } else {
                self.last_number = bucket.count;
                self.bucket_idx += 1;
                let count = self.last_number + 1;
                self.append_bucket(value, count);
                self.run_origin = None;
            }
        }
        self.hist.ndv += 1;
        Ok(())
    }

    /// Merges buckets pairwise and doubles the depth until at least one
    /// bucket is freed. Heavy single-value buckets stay on their own.
    fn halve(&mut self) {
        let open = &self.hist.buckets()[self.bucket_idx];
        let open_lower = open.lower.clone();
        let partner = self.bucket_idx.checked_sub(1).map(|i| {
            let b = &self.hist.buckets()[i];
            (b.upper.clone(), b.count, b.repeat)
        });
        let before = self.hist.len();
        loop {
            self.values_per_bucket *= 2;
            let after = self.hist.merge_buckets(self.bucket_idx, self.values_per_bucket);
            self.bucket_idx = after - 1;
            if after < before || after <= 1 {
                break;
            }
        }
        // The open bucket absorbed its left neighbour, whose end is now the
        // last distinct value before the open run.
        if self.run_origin.is_none() && self.hist.buckets()[self.bucket_idx].lower != open_lower {
            self.run_origin = partner;
        }
        self.last_number = if self.bucket_idx == 0 {
            0
        } else {
            self.hist.buckets()[self.bucket_idx - 1].count
        };
        trace!(
            values_per_bucket = self.values_per_bucket,
            buckets = self.hist.len(),
            "halved sorted histogram"
        );
    }

    /// Splits the open bucket so that its trailing run becomes a bucket of
    /// its own.
    fn isolate_run(&mut self) {
        if self.bucket_idx + 1 == self.num_buckets {
            self.halve();
            let repeat = self.hist.buckets()[self.bucket_idx].repeat;
            if repeat <= self.values_per_bucket {
                return;
            }
        }
        let Some((prev_upper, prev_count, prev_repeat)) = self.run_origin.take() else {
            return;
        };
        let buckets = self.hist.buckets_mut();
        let idx = self.bucket_idx;
        let run = &mut buckets[idx];
        let run_bucket = crate::histogram::Bucket::new(
            run.upper.clone(),
            run.upper.clone(),
            run.count,
            run.repeat,
        )
        .with_ndv(u64::from(run.ndv > 0));
        run.upper = prev_upper;
        run.count = prev_count;
        run.repeat = prev_repeat;
        run.ndv = run.ndv.saturating_sub(1);
        buckets.insert(idx + 1, run_bucket);
        self.last_number = prev_count;
        self.bucket_idx += 1;
    }

    /// Finishes the scan, returning the number of non-null rows and the
    /// histogram.
    pub fn finish(mut self) -> (u64, Histogram) {
        self.hist.null_count = self.null_count as i64;
        self.hist.pre_calculate_scalar();
        (self.count, self.hist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn build(values: impl IntoIterator<Item = i64>, num_buckets: usize) -> (u64, Histogram) {
        let mut builder = SortedBuilder::new(num_buckets, 1, true);
        for v in values {
            builder.iterate(Datum::Int(v)).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn distinct_values_fill_equal_buckets() {
        let (count, hist) = build(0..100_000, 256);
        assert_eq!(count, 100_000);
        assert_eq!(hist.ndv, 100_000);
        assert_eq!(hist.len(), 196);
        assert!(hist.buckets().iter().take(195).enumerate().all(|(i, _)| hist.bucket_count(i) == 512));
        assert_eq!(hist.buckets()[0].ndv, 512);
        assert!(hist.is_well_formed());
    }

    #[test]
    fn duplicates_stay_in_one_bucket() {
        let values = (0..10).flat_map(|v| std::iter::repeat(v).take(7));
        let (count, hist) = build(values, 4);
        assert_eq!(count, 70);
        assert_eq!(hist.ndv, 10);
        for (i, b) in hist.buckets().iter().enumerate() {
            if i > 0 {
                assert!(hist.buckets()[i - 1].upper < b.lower);
            }
            assert_eq!(b.repeat, 7);
        }
        assert!(hist.is_well_formed());
    }

    #[test]
    fn heavy_run_gets_own_bucket() {
        // The run starts inside a bucket that still has room.
        let mut values: Vec<i64> = (0..37).collect();
        values.extend(std::iter::repeat(40).take(100));
        values.extend(41..=50);
        let (count, hist) = build(values, 8);
        assert_eq!(count, 147);
        let heavy = hist
            .buckets()
            .iter()
            .find(|b| b.upper == Datum::Int(40))
            .unwrap();
        assert_eq!(heavy.lower, Datum::Int(40));
        assert_eq!(heavy.repeat, 100);
        assert_eq!(hist.bucket_count(5), 100);
        assert_eq!(hist.buckets()[4].upper, Datum::Int(36));
        assert!(hist.len() <= 8);
        assert!(hist.is_well_formed());
    }

    #[test]
    fn heavy_run_survives_later_halving() {
        let values = (0..10)
            .chain(std::iter::repeat(10).take(5000))
            .chain(11..20_000);
        let (count, hist) = build(values, 8);
        assert_eq!(count, 24_999);
        assert!(hist.len() <= 8);
        let idx = hist
            .buckets()
            .iter()
            .position(|b| b.lower == Datum::Int(10) && b.upper == Datum::Int(10))
            .unwrap();
        assert_eq!(hist.bucket_count(idx), 5000);
        assert_eq!(hist.equal_row_count(&Datum::Int(10), true).0, 5000.0);
        assert_eq!(hist.not_null_count(), 24_999.0);
        assert_eq!(hist.ndv, 20_000);
        assert!(hist.is_well_formed());
    }

    #[test_case(&[1, 2, 1] ; "drop")]
    #[test_case(&[5, 5, 4] ; "after run")]
    fn rejects_unsorted(values: &[i64]) {
        let mut builder = SortedBuilder::new(4, 1, false);
        let mut result = Ok(());
        for &v in values {
            result = builder.iterate(Datum::Int(v));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(crate::Error::UnsortedInput { .. })));
    }

    #[test]
    fn nulls_are_counted_separately() {
        let mut builder = SortedBuilder::new(4, 1, false);
        builder.iterate(Datum::Null).unwrap();
        builder.iterate(Datum::Int(3)).unwrap();
        let (count, hist) = builder.finish();
        assert_eq!(count, 1);
        assert_eq!(hist.null_count, 1);
        assert_eq!(hist.total_row_count(), 2.0);
    }
}
