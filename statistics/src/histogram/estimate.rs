//! Row-count estimation over a single histogram.

use tracing::trace;

use super::scalar::{common_prefix_len, datum_to_scalar, BucketScalar};
use super::Histogram;
use crate::datum::Datum;

impl Histogram {
    /// Finds the first bucket whose upper bound is `>= value`.
    ///
    /// Returns `(exceed, index, in_bucket, matches_upper)`. `exceed` is set
    /// when the value is above every bucket; `in_bucket` is unset when the
    /// value falls into the gap before bucket `index`.
    pub fn locate_bucket(&self, value: &Datum) -> (bool, usize, bool, bool) {
        if self.buckets.is_empty() {
            return (true, 0, false, false);
        }
        let index = self.buckets.partition_point(|b| b.upper < *value);
        if index == self.buckets.len() {
            return (true, index, false, false);
        }
        let bucket = &self.buckets[index];
        if bucket.upper == *value {
            return (false, index, true, true);
        }
        (false, index, bucket.lower <= *value, false)
    }

    /// Position of `value` inside bucket `index`, in `[0, 1]`.
    pub(crate) fn calc_fraction(&self, index: usize, value: &Datum) -> f64 {
        debug_assert!(
            self.has_scalars(),
            "pre_calculate_scalar must run before estimation"
        );
        match self.scalars.get(index) {
            Some(scalar) => scalar.fraction(value),
            None => BucketScalar::new(&self.buckets[index]).fraction(value),
        }
    }

    /// Estimated rows equal to `value`, and whether it matched a bucket's
    /// upper bound exactly.
    pub fn equal_row_count(&self, value: &Datum, use_bucket_ndv: bool) -> (f64, bool) {
        let (_, index, in_bucket, matched) = self.locate_bucket(value);
        if !in_bucket {
            return (0.0, false);
        }
        let bucket = &self.buckets[index];
        if matched {
            return (bucket.repeat as f64, true);
        }
        if use_bucket_ndv && bucket.ndv > 1 {
            let rest = self.bucket_count(index).saturating_sub(bucket.repeat);
            return (rest as f64 / (bucket.ndv - 1) as f64, false);
        }
        if self.ndv <= 0 {
            return (0.0, false);
        }
        (self.not_null_count() / self.ndv as f64, false)
    }

    /// Estimated rows strictly below `value`, with the bucket it landed in.
    pub fn less_row_count_with_bucket_idx(&self, value: &Datum) -> (f64, usize) {
        if self.buckets.is_empty() {
            return (0.0, 0);
        }
        let (exceed, index, in_bucket, matched) = self.locate_bucket(value);
        if exceed {
            return (self.not_null_count(), self.buckets.len() - 1);
        }
        let pre = if index > 0 {
            self.buckets[index - 1].count as f64
        } else {
            0.0
        };
        if !in_bucket {
            return (pre, index);
        }
        let bucket = &self.buckets[index];
        let cur = bucket.count as f64;
        let repeat = bucket.repeat as f64;
        if matched {
            return (cur - repeat, index);
        }
        let frac = self.calc_fraction(index, value);
        (pre + frac * (cur - repeat - pre), index)
    }

    pub fn less_row_count(&self, value: &Datum) -> f64 {
        self.less_row_count_with_bucket_idx(value).0
    }

    /// Estimated rows strictly above `value`.
    pub fn greater_row_count(&self, value: &Datum) -> f64 {
        let less = self.less_row_count(value);
        let (equal, _) = self.equal_row_count(value, false);
        (self.not_null_count() - less - equal).max(0.0)
    }

    /// Estimated rows in `[a, b)`.
    pub fn between_row_count(&self, a: &Datum, b: &Datum) -> f64 {
        if b < a {
            return 0.0;
        }
        let (less_a, bucket_a) = self.less_row_count_with_bucket_idx(a);
        let (less_b, bucket_b) = self.less_row_count_with_bucket_idx(b);
        let range_est = less_b - less_a;
        let (low_equal, _) = self.equal_row_count(a, false);
        let ndv_avg = if self.ndv > 0 {
            self.not_null_count() / self.ndv as f64
        } else {
            0.0
        };
        // Interpolation inside one bucket can undershoot badly for narrow
        // ranges; never go below the cheaper of the point estimates.
        if bucket_a == bucket_b && range_est < low_equal.max(ndv_avg) && self.ndv > 0 {
            let result = less_b.min(self.not_null_count() - less_a);
            return result.min(low_equal + ndv_avg).max(0.0);
        }
        range_est.max(0.0)
    }

    /// Whether `value` lies outside `[min, max]` of the histogram.
    pub fn out_of_range(&self, value: &Datum) -> bool {
        match (self.min_value(), self.max_value()) {
            (Some(min), Some(max)) => value < min || value > max,
            _ => false,
        }
    }

    /// Rows expected in the part of `[low, high]` that lies outside the
    /// histogram, assuming modified rows taper off linearly over one
    /// histogram width on either side.
    pub fn out_of_range_row_count(&self, low: &Datum, high: &Datum, modify_count: i64) -> f64 {
        if modify_count <= 0 {
            return 0.0;
        }
        let (Some(min), Some(max)) = (self.min_value(), self.max_value()) else {
            return 0.0;
        };
        let common = match min {
            Datum::Bytes(_) => {
                let bytes_of = |d: &Datum| match d {
                    Datum::Bytes(b) => b.clone(),
                    _ => Vec::new(),
                };
                let parts = [bytes_of(min), bytes_of(max), bytes_of(low), bytes_of(high)];
                let slices: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
                common_prefix_len(&slices)
            }
            _ => 0,
        };
        let l = datum_to_scalar(low, common);
        let r = datum_to_scalar(high, common);
        if l >= r {
            return 0.0;
        }
        let hist_l = datum_to_scalar(min, common);
        let hist_r = datum_to_scalar(max, common);
        let width = hist_r - hist_l;
        if !width.is_finite() || width <= 0.0 {
            return 0.0;
        }
        let bound_l = hist_l - width;
        let bound_r = hist_r + width;

        let mut left_percent = 0.0;
        if l < hist_l && r > bound_l {
            let actual_l = l.max(bound_l);
            let actual_r = r.min(hist_l);
            left_percent =
                ((actual_r - bound_l).powi(2) - (actual_l - bound_l).powi(2)) / width.powi(2);
        }
        let mut right_percent = 0.0;
        if l < bound_r && r > hist_r {
            let actual_l = l.max(hist_r);
            let actual_r = r.min(bound_r);
            right_percent =
                ((bound_r - actual_l).powi(2) - (bound_r - actual_r).powi(2)) / width.powi(2);
        }
        let total_percent = (left_percent * 0.5 + right_percent * 0.5).min(1.0);
        let row_count = total_percent * self.not_null_count();
        trace!(left_percent, right_percent, row_count, "out of range estimate");
        row_count.min(modify_count as f64)
    }
}
