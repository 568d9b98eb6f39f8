//! Merging histograms of the same column built over different partitions.

use itertools::Itertools;
use tracing::debug;

use super::Histogram;
use crate::datum::Datum;

/// A slice of a bucket: either the rows strictly inside it (`point == false`)
/// or the rows equal to its upper bound.
#[derive(Debug, Clone)]
struct Atom {
    lower: Datum,
    upper: Datum,
    count: u64,
    point: bool,
}

fn atoms(hist: &Histogram) -> Vec<Atom> {
    let mut out = Vec::with_capacity(hist.len() * 2);
    for (i, bucket) in hist.buckets().iter().enumerate() {
        let interior = hist.bucket_count(i).saturating_sub(bucket.repeat);
        if interior > 0 {
            out.push(Atom {
                lower: bucket.lower.clone(),
                upper: bucket.upper.clone(),
                count: interior,
                point: false,
            });
        }
        if bucket.repeat > 0 {
            out.push(Atom {
                lower: bucket.upper.clone(),
                upper: bucket.upper.clone(),
                count: bucket.repeat,
                point: true,
            });
        }
    }
    out
}

struct OpenBucket {
    lower: Datum,
    upper: Datum,
    count: u64,
    repeat: u64,
}

/// Merges two histograms of the same column into one with at most
/// `num_buckets` buckets.
///
/// Both bucket sequences are walked in upper-bound order; rows at equal
/// upper bounds are summed and the combined stream is re-bucketed to equal
/// depth. The distinct count is the sum of both inputs, an upper bound when
/// the inputs share values.
pub fn merge_histograms(left: &Histogram, right: &Histogram, num_buckets: usize) -> Histogram {
    let num_buckets = num_buckets.max(1);
    if left.is_empty() || right.is_empty() {
        let (kept, other) = if left.is_empty() { (right, left) } else { (left, right) };
        let mut merged = kept.clone();
        merged.id = left.id;
        merged.null_count = left.null_count + right.null_count;
        merged.tot_col_size = left.tot_col_size + right.tot_col_size;
        merged.last_update_version = left.last_update_version.max(right.last_update_version);
        merged.ndv = kept.ndv + other.ndv;
        merged.pre_calculate_scalar();
        return merged;
    }

    let mut combined: Vec<Atom> = Vec::with_capacity((left.len() + right.len()) * 2);
    for atom in atoms(left)
        .into_iter()
        .merge_by(atoms(right), |a, b| (&a.upper, a.point) <= (&b.upper, b.point))
    {
        match combined.last_mut() {
            Some(last) if last.point && atom.point && last.upper == atom.upper => {
                last.count += atom.count;
            }
            _ => combined.push(atom),
        }
    }

    let total: u64 = combined.iter().map(|a| a.count).sum();
    let mut merged = Histogram::new(
        left.id,
        left.ndv + right.ndv,
        left.null_count + right.null_count,
        left.last_update_version.max(right.last_update_version),
        left.tot_col_size + right.tot_col_size,
    );

    let mut remaining = total;
    let mut slots = num_buckets;
    let mut depth = remaining as f64 / slots as f64;
    let mut cumulative = 0u64;
    let mut open: Option<OpenBucket> = None;
    for atom in combined {
        if let Some(cur) = open.as_mut() {
            if atom.point && atom.upper == cur.upper {
                cur.count += atom.count;
                cur.repeat += atom.count;
                continue;
            }
            if cur.count as f64 >= depth && slots > 1 {
                cumulative += cur.count;
                remaining -= cur.count;
                slots -= 1;
                depth = remaining as f64 / slots as f64;
                if let Some(done) = open.take() {
                    merged.append_bucket(done.lower, done.upper, cumulative, done.repeat);
                }
            }
        }
        match open.as_mut() {
            Some(cur) => {
                cur.upper = atom.upper;
                cur.count += atom.count;
                cur.repeat = if atom.point { atom.count } else { 0 };
            }
            None => {
                let lower = match merged.max_value() {
                    Some(prev) if *prev > atom.lower => prev.clone(),
                    _ => atom.lower,
                };
                open = Some(OpenBucket {
                    lower,
                    upper: atom.upper,
                    count: atom.count,
                    repeat: if atom.point { atom.count } else { 0 },
                });
            }
        }
    }
    if let Some(done) = open {
        cumulative += done.count;
        merged.append_bucket(done.lower, done.upper, cumulative, done.repeat);
    }

    let (l_rows, r_rows) = (left.not_null_count(), right.not_null_count());
    if l_rows + r_rows > 0.0 {
        merged.correlation =
            (left.correlation * l_rows + right.correlation * r_rows) / (l_rows + r_rows);
    }
    merged.pre_calculate_scalar();
    debug!(
        buckets = merged.len(),
        ndv = merged.ndv,
        "merged histograms"
    );
    merged
}
