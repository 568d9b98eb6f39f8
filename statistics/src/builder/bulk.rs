//! Histogram and TopN construction from an unordered sample.

use std::collections::BTreeSet;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::codec::encode_key;
use crate::histogram::Histogram;
use crate::sample::SampleItem;
use crate::topn::{prune_topn_items, TopN, TopNMeta};

/// Sizes of the population a sample was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Population {
    pub not_null_count: i64,
    pub null_count: i64,
    pub ndv: i64,
    pub tot_col_size: i64,
}

/// Builds buckets over `samples`, which must be sorted by value.
///
/// Every sample stands for `count / samples.len()` rows. A value seen once in
/// the sample only claims `count / ndv` rows for its repeat, since it might
/// be rare in the table.
pub fn build_hist(hist: &mut Histogram, samples: &[SampleItem], count: i64, ndv: i64, num_buckets: usize) {
    let Some(first) = samples.first() else {
        return;
    };
    let sample_num = samples.len() as f64;
    let sample_factor = count as f64 / sample_num;
    let ndv_factor = if ndv > 0 {
        (count as f64 / ndv as f64).min(sample_factor)
    } else {
        sample_factor
    };
    let values_per_bucket = count as f64 / num_buckets.max(1) as f64 + sample_factor;

    let mut bucket_idx = 0;
    let mut last_count = 0u64;
    hist.append_bucket(
        first.value.clone(),
        first.value.clone(),
        sample_factor as u64,
        ndv_factor as u64,
    );
    for (i, item) in samples.iter().enumerate().skip(1) {
        let total_count = (i + 1) as f64 * sample_factor;
        let bucket = &mut hist.buckets_mut()[bucket_idx];
        if bucket.upper == item.value {
            bucket.count = total_count as u64;
            if bucket.repeat == ndv_factor as u64 {
                bucket.repeat = (2.0 * sample_factor) as u64;
            } else {
                bucket.repeat += sample_factor as u64;
            }
        } else if total_count - last_count as f64 <= values_per_bucket {
            hist.update_last_bucket(item.value.clone(), total_count as u64, ndv_factor as u64, false);
        } else {
            last_count = bucket.count;
            bucket_idx += 1;
            hist.append_bucket(
                item.value.clone(),
                item.value.clone(),
                total_count as u64,
                ndv_factor as u64,
            );
        }
    }
}

/// Pearson correlation between the sorted position of each sample and its
/// position in the scan.
pub fn calc_correlation(sorted: &[SampleItem]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return 1.0;
    }
    // Scan positions become ranks 0..n so both axes share one distribution.
    let mut ranks = vec![0usize; n];
    for (rank, (pos, _)) in sorted
        .iter()
        .enumerate()
        .sorted_by_key(|(_, item)| item.ordinal)
        .enumerate()
    {
        ranks[pos] = rank;
    }
    let xy_sum: f64 = ranks
        .iter()
        .enumerate()
        .map(|(i, &rank)| i as f64 * rank as f64)
        .sum();
    let items = n as f64;
    let x_sum = (items - 1.0) * items / 2.0;
    let x2_sum = (items - 1.0) * items * (2.0 * items - 1.0) / 6.0;
    let corr = (items * xy_sum - x_sum * x_sum) / (items * x2_sum - x_sum * x_sum);
    if corr.is_nan() {
        0.0
    } else {
        corr.clamp(-1.0, 1.0)
    }
}

/// Extracts significant frequent values from `samples` and builds the
/// histogram over what remains.
///
/// TopN counts are scaled to the table. Returned histogram excludes TopN rows
/// and its `ndv` excludes TopN values.
pub fn build_hist_and_topn(
    id: i64,
    mut samples: Vec<SampleItem>,
    population: Population,
    num_buckets: usize,
    num_topn: usize,
) -> (Histogram, TopN) {
    let Population {
        not_null_count,
        null_count,
        ndv,
        tot_col_size,
    } = population;
    let ndv = ndv.min(not_null_count);
    if samples.is_empty() {
        if not_null_count > 0 {
            warn!(id, not_null_count, "empty sample for a non-empty column, skipping histogram");
        }
        return (Histogram::new(id, 0, null_count, 0, tot_col_size), TopN::default());
    }
    samples.sort_by(|a, b| a.value.cmp(&b.value));
    let correlation = calc_correlation(&samples);

    let sample_num = samples.len() as i64;
    let sample_factor = not_null_count as f64 / sample_num as f64;
    let candidates: Vec<TopNMeta> = samples
        .iter()
        .chunk_by(|item| item.value.clone())
        .into_iter()
        .map(|(value, run)| TopNMeta::new(encode_key(&[value]), run.count() as u64))
        .sorted_by(|a, b| b.count.cmp(&a.count).then_with(|| a.encoded.cmp(&b.encoded)))
        .take(num_topn)
        .collect();
    let kept = prune_topn_items(candidates, ndv, null_count, sample_num, not_null_count + null_count);

    let topn_keys: BTreeSet<&[u8]> = kept.iter().map(|t| t.encoded.as_slice()).collect();
    let samples: Vec<SampleItem> = samples
        .iter()
        .filter(|item| !topn_keys.contains(encode_key(std::slice::from_ref(&item.value)).as_slice()))
        .cloned()
        .collect();
    let topn = TopN::new(
        kept.iter()
            .map(|t| TopNMeta::new(t.encoded.clone(), (t.count as f64 * sample_factor).round() as u64)),
    );
    let topn_total = topn.total_count() as i64;
    let topn_num = topn.num() as i64;

    let hist_ndv = (ndv - topn_num).max(0);
    let mut hist = Histogram::new(id, hist_ndv, null_count, 0, tot_col_size);
    hist.correlation = correlation;
    if not_null_count <= topn_total || ndv <= topn_num || samples.is_empty() {
        debug!(id, topn = topn_num, "all sampled rows are covered by topn");
        hist.pre_calculate_scalar();
        return (hist, topn);
    }
    build_hist(&mut hist, &samples, not_null_count - topn_total, hist_ndv, num_buckets);
    hist.pre_calculate_scalar();
    debug!(
        id,
        buckets = hist.len(),
        ndv = hist.ndv,
        topn = topn_num,
        "built histogram from sample"
    );
    (hist, topn)
}
