//! Explicit most-frequent values, keyed by their encoded form.

use std::collections::BTreeMap;
use std::ops::Bound;

use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::{decode_key, encode_key};
use crate::datum::Datum;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopNMeta {
    pub encoded: Vec<u8>,
    pub count: u64,
}

impl TopNMeta {
    pub fn new(encoded: Vec<u8>, count: u64) -> Self {
        Self { encoded, count }
    }

    /// Decodes a single-column entry back into its value.
    pub fn datum(&self) -> Option<Datum> {
        decode_key(&self.encoded).ok()?.into_iter().next()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopN {
    values: BTreeMap<Vec<u8>, u64>,
}

impl TopN {
    pub fn new(metas: impl IntoIterator<Item = TopNMeta>) -> Self {
        let mut values = BTreeMap::new();
        for meta in metas {
            *values.entry(meta.encoded).or_insert(0) += meta.count;
        }
        Self { values }
    }

    pub fn query(&self, encoded: &[u8]) -> Option<u64> {
        self.values.get(encoded).copied()
    }

    pub fn query_datum(&self, value: &Datum) -> Option<u64> {
        self.query(&encode_key(std::slice::from_ref(value)))
    }

    /// Total count of the keys in `[lower, upper)`.
    pub fn between_count(&self, lower: &[u8], upper: &[u8]) -> u64 {
        if lower >= upper {
            return 0;
        }
        self.values
            .range::<[u8], _>((Bound::Included(lower), Bound::Excluded(upper)))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Sum of counts and number of entries whose key satisfies `predicate`.
    pub fn count_with(&self, predicate: impl Fn(&[u8]) -> bool) -> (u64, usize) {
        self.values
            .iter()
            .filter(|(k, _)| predicate(k.as_slice()))
            .fold((0, 0), |(acc_count, acc_num), (_, count)| {
                (acc_count + count, acc_num + 1)
            })
    }

    /// Total count of single-column entries whose value lies in `[lower, upper)`.
    pub fn between_datums(&self, lower: &Datum, upper: &Datum) -> u64 {
        if lower >= upper {
            return 0;
        }
        self.count_with(|key| {
            decode_key(key)
                .ok()
                .and_then(|d| d.into_iter().next())
                .is_some_and(|d| *lower <= d && d < *upper)
        })
        .0
    }

    pub fn total_count(&self) -> u64 {
        self.values.values().sum()
    }

    pub fn num(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u64)> {
        self.values.iter().map(|(k, v)| (k.as_slice(), *v))
    }

    /// Entries by descending count, ties broken by key.
    pub fn sorted_by_count(&self) -> Vec<TopNMeta> {
        self.values
            .iter()
            .map(|(k, v)| TopNMeta::new(k.clone(), *v))
            .sorted_by(|a, b| b.count.cmp(&a.count).then_with(|| a.encoded.cmp(&b.encoded)))
            .collect()
    }
}

/// Drops trailing candidates whose frequency is indistinguishable from an
/// average value outside the list.
///
/// `topns` must be sorted by descending count; counts are sample counts.
/// Sampling without replacement makes the frequency of a non-TopN value
/// hypergeometric, so a candidate survives when its count exceeds the
/// expected count of such a value by more than two standard deviations.
/// Once one candidate survives, every more frequent one survives too.
pub fn prune_topn_items(
    topns: Vec<TopNMeta>,
    ndv: i64,
    null_count: i64,
    sample_rows: i64,
    total_rows: i64,
) -> Vec<TopNMeta> {
    if topns.len() <= 1 || sample_rows <= 0 || total_rows <= 0 {
        return topns;
    }
    let n = sample_rows as f64;
    let big_n = total_rows as f64;
    let fpc = if total_rows > 1 {
        ((big_n - n) / (big_n - 1.0)).max(0.0)
    } else {
        0.0
    };

    // Everything in the list except the candidate being tested.
    let mut sum_others: u64 = topns[..topns.len() - 1].iter().map(|t| t.count).sum();
    let mut kept = topns.len();
    while kept > 0 {
        let candidate = topns[kept - 1].count as f64;
        let mut sel = (1.0 - sum_others as f64 / n - null_count as f64 / big_n).clamp(0.0, 1.0);
        let other_ndv = ndv as f64 - (kept as f64 - 1.0);
        if other_ndv > 1.0 {
            sel /= other_ndv;
        }
        let stddev = (n * sel * (1.0 - sel) * fpc).sqrt();
        if candidate > n * sel + 2.0 * stddev {
            break;
        }
        trace!(candidate, sel, stddev, "pruned topn candidate");
        kept -= 1;
        if kept == 0 {
            break;
        }
        sum_others -= topns[kept - 1].count;
    }
    let mut topns = topns;
    topns.truncate(kept);
    topns
}

/// Merges per-partition TopN lists into one list of at most `n` entries.
///
/// Entries that do not make the cut are returned so the caller can fold
/// them back into the merged histogram.
pub fn merge_partition_topn(topns: &[TopN], n: usize) -> (TopN, Vec<TopNMeta>) {
    let mut counter: HashMap<&[u8], u64> = HashMap::new();
    for topn in topns {
        for (key, count) in topn.iter() {
            *counter.entry(key).or_insert(0) += count;
        }
    }
    let mut sorted: Vec<TopNMeta> = counter
        .into_iter()
        .map(|(k, v)| TopNMeta::new(k.to_vec(), v))
        .sorted_by(|a, b| b.count.cmp(&a.count).then_with(|| a.encoded.cmp(&b.encoded)))
        .collect();
    let leftovers = if sorted.len() > n {
        sorted.split_off(n)
    } else {
        Vec::new()
    };
    (TopN::new(sorted), leftovers)
}
