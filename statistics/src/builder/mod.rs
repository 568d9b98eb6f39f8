//! Turns collected samples and sorted scans into finished statistics.

pub mod bulk;
mod sorted;

use std::collections::BTreeSet;

use snafu::{ensure, ResultExt};
use synopses::frequent::CountMinSketch;
use tracing::{debug, warn};

pub use bulk::{build_hist, build_hist_and_topn, calc_correlation, Population};
pub use sorted::SortedBuilder;

use crate::codec::{decode_key, encode_key};
use crate::config::StatsConfig;
use crate::datum::Datum;
use crate::error::{RecordWidthSnafu, SketchSnafu, SourceReadSnafu};
use crate::histogram::{merge_histograms, Histogram};
use crate::sample::SampleCollector;
use crate::table::{ColumnInfo, ColumnStats, IndexInfo, IndexStats, StatsPayload};
use crate::topn::{merge_partition_topn, prune_topn_items, TopN, TopNMeta};
use crate::Result;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Builds column and index statistics with one set of knobs.
#[derive(Debug, Clone)]
pub struct StatsBuilder {
    config: StatsConfig,
}

impl StatsBuilder {
    pub fn new(config: StatsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    fn new_cm_sketch(&self) -> Result<CountMinSketch> {
        CountMinSketch::new(self.config.cm_sketch_depth, self.config.cm_sketch_width).context(SketchSnafu)
    }

    /// Builds a column's histogram, TopN and count-min sketch from its
    /// sample.
    ///
    /// A count-min sketch carried by the collector saw every row and is kept
    /// as is. Otherwise one is built from the sample, scaled to the table.
    pub fn build_column(&self, info: ColumnInfo, mut collector: SampleCollector) -> Result<ColumnStats> {
        let population = Population {
            not_null_count: collector.not_null_count() as i64,
            null_count: collector.null_count() as i64,
            ndv: collector.ndv() as i64,
            tot_col_size: collector.total_size() as i64,
        };
        let full_sketch = collector.take_cm_sketch();
        let samples = collector.into_samples();
        let sampled_sketch = match full_sketch {
            Some(_) => None,
            None => {
                let mut cm = self.new_cm_sketch()?;
                let factor = if samples.is_empty() {
                    1.0
                } else {
                    population.not_null_count as f64 / samples.len() as f64
                };
                let weight = factor.round().max(1.0) as u64;
                for item in &samples {
                    cm.insert_bytes_by_count(&encode_key(std::slice::from_ref(&item.value)), weight);
                }
                Some(cm)
            }
        };

        let (histogram, topn) = build_hist_and_topn(
            info.id,
            samples,
            population,
            self.config.num_buckets,
            self.config.num_topn,
        );
        let cm_sketch = match (full_sketch, sampled_sketch) {
            (Some(cm), _) => cm,
            (None, Some(mut cm)) => {
                let ndv = population.ndv.min(population.not_null_count).max(0) as u64;
                cm.calc_default_value(ndv, topn.total_count(), topn.num() as u64);
                cm
            }
            (None, None) => self.new_cm_sketch()?,
        };
        debug!(
            column = info.id,
            ndv = histogram.ndv,
            topn = topn.num(),
            buckets = histogram.len(),
            "built column statistics"
        );
        Ok(ColumnStats::new(info, StatsPayload::new(histogram, topn, Some(cm_sketch))))
    }

    /// Builds index statistics from every index key in key order.
    ///
    /// Each record holds the index columns of one row. Histogram bounds are
    /// the encoded keys. Runs of equal keys compete for the TopN list and
    /// the survivors are taken out of the histogram.
    pub fn build_index<I, E>(&self, info: IndexInfo, records: I) -> Result<IndexStats>
    where
        I: IntoIterator<Item = std::result::Result<Vec<Datum>, E>>,
        E: Into<BoxedError>,
    {
        let num_topn = self.config.num_topn;
        let mut builder = SortedBuilder::new(self.config.num_buckets, info.id, true);
        let mut cm = self.new_cm_sketch()?;
        let mut candidates: Vec<TopNMeta> = Vec::new();
        let mut run: Option<TopNMeta> = None;
        let mut null_count = 0i64;

        let push_candidate = |candidates: &mut Vec<TopNMeta>, meta: TopNMeta| {
            candidates.push(meta);
            if candidates.len() > 2 * num_topn.max(1) {
                sort_candidates(candidates);
                candidates.truncate(num_topn);
            }
        };

        for record in records {
            let record = record.map_err(Into::<BoxedError>::into).context(SourceReadSnafu)?;
            ensure!(
                record.len() == info.column_count,
                RecordWidthSnafu {
                    expected: info.column_count,
                    actual: record.len(),
                }
            );
            if info.column_count == 1 && record[0].is_null() {
                null_count += 1;
                continue;
            }
            let key = encode_key(&record);
            cm.insert_bytes(&key);
            match run.as_mut() {
                Some(meta) if meta.encoded == key => meta.count += 1,
                _ => {
                    if let Some(done) = run.replace(TopNMeta::new(key.clone(), 1)) {
                        push_candidate(&mut candidates, done);
                    }
                }
            }
            builder.iterate(Datum::Bytes(key))?;
        }
        if let Some(done) = run.take() {
            push_candidate(&mut candidates, done);
        }
        sort_candidates(&mut candidates);
        candidates.truncate(num_topn);

        let (count, mut histogram) = builder.finish();
        histogram.null_count = null_count;
        let count = count as i64;
        let kept = prune_topn_items(candidates, histogram.ndv, null_count, count, count);
        for meta in &kept {
            histogram.remove_value_count(&Datum::Bytes(meta.encoded.clone()), meta.count);
        }
        histogram.ndv = (histogram.ndv - kept.len() as i64).max(0);
        let topn = TopN::new(kept);
        debug!(
            index = info.id,
            rows = count,
            ndv = histogram.ndv,
            topn = topn.num(),
            buckets = histogram.len(),
            "built index statistics"
        );
        Ok(IndexStats::new(info, StatsPayload::new(histogram, topn, Some(cm))))
    }

    /// Builds the histogram of an integer primary key from a key-ordered
    /// scan.
    pub fn build_handle<I, E>(&self, info: ColumnInfo, values: I) -> Result<ColumnStats>
    where
        I: IntoIterator<Item = std::result::Result<Datum, E>>,
        E: Into<BoxedError>,
    {
        let mut builder = SortedBuilder::new(self.config.num_buckets, info.id, true);
        for value in values {
            builder.iterate(value.map_err(Into::<BoxedError>::into).context(SourceReadSnafu)?)?;
        }
        Ok(self.finish_handle(info, builder))
    }

    /// Finishes a primary key histogram collected alongside other columns.
    pub fn finish_handle(&self, info: ColumnInfo, builder: SortedBuilder) -> ColumnStats {
        let (count, histogram) = builder.finish();
        debug!(
            column = info.id,
            rows = count,
            buckets = histogram.len(),
            "built handle statistics"
        );
        ColumnStats::new(info, StatsPayload::new(histogram, TopN::default(), None))
    }
}

fn sort_candidates(candidates: &mut [TopNMeta]) {
    candidates.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.encoded.cmp(&b.encoded)));
}

/// Combines the statistics of several partitions of one column or index.
///
/// A value in some partition's TopN is also looked up in the histograms of
/// the partitions that lack it, and moved out of them when it sits on a
/// bucket bound. TopN lists are then summed and cut to `num_topn`; the cut
/// entries go back into the merged histogram.
pub fn merge_partition_stats(
    parts: &[&StatsPayload],
    is_index: bool,
    num_buckets: usize,
    num_topn: usize,
) -> StatsPayload {
    let datum_of = |key: &[u8]| -> Option<Datum> {
        if is_index {
            Some(Datum::Bytes(key.to_vec()))
        } else {
            decode_key(key).ok()?.into_iter().next()
        }
    };
    let keys: BTreeSet<&[u8]> = parts
        .iter()
        .flat_map(|p| p.topn.iter().map(|(key, _)| key))
        .collect();

    let mut hists = Vec::with_capacity(parts.len());
    let mut topns = Vec::with_capacity(parts.len());
    for part in parts {
        let mut hist = part.histogram.clone();
        let mut metas: Vec<TopNMeta> = part
            .topn
            .iter()
            .map(|(key, count)| TopNMeta::new(key.to_vec(), count))
            .collect();
        for &key in &keys {
            if part.topn.query(key).is_some() {
                continue;
            }
            let Some(value) = datum_of(key) else {
                continue;
            };
            let (count, matched) = hist.equal_row_count(&value, false);
            if matched && count >= 1.0 {
                hist.remove_value_count(&value, count as u64);
                hist.ndv = (hist.ndv - 1).max(0);
                metas.push(TopNMeta::new(key.to_vec(), count as u64));
            }
        }
        hists.push(hist);
        topns.push(TopN::new(metas));
    }

    let (topn, leftovers) = merge_partition_topn(&topns, num_topn);
    let mut histogram = hists
        .into_iter()
        .reduce(|acc, h| merge_histograms(&acc, &h, num_buckets))
        .unwrap_or_else(|| Histogram::empty(0));
    for meta in &leftovers {
        if let Some(value) = datum_of(&meta.encoded) {
            histogram.add_value_count(&value, meta.count);
            histogram.ndv += 1;
        }
    }

    let sketches: Option<Vec<&CountMinSketch>> = parts.iter().map(|p| p.cm_sketch.as_ref()).collect();
    let cm_sketch = sketches.and_then(|sketches| {
        let (first, rest) = sketches.split_first()?;
        let mut merged = (*first).clone();
        for cm in rest {
            if let Err(error) = merged.merge(cm) {
                warn!(%error, "dropping count-min sketch of merged partitions");
                return None;
            }
        }
        Some(merged)
    });
    debug!(
        parts = parts.len(),
        topn = topn.num(),
        leftovers = leftovers.len(),
        "merged partition statistics"
    );
    StatsPayload::new(histogram, topn, cm_sketch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{collect_column_stats, make_rng};
    use crate::table::FieldType;
    use std::convert::Infallible;

    fn builder() -> StatsBuilder {
        StatsBuilder::new(StatsConfig {
            num_buckets: 16,
            num_topn: 8,
            sample_seed: Some(11),
            ..StatsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn build_column_from_full_sample() {
        // 0..100 once each, 42 another 412 times.
        let values = (0..100).chain(std::iter::repeat(42).take(412)).map(|v| Ok::<_, Infallible>(Datum::Int(v)));
        let mut rng = make_rng(Some(1));
        let collector = collect_column_stats(values, 10_000, 1000, &mut rng).unwrap();
        let stats = builder().build_column(ColumnInfo::new(1, FieldType::Int), collector).unwrap();
        let payload = &stats.payload;
        assert_eq!(payload.topn.query_datum(&Datum::Int(42)), Some(413));
        assert_eq!(payload.histogram.not_null_count(), 99.0);
        assert_eq!(payload.ndv(), 100);
        assert_eq!(payload.total_row_count(), 512.0);
        let cm = payload.cm_sketch.as_ref().unwrap();
        assert_eq!(cm.default_value(), 1);
        assert!(cm.query_bytes(&encode_key(&[Datum::Int(42)])) >= 413);
        assert!(payload.histogram.is_well_formed());
    }

    #[test]
    fn build_column_keeps_full_stream_sketch() {
        let mut rng = make_rng(Some(1));
        let mut collector = SampleCollector::new(10, 100).with_cm_sketch(4, 256).unwrap();
        for v in 0..1000 {
            collector.collect(Datum::Int(v % 50), &mut rng);
        }
        let stats = builder().build_column(ColumnInfo::new(1, FieldType::Int), collector).unwrap();
        let cm = stats.payload.cm_sketch.as_ref().unwrap();
        assert_eq!(cm.total_count(), 1000);
        assert_eq!(cm.depth(), 4);
        assert!(cm.query_bytes(&encode_key(&[Datum::Int(7)])) >= 20);
    }

    #[test]
    fn build_index_extracts_frequent_keys() {
        let info = IndexInfo {
            id: 3,
            unique: false,
            column_count: 2,
        };
        let mut rows: Vec<Vec<Datum>> = (0..212).map(|i| vec![Datum::Int(i), Datum::Int(0)]).collect();
        rows.extend(std::iter::repeat(vec![Datum::Int(500), Datum::from("hot")]).take(300));
        let stats = builder()
            .build_index(info, rows.into_iter().map(Ok::<_, Infallible>))
            .unwrap();
        let hot = encode_key(&[Datum::Int(500), Datum::from("hot")]);
        assert_eq!(stats.payload.topn.query(&hot), Some(300));
        assert_eq!(stats.payload.histogram.not_null_count(), 212.0);
        assert_eq!(stats.payload.histogram.ndv, 212);
        assert!(stats.payload.histogram.is_well_formed());
    }

    #[test]
    fn build_index_counts_single_column_nulls() {
        let info = IndexInfo {
            id: 3,
            unique: false,
            column_count: 1,
        };
        let rows = [Datum::Null, Datum::Null, Datum::Int(1), Datum::Int(2)]
            .into_iter()
            .map(|d| Ok::<_, Infallible>(vec![d]));
        let stats = builder().build_index(info, rows).unwrap();
        assert_eq!(stats.payload.histogram.null_count, 2);
        assert_eq!(stats.payload.total_row_count(), 4.0);
    }

    #[test]
    fn build_index_rejects_wrong_width() {
        let info = IndexInfo {
            id: 3,
            unique: false,
            column_count: 2,
        };
        let rows = vec![Ok::<_, Infallible>(vec![Datum::Int(1)])];
        let err = builder().build_index(info, rows).unwrap_err();
        assert!(matches!(err, crate::Error::RecordWidth { .. }));
    }

    #[test]
    fn build_handle_counts_rows() {
        let values = (0..1000).map(|v| Ok::<_, Infallible>(Datum::Int(v)));
        let stats = builder()
            .build_handle(ColumnInfo::handle(1, FieldType::Int), values)
            .unwrap();
        assert_eq!(stats.payload.total_row_count(), 1000.0);
        assert!(stats.payload.histogram.len() <= 16);
        assert!(stats.payload.cm_sketch.is_none());
    }

    #[test]
    fn merge_partitions_moves_bound_values_into_topn() {
        let key = |v: i64| encode_key(&[Datum::Int(v)]);
        let mut left_hist = Histogram::new(1, 10, 1, 0, 0);
        left_hist.append_bucket(Datum::Int(0), Datum::Int(9), 30, 5);
        left_hist.pre_calculate_scalar();
        let left = StatsPayload::new(left_hist, TopN::new(vec![TopNMeta::new(key(20), 40)]), None);

        let mut right_hist = Histogram::new(1, 10, 2, 0, 0);
        right_hist.append_bucket(Datum::Int(10), Datum::Int(20), 30, 6);
        right_hist.pre_calculate_scalar();
        let right = StatsPayload::new(right_hist, TopN::new(vec![TopNMeta::new(key(3), 25)]), None);

        let merged = merge_partition_stats(&[&left, &right], false, 4, 1);
        // 20 sits on the right bucket's upper bound: 40 + 6.
        assert_eq!(merged.topn.query(&key(20)), Some(46));
        assert_eq!(merged.topn.num(), 1);
        // 3 was cut and went back into the histogram.
        assert_eq!(merged.histogram.not_null_count(), 30.0 + 24.0 + 25.0);
        assert_eq!(merged.total_row_count(), 30.0 + 24.0 + 25.0 + 46.0 + 3.0);
        assert!(merged.histogram.is_well_formed());
    }
}
