//! Scan-time collection: reservoir samples, distinct sketches and frequency
//! sketches over a stream of values.

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snafu::{ensure, ResultExt};
use synopses::distinct::FmSketch;
use synopses::frequent::CountMinSketch;
use tracing::debug;

use crate::builder::SortedBuilder;
use crate::codec::encode_key;
use crate::config::StatsConfig;
use crate::datum::Datum;
use crate::error::{RecordWidthSnafu, SketchSnafu, SourceReadSnafu};
use crate::Result;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Reservoir RNG, reproducible when a seed is given.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// A sampled value and its row position in the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleItem {
    pub value: Datum,
    pub ordinal: u64,
}

impl SampleItem {
    pub fn new(value: Datum, ordinal: u64) -> Self {
        Self { value, ordinal }
    }
}

/// Per-column scan state: a bounded uniform sample of the non-null values
/// plus sketches over all of them.
#[derive(Debug, Clone)]
pub struct SampleCollector {
    samples: Vec<SampleItem>,
    max_sample_size: usize,
    /// Rows seen, nulls included.
    count: u64,
    null_count: u64,
    /// Non-null values offered to the reservoir.
    seen: u64,
    total_size: u64,
    fm_sketch: FmSketch,
    cm_sketch: Option<CountMinSketch>,
}

impl SampleCollector {
    pub fn new(max_sample_size: usize, max_fm_sketch_size: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_sample_size.min(1 << 14)),
            max_sample_size: max_sample_size.max(1),
            count: 0,
            null_count: 0,
            seen: 0,
            total_size: 0,
            fm_sketch: FmSketch::new(max_fm_sketch_size),
            cm_sketch: None,
        }
    }

    /// Also maintains a count-min sketch over every non-null value.
    pub fn with_cm_sketch(mut self, depth: usize, width: usize) -> Result<Self> {
        self.cm_sketch = Some(CountMinSketch::new(depth, width).context(SketchSnafu)?);
        Ok(self)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    pub fn not_null_count(&self) -> u64 {
        self.count - self.null_count
    }

    /// Summed in-memory size of the non-null values.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn samples(&self) -> &[SampleItem] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<SampleItem> {
        self.samples
    }

    /// Estimated distinct non-null values.
    pub fn ndv(&self) -> u64 {
        self.fm_sketch.ndv()
    }

    pub fn fm_sketch(&self) -> &FmSketch {
        &self.fm_sketch
    }

    pub fn cm_sketch(&self) -> Option<&CountMinSketch> {
        self.cm_sketch.as_ref()
    }

    pub fn take_cm_sketch(&mut self) -> Option<CountMinSketch> {
        self.cm_sketch.take()
    }

    /// Offers the next row's value.
    ///
    /// Once the reservoir is full, the value replaces a random slot with
    /// probability `max_sample_size / seen`, which keeps every non-null value
    /// equally likely to be retained.
    pub fn collect<R: Rng + ?Sized>(&mut self, value: Datum, rng: &mut R) {
        let ordinal = self.count;
        self.count += 1;
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        self.total_size += value.mem_size() as u64;
        let key = encode_key(std::slice::from_ref(&value));
        self.fm_sketch.insert(key.as_slice());
        if let Some(cm) = self.cm_sketch.as_mut() {
            cm.insert_bytes(&key);
        }
        self.seen += 1;
        if self.samples.len() < self.max_sample_size {
            self.samples.push(SampleItem::new(value, ordinal));
        } else if rng.random_range(0..self.seen) < self.max_sample_size as u64 {
            let slot = rng.random_range(0..self.samples.len());
            self.samples[slot] = SampleItem::new(value, ordinal);
        }
    }

    /// Absorbs a collector that scanned the rows following this one.
    ///
    /// Counts add and sketches merge. The two reservoirs are combined by
    /// weighted sampling without replacement, each sample weighted by the
    /// number of values it stands for, so the result stays uniform over the
    /// concatenated stream.
    pub fn merge<R: Rng + ?Sized>(&mut self, other: &SampleCollector, rng: &mut R) -> Result<()> {
        let offset = self.count;
        let weight = |seen: u64, len: usize| if len == 0 { 0.0 } else { seen as f64 / len as f64 };
        let (own_weight, other_weight) = (
            weight(self.seen, self.samples.len()),
            weight(other.seen, other.samples.len()),
        );

        self.count += other.count;
        self.null_count += other.null_count;
        self.seen += other.seen;
        self.total_size += other.total_size;
        self.fm_sketch.merge(&other.fm_sketch);
        self.cm_sketch = match (self.cm_sketch.take(), other.cm_sketch.as_ref()) {
            (Some(mut own), Some(theirs)) => {
                own.merge(theirs).context(SketchSnafu)?;
                Some(own)
            }
            // A sketch that missed part of the stream would underestimate.
            _ => None,
        };

        let combined = std::mem::take(&mut self.samples)
            .into_iter()
            .map(|item| (item, own_weight))
            .chain(
                other
                    .samples
                    .iter()
                    .map(|item| (SampleItem::new(item.value.clone(), item.ordinal + offset), other_weight)),
            );
        let max = self.max_sample_size;
        self.samples = combined
            .map(|(item, w)| {
                let key = rng.random::<f64>().powf(1.0 / w.max(f64::MIN_POSITIVE));
                (key, item)
            })
            .sorted_by(|a, b| b.0.total_cmp(&a.0))
            .take(max)
            .map(|(_, item)| item)
            .collect();
        Ok(())
    }
}

/// Runs one column's value stream through a fresh collector.
///
/// The stream is consumed exactly once. A read error aborts collection and
/// the partial collector is dropped.
pub fn collect_column_stats<I, E, R>(
    records: I,
    max_sample_size: usize,
    max_fm_sketch_size: usize,
    rng: &mut R,
) -> Result<SampleCollector>
where
    I: IntoIterator<Item = std::result::Result<Datum, E>>,
    E: Into<BoxedError>,
    R: Rng + ?Sized,
{
    let mut collector = SampleCollector::new(max_sample_size, max_fm_sketch_size);
    for record in records {
        let value = record.map_err(Into::<BoxedError>::into).context(SourceReadSnafu)?;
        collector.collect(value, rng);
    }
    debug!(
        count = collector.count(),
        nulls = collector.null_count(),
        samples = collector.samples().len(),
        ndv = collector.ndv(),
        "collected column sample"
    );
    Ok(collector)
}

/// Collects samples for every column of a table in one scan.
///
/// When a primary key is set, the first value of each record is the key.
/// Rows arrive in key order, so it goes to a [`SortedBuilder`] instead of a
/// reservoir.
pub struct SampleBuilder {
    collectors: Vec<SampleCollector>,
    pk_builder: Option<SortedBuilder>,
    rng: StdRng,
}

impl SampleBuilder {
    pub fn new(config: &StatsConfig, num_columns: usize, pk_id: Option<i64>) -> Result<Self> {
        let collectors = (0..num_columns)
            .map(|_| {
                SampleCollector::new(config.max_sample_size, config.max_fm_sketch_size)
                    .with_cm_sketch(config.cm_sketch_depth, config.cm_sketch_width)
            })
            .collect::<Result<Vec<_>>>()?;
        let pk_builder = pk_id.map(|id| SortedBuilder::new(config.num_buckets, id, true));
        Ok(Self {
            collectors,
            pk_builder,
            rng: make_rng(config.sample_seed),
        })
    }

    fn width(&self) -> usize {
        self.collectors.len() + usize::from(self.pk_builder.is_some())
    }

    pub fn collect_record(&mut self, record: Vec<Datum>) -> Result<()> {
        ensure!(
            record.len() == self.width(),
            RecordWidthSnafu {
                expected: self.width(),
                actual: record.len(),
            }
        );
        let mut values = record.into_iter();
        if let Some(pk) = self.pk_builder.as_mut() {
            if let Some(key) = values.next() {
                pk.iterate(key)?;
            }
        }
        for (collector, value) in self.collectors.iter_mut().zip(values) {
            collector.collect(value, &mut self.rng);
        }
        Ok(())
    }

    /// Consumes the whole record stream.
    pub fn collect<I, E>(mut self, records: I) -> Result<(Vec<SampleCollector>, Option<SortedBuilder>)>
    where
        I: IntoIterator<Item = std::result::Result<Vec<Datum>, E>>,
        E: Into<BoxedError>,
    {
        for record in records {
            let record = record.map_err(Into::<BoxedError>::into).context(SourceReadSnafu)?;
            self.collect_record(record)?;
        }
        Ok((self.collectors, self.pk_builder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn ints(values: impl IntoIterator<Item = i64>) -> impl Iterator<Item = std::result::Result<Datum, Infallible>> {
        values.into_iter().map(|v| Ok(Datum::Int(v)))
    }

    #[test]
    fn reservoir_is_bounded() {
        let mut rng = make_rng(Some(7));
        let collector = collect_column_stats(ints(0..10_000), 100, 1000, &mut rng).unwrap();
        assert_eq!(collector.count(), 10_000);
        assert_eq!(collector.samples().len(), 100);
        assert!(collector.samples().iter().all(|s| s.value == Datum::Int(s.ordinal as i64)));
    }

    #[test]
    fn small_stream_is_kept_whole() {
        let mut rng = make_rng(Some(7));
        let collector = collect_column_stats(ints(0..50), 100, 1000, &mut rng).unwrap();
        assert_eq!(collector.samples().len(), 50);
        assert_eq!(collector.ndv(), 50);
        assert_eq!(collector.total_size(), 400);
    }

    #[test]
    fn reservoir_is_uniform() {
        // Late values must be as likely to survive as early ones.
        let mut late = 0;
        for seed in 0..50 {
            let mut rng = make_rng(Some(seed));
            let collector = collect_column_stats(ints(0..1000), 100, 1000, &mut rng).unwrap();
            late += collector.samples().iter().filter(|s| s.ordinal >= 500).count();
        }
        // 50 runs * 100 slots, half expected from the second half.
        assert!((2000..3000).contains(&late), "late = {late}");
    }

    #[test]
    fn same_seed_same_sample() {
        let run = || {
            let mut rng = make_rng(Some(42));
            collect_column_stats(ints(0..5000), 64, 1000, &mut rng)
                .unwrap()
                .into_samples()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn nulls_are_counted_not_sampled() {
        let mut rng = make_rng(Some(1));
        let values = vec![Ok::<_, Infallible>(Datum::Null), Ok(Datum::Int(1)), Ok(Datum::Null)];
        let collector = collect_column_stats(values, 10, 10, &mut rng).unwrap();
        assert_eq!(collector.count(), 3);
        assert_eq!(collector.null_count(), 2);
        assert_eq!(collector.not_null_count(), 1);
        assert_eq!(collector.samples(), &[SampleItem::new(Datum::Int(1), 1)]);
    }

    #[test]
    fn read_failure_propagates() {
        let mut rng = make_rng(Some(1));
        let values: Vec<std::result::Result<Datum, std::io::Error>> = vec![
            Ok(Datum::Int(1)),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated")),
        ];
        let err = collect_column_stats(values, 10, 10, &mut rng).unwrap_err();
        assert!(matches!(err, crate::Error::SourceRead { .. }));
    }

    #[test]
    fn merge_offsets_ordinals_and_combines_sketches() {
        let mut rng = make_rng(Some(3));
        let mut left = SampleCollector::new(10, 100).with_cm_sketch(4, 64).unwrap();
        let mut right = SampleCollector::new(10, 100).with_cm_sketch(4, 64).unwrap();
        for v in 0..5 {
            left.collect(Datum::Int(v), &mut rng);
            right.collect(Datum::Int(v + 5), &mut rng);
        }
        right.collect(Datum::Null, &mut rng);
        left.merge(&right, &mut rng).unwrap();
        assert_eq!(left.count(), 11);
        assert_eq!(left.null_count(), 1);
        assert_eq!(left.ndv(), 10);
        assert_eq!(left.fm_sketch().estimate(), 10.0);
        assert_eq!(left.samples().len(), 10);
        assert!(left.samples().iter().all(|s| s.value == Datum::Int(s.ordinal as i64)));
        let cm = left.cm_sketch().unwrap();
        assert_eq!(cm.total_count(), 10);
    }

    #[test]
    fn merge_truncates_to_capacity() {
        let mut rng = make_rng(Some(3));
        let mut left = SampleCollector::new(8, 100);
        let mut right = SampleCollector::new(8, 100);
        for v in 0..100 {
            left.collect(Datum::Int(v), &mut rng);
            right.collect(Datum::Int(v), &mut rng);
        }
        left.merge(&right, &mut rng).unwrap();
        assert_eq!(left.samples().len(), 8);
        assert_eq!(left.count(), 200);
        assert!(left.cm_sketch().is_none());
    }

    #[test]
    fn sample_builder_splits_primary_key() {
        let config = StatsConfig {
            sample_seed: Some(9),
            ..StatsConfig::default()
        };
        let builder = SampleBuilder::new(&config, 2, Some(1)).unwrap();
        let records = (0..100).map(|i| {
            Ok::<_, Infallible>(vec![
                Datum::Int(i),
                Datum::Int(i % 10),
                if i % 4 == 0 { Datum::Null } else { Datum::from("x") },
            ])
        });
        let (collectors, pk) = builder.collect(records).unwrap();
        assert_eq!(collectors.len(), 2);
        assert_eq!(collectors[0].ndv(), 10);
        assert_eq!(collectors[1].null_count(), 25);
        let (count, hist) = pk.unwrap().finish();
        assert_eq!(count, 100);
        assert_eq!(hist.ndv, 100);
    }

    #[test]
    fn sample_builder_rejects_short_records() {
        let mut builder = SampleBuilder::new(&StatsConfig::default(), 2, None).unwrap();
        let err = builder.collect_record(vec![Datum::Int(1)]).unwrap_err();
        assert!(matches!(err, crate::Error::RecordWidth { expected: 2, actual: 1 }));
    }
}
