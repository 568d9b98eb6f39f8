//! Row-count estimation over table statistics.
//!
//! All estimators are read-only, never fail and return a count in
//! `[0, realtime_count]`. Entries that are missing, evicted or belong to a
//! pseudo table are answered with fixed selectivities.

mod pseudo;
mod range;

pub use pseudo::{
    pseudo_column_row_count, pseudo_index_row_count, pseudo_int_handle_row_count, PSEUDO_BETWEEN_RATE,
    PSEUDO_EQUAL_RATE, PSEUDO_LESS_RATE,
};
pub use range::{split_int_ranges, Range};

use tracing::{debug, trace};

use crate::codec::{decode_key, encode_key, prefix_next};
use crate::datum::Datum;
use crate::histogram::Histogram;
use crate::table::{ColumnStats, HistColl, IndexStats, LoadStatus, StatsPayload};
use crate::topn::TopN;
use range::normalize_int_range;

/// Below this many distinct values, out-of-range equality assumes this many.
const OUT_OF_RANGE_MIN_NDV: i64 = 100;

/// Histogram rows of TopN values whose key satisfies `inside`. These rows
/// are already accounted for by the TopN count.
fn visible_topn_rows(
    hist: &Histogram,
    topn: &TopN,
    inside: impl Fn(&[u8]) -> bool,
    to_datum: impl Fn(&[u8]) -> Option<Datum>,
) -> f64 {
    topn.iter()
        .filter(|(key, _)| inside(key))
        .filter_map(|(key, count)| {
            let value = to_datum(key)?;
            let (repeat, matched) = hist.equal_row_count(&value, false);
            matched.then(|| repeat.min(count as f64))
        })
        .sum()
}

impl HistColl {
    fn usable_column(&self, id: i64) -> Option<&ColumnStats> {
        if self.pseudo {
            return None;
        }
        self.column(id).filter(|c| c.status.is_usable())
    }

    fn usable_index(&self, id: i64) -> Option<&IndexStats> {
        if self.pseudo {
            return None;
        }
        self.index(id).filter(|i| i.status.is_usable())
    }

    fn clamp_to_table(&self, count: f64) -> f64 {
        if count.is_nan() {
            return 0.0;
        }
        count.clamp(0.0, self.realtime_count.max(0) as f64)
    }

    /// Equality on a value above or below everything the statistics saw.
    /// Only rows added since the build can match.
    fn out_of_range_equal_count(&self, payload: &StatsPayload) -> f64 {
        let total = payload.total_row_count();
        let increase = self.realtime_count as f64 - total;
        if increase <= 0.0 || total <= 0.0 {
            return 0.0;
        }
        let ndv = payload.ndv().max(OUT_OF_RANGE_MIN_NDV) as f64;
        let mut selectivity = 1.0 / ndv;
        if selectivity * total > increase {
            selectivity = increase / total;
        }
        selectivity * total
    }

    /// Rows equal to `value` as seen at build time. The flag is set when the
    /// count already describes the current table.
    fn column_equal_row_count(&self, payload: &StatsPayload, status: LoadStatus, value: &Datum) -> (f64, bool) {
        if value.is_null() {
            return (payload.histogram.null_count as f64, false);
        }
        let key = encode_key(std::slice::from_ref(value));
        if let Some(count) = payload.topn.query(&key) {
            return (count as f64, false);
        }
        let hist = &payload.histogram;
        if hist.out_of_range(value) {
            return (self.out_of_range_equal_count(payload), true);
        }
        if status.has_cm_sketch() {
            if let Some(cm) = payload.cm_sketch.as_ref() {
                return (cm.query_bytes(&key) as f64, false);
            }
        }
        (hist.equal_row_count(value, true).0, false)
    }

    /// Estimated rows of column `column_id` equal to `value`.
    pub fn equality_estimate(&self, column_id: i64, value: &Datum) -> f64 {
        let Some(stats) = self.usable_column(column_id) else {
            debug!(column = column_id, "no statistics, using pseudo equality");
            let rows = self.realtime_count as f64;
            return self.clamp_to_table(rows / PSEUDO_EQUAL_RATE);
        };
        let payload = &stats.payload;
        let (count, current) = self.column_equal_row_count(payload, stats.status, value);
        let count = count.clamp(0.0, payload.total_row_count());
        if current {
            return self.clamp_to_table(count);
        }
        self.clamp_to_table(count * self.increase_factor(payload.total_row_count()))
    }

    /// Estimated rows of column `column_id` inside any of `ranges`.
    pub fn range_estimate(&self, column_id: i64, ranges: &[Range]) -> f64 {
        let Some(stats) = self.usable_column(column_id) else {
            debug!(column = column_id, "no statistics, using pseudo ranges");
            return self.clamp_to_table(pseudo_column_row_count(self.realtime_count as f64, ranges));
        };
        self.column_row_count(stats, ranges, stats.info.is_handle)
    }

    /// Estimated rows of the integer primary key `column_id` inside any of
    /// `ranges`.
    pub fn int_handle_range_estimate(&self, column_id: i64, ranges: &[Range]) -> f64 {
        let stats = self.usable_column(column_id);
        let unsigned = self
            .column(column_id)
            .is_some_and(|c| c.info.field_type.is_unsigned());
        let normalized: Vec<Range> = ranges.iter().filter_map(normalize_int_range).collect();
        let ranges = split_int_ranges(&normalized, unsigned);
        match stats {
            Some(stats) => self.column_row_count(stats, &ranges, true),
            None => {
                debug!(column = column_id, "no statistics, using pseudo handle ranges");
                self.clamp_to_table(pseudo_int_handle_row_count(self.realtime_count as f64, &ranges))
            }
        }
    }

    fn column_row_count(&self, stats: &ColumnStats, ranges: &[Range], is_handle: bool) -> f64 {
        let payload = &stats.payload;
        let hist = &payload.histogram;
        let topn = &payload.topn;
        let total = payload.total_row_count();
        let increase = self.increase_factor(total);
        let equal = |value: &Datum| self.column_equal_row_count(payload, stats.status, value).0;

        let mut row_count = 0.0;
        for range in ranges {
            let low = range.low_value();
            let high = range.high_value();
            if low == high && !low.is_sentinel() {
                if range.low_exclude || range.high_exclude {
                    continue;
                }
                if low.is_null() {
                    row_count += hist.null_count as f64;
                    continue;
                }
                if is_handle {
                    row_count += 1.0;
                    continue;
                }
                let (count, current) = self.column_equal_row_count(payload, stats.status, low);
                row_count += if current { count } else { count * increase };
                continue;
            }
            if high < low {
                continue;
            }

            let mut count = hist.between_row_count(low, high) + topn.between_datums(low, high) as f64;
            count -= visible_topn_rows(
                hist,
                topn,
                |key| {
                    decode_key(key)
                        .ok()
                        .and_then(|d| d.into_iter().next())
                        .is_some_and(|d| *low < d && d < *high)
                },
                |key| decode_key(key).ok()?.into_iter().next(),
            );
            if range.low_exclude && !low.is_sentinel() && !low.is_null() {
                count -= equal(low);
            }
            if low.is_null() && !range.low_exclude {
                count += hist.null_count as f64;
            }
            if !range.high_exclude && !high.is_sentinel() {
                count += equal(high);
            }
            let mut count = count.clamp(0.0, total) * increase;
            let low_out = !low.is_null() && hist.out_of_range(low);
            if low_out || hist.out_of_range(high) {
                let low = if low.is_null() { &Datum::MinNotNull } else { low };
                count += hist.out_of_range_row_count(low, high, self.modify_count);
            }
            trace!(column = stats.info.id, ?low, ?high, count, "column range estimate");
            row_count += count;
        }
        self.clamp_to_table(row_count)
    }

    /// Estimated rows of index `index_id` inside any of `ranges`.
    ///
    /// Returns the count against the statistics as built, and the count
    /// corrected for rows added since.
    pub fn index_range_estimate(&self, index_id: i64, ranges: &[Range]) -> (f64, f64) {
        let Some(stats) = self.usable_index(index_id) else {
            debug!(index = index_id, "no statistics, using pseudo index ranges");
            let column_count = self.index(index_id).map_or(1, |i| i.info.column_count);
            let count = self.clamp_to_table(pseudo_index_row_count(self.realtime_count as f64, ranges, column_count));
            return (count, count);
        };
        let info = &stats.info;
        let payload = &stats.payload;
        let hist = &payload.histogram;
        let topn = &payload.topn;
        let total = payload.total_row_count();
        let increase = self.increase_factor(total);

        let (mut raw, mut corrected) = (0.0, 0.0);
        for range in ranges {
            let full_length = range.low.len() == info.column_count;
            if full_length && range.is_point() {
                if info.unique && !range.low.iter().any(Datum::is_null) {
                    raw += 1.0;
                    corrected += 1.0;
                    continue;
                }
                let key = encode_key(&range.low);
                let count = self.index_equal_row_count(stats, &key);
                raw += count;
                corrected += count * increase;
                continue;
            }

            let mut lower = encode_key(&range.low);
            if range.low_exclude {
                lower = prefix_next(&lower);
            }
            let mut upper = encode_key(&range.high);
            if !range.high_exclude {
                upper = prefix_next(&upper);
            }
            if upper <= lower {
                continue;
            }
            let (low, high) = (Datum::Bytes(lower.clone()), Datum::Bytes(upper.clone()));
            let mut count = hist.between_row_count(&low, &high) + topn.between_count(&lower, &upper) as f64;
            count -= visible_topn_rows(
                hist,
                topn,
                |key| lower.as_slice() < key && key < upper.as_slice(),
                |key| Some(Datum::Bytes(key.to_vec())),
            );
            if info.column_count == 1 && range.low_value().is_null() && !range.low_exclude {
                count += hist.null_count as f64;
            }
            let count = count.clamp(0.0, total);
            raw += count;
            let mut adjusted = count * increase;
            if hist.out_of_range(&low) || hist.out_of_range(&high) {
                adjusted += hist.out_of_range_row_count(&low, &high, self.modify_count);
            }
            corrected += adjusted;
        }
        (self.clamp_to_table(raw), self.clamp_to_table(corrected))
    }

    fn index_equal_row_count(&self, stats: &IndexStats, key: &[u8]) -> f64 {
        let payload = &stats.payload;
        if let Some(count) = payload.topn.query(key) {
            return count as f64;
        }
        if stats.status.has_cm_sketch() {
            if let Some(cm) = payload.cm_sketch.as_ref() {
                return cm.query_bytes(key) as f64;
            }
        }
        payload.histogram.equal_row_count(&Datum::Bytes(key.to_vec()), true).0
    }
}
