//! Fixed-selectivity estimates for tables or entries without statistics.

use super::range::Range;
use crate::datum::Datum;

pub const PSEUDO_EQUAL_RATE: f64 = 1000.0;
pub const PSEUDO_LESS_RATE: f64 = 3.0;
pub const PSEUDO_BETWEEN_RATE: f64 = 40.0;

/// Rows matched by `ranges` over a column of a `rows`-row table.
pub fn pseudo_column_row_count(rows: f64, ranges: &[Range]) -> f64 {
    let count: f64 = ranges
        .iter()
        .map(|r| range_row_count(rows, r.low_value(), r.high_value()))
        .sum();
    count.clamp(0.0, rows.max(0.0))
}

fn range_row_count(rows: f64, low: &Datum, high: &Datum) -> f64 {
    let null_rows = rows / PSEUDO_EQUAL_RATE;
    match (low, high) {
        (Datum::Null, Datum::MaxValue) => rows,
        (Datum::MinNotNull, Datum::MaxValue) => rows - null_rows,
        (Datum::MinNotNull, _) => rows / PSEUDO_LESS_RATE - null_rows,
        (_, Datum::MaxValue) => rows / PSEUDO_LESS_RATE,
        _ if low == high => rows / PSEUDO_EQUAL_RATE,
        _ => rows / PSEUDO_BETWEEN_RATE,
    }
}

/// Rows matched by inclusive integer `ranges` over an integer primary key.
pub fn pseudo_int_handle_row_count(rows: f64, ranges: &[Range]) -> f64 {
    let count: f64 = ranges
        .iter()
        .map(|r| {
            let low = r.low_value();
            let high = r.high_value();
            let open_low = matches!(low, Datum::Null | Datum::MinNotNull);
            let open_high = matches!(high, Datum::MaxValue);
            match (open_low, open_high) {
                (true, true) => rows,
                (true, false) | (false, true) => rows / PSEUDO_LESS_RATE,
                (false, false) if low == high => 1.0,
                (false, false) => match (low.to_f64(), high.to_f64()) {
                    (Some(l), Some(h)) => (h - l).min(rows),
                    _ => rows / PSEUDO_BETWEEN_RATE,
                },
            }
        })
        .sum();
    count.clamp(0.0, rows.max(0.0))
}

/// Rows matched by `ranges` over an index of `column_count` columns.
///
/// Every equal prefix column divides by the equality rate and the first
/// non-equal column contributes its column selectivity. A point on the whole
/// key is one row.
pub fn pseudo_index_row_count(rows: f64, ranges: &[Range], column_count: usize) -> f64 {
    if rows <= 0.0 {
        return 0.0;
    }
    let mut total = 0.0;
    for range in ranges {
        let prefix = range.prefix_equal_len();
        if prefix == column_count && !range.low_exclude && !range.high_exclude {
            total += 1.0;
            continue;
        }
        let i = prefix.min(range.low.len().saturating_sub(1));
        let low = range.low.get(i).unwrap_or(&Datum::Null);
        let high = range.high.get(i).unwrap_or(&Datum::MaxValue);
        let selectivity = range_row_count(rows, low, high) / rows;
        total += rows * selectivity / PSEUDO_EQUAL_RATE.powi(i as i32);
    }
    if total > rows {
        return rows / PSEUDO_LESS_RATE;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use test_case::test_case;

    #[test_case(Range::full(), 10_000.0 ; "full")]
    #[test_case(Range::full_not_null(), 9990.0 ; "not null")]
    #[test_case(Range::new(Datum::MinNotNull, false, Datum::Int(5), true), 10_000.0 / 3.0 - 10.0 ; "less")]
    #[test_case(Range::new(Datum::Int(5), true, Datum::MaxValue, false), 10_000.0 / 3.0 ; "greater")]
    #[test_case(Range::point(Datum::Int(5)), 10.0 ; "point")]
    #[test_case(Range::new(Datum::Int(1), false, Datum::Int(5), false), 250.0 ; "between")]
    fn column(range: Range, expected: f64) {
        assert_approx_eq!(pseudo_column_row_count(10_000.0, &[range]), expected);
    }

    #[test]
    fn column_is_clamped() {
        let ranges = vec![Range::full(), Range::full()];
        assert_eq!(pseudo_column_row_count(100.0, &ranges), 100.0);
    }

    #[test_case(Range::full_not_null(), 1000.0 ; "full")]
    #[test_case(Range::new(Datum::Int(10), false, Datum::MaxValue, false), 1000.0 / 3.0 ; "open high")]
    #[test_case(Range::point(Datum::Int(7)), 1.0 ; "point")]
    #[test_case(Range::new(Datum::Int(10), false, Datum::Int(30), false), 20.0 ; "width")]
    fn int_handle(range: Range, expected: f64) {
        assert_approx_eq!(pseudo_int_handle_row_count(1000.0, &[range]), expected);
    }

    #[test]
    fn index_prefixes() {
        let rows = 1_000_000.0;
        let full_point = Range::point_tuple(vec![Datum::Int(1), Datum::Int(2)]);
        assert_eq!(pseudo_index_row_count(rows, &[full_point], 2), 1.0);

        let prefix_point = Range::point_tuple(vec![Datum::Int(1)]);
        assert_approx_eq!(pseudo_index_row_count(rows, &[prefix_point], 2), 1000.0);

        let prefix_range = Range::with_tuple(
            vec![Datum::Int(1), Datum::Int(5)],
            false,
            vec![Datum::Int(1), Datum::MaxValue],
            false,
        );
        assert_approx_eq!(pseudo_index_row_count(rows, &[prefix_range], 2), rows / 3.0 / 1000.0);
        assert_eq!(pseudo_index_row_count(0.0, &[Range::full()], 1), 0.0);
    }
}
