use crate::datum::Datum;

/// A predicate interval over one column or an index key prefix.
///
/// `low` and `high` hold one datum per constrained key column. An open end is
/// written with the `Null`/`MinNotNull` and `MaxValue` sentinels.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub low: Vec<Datum>,
    pub high: Vec<Datum>,
    pub low_exclude: bool,
    pub high_exclude: bool,
}

impl Range {
    pub fn new(low: Datum, low_exclude: bool, high: Datum, high_exclude: bool) -> Self {
        Self::with_tuple(vec![low], low_exclude, vec![high], high_exclude)
    }

    pub fn with_tuple(low: Vec<Datum>, low_exclude: bool, high: Vec<Datum>, high_exclude: bool) -> Self {
        Self {
            low,
            high,
            low_exclude,
            high_exclude,
        }
    }

    /// `[value, value]`.
    pub fn point(value: Datum) -> Self {
        Self::new(value.clone(), false, value, false)
    }

    /// Equality on every datum of `key`.
    pub fn point_tuple(key: Vec<Datum>) -> Self {
        Self::with_tuple(key.clone(), false, key, false)
    }

    /// Every row, nulls included.
    pub fn full() -> Self {
        Self::new(Datum::Null, false, Datum::MaxValue, false)
    }

    /// Every non-null row.
    pub fn full_not_null() -> Self {
        Self::new(Datum::MinNotNull, false, Datum::MaxValue, false)
    }

    /// Both ends inclusive and equal, without sentinels.
    pub fn is_point(&self) -> bool {
        !self.low_exclude
            && !self.high_exclude
            && !self.low.is_empty()
            && self.low.len() == self.high.len()
            && self
                .low
                .iter()
                .zip(&self.high)
                .all(|(l, h)| l == h && !l.is_sentinel())
    }

    /// Number of leading key columns constrained to a single value.
    pub fn prefix_equal_len(&self) -> usize {
        self.low
            .iter()
            .zip(&self.high)
            .take_while(|(l, h)| l == h && !l.is_sentinel())
            .count()
    }

    /// First datum of the lower bound.
    pub fn low_value(&self) -> &Datum {
        self.low.first().unwrap_or(&Datum::Null)
    }

    /// First datum of the upper bound.
    pub fn high_value(&self) -> &Datum {
        self.high.first().unwrap_or(&Datum::MaxValue)
    }
}

fn int_value(d: &Datum) -> Option<i128> {
    match d {
        Datum::Int(v) => Some(i128::from(*v)),
        Datum::Uint(v) => Some(i128::from(*v)),
        _ => None,
    }
}

/// Turns exclusive integer bounds into inclusive ones. Returns `None` when
/// nothing is left of the range.
pub(crate) fn normalize_int_range(range: &Range) -> Option<Range> {
    let mut low = range.low_value().clone();
    let mut high = range.high_value().clone();
    if range.low_exclude {
        low = match low {
            Datum::Int(v) => Datum::Int(v.checked_add(1)?),
            Datum::Uint(v) => Datum::Uint(v.checked_add(1)?),
            Datum::Null => Datum::MinNotNull,
            other => other,
        };
    }
    if range.high_exclude {
        high = match high {
            Datum::Int(v) => Datum::Int(v.checked_sub(1)?),
            Datum::Uint(v) => Datum::Uint(v.checked_sub(1)?),
            other => other,
        };
    }
    if let (Some(l), Some(h)) = (int_value(&low), int_value(&high)) {
        if l > h {
            return None;
        }
    }
    Some(Range::new(low, false, high, false))
}

/// Splits integer ranges at the boundary between the signed and unsigned
/// domains.
///
/// For an unsigned column, negative parts are dropped and bounds become
/// `Uint`. For a signed column, parts above `i64::MAX` are dropped and bounds
/// become `Int`. Sentinel bounds are kept as they are.
pub fn split_int_ranges(ranges: &[Range], unsigned: bool) -> Vec<Range> {
    ranges
        .iter()
        .filter_map(|r| {
            let mut r = r.clone();
            let (low, high) = (r.low_value().clone(), r.high_value().clone());
            if unsigned {
                if let Datum::Int(h) = high {
                    if h < 0 || (h == 0 && r.high_exclude) {
                        return None;
                    }
                    r.high = vec![Datum::Uint(h as u64)];
                }
                if let Datum::Int(l) = low {
                    if l < 0 {
                        r.low = vec![Datum::Uint(0)];
                        r.low_exclude = false;
                    } else {
                        r.low = vec![Datum::Uint(l as u64)];
                    }
                }
            } else {
                if let Datum::Uint(l) = low {
                    if l > i64::MAX as u64 || (l == i64::MAX as u64 && r.low_exclude) {
                        return None;
                    }
                    r.low = vec![Datum::Int(l as i64)];
                }
                if let Datum::Uint(h) = high {
                    if h > i64::MAX as u64 {
                        r.high = vec![Datum::Int(i64::MAX)];
                        r.high_exclude = false;
                    } else {
                        r.high = vec![Datum::Int(h as i64)];
                    }
                }
            }
            Some(r)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn point_detection() {
        assert!(Range::point(Datum::Int(3)).is_point());
        assert!(Range::point(Datum::Null).is_point());
        assert!(!Range::new(Datum::Int(3), true, Datum::Int(3), false).is_point());
        assert!(!Range::full().is_point());
        assert!(!Range::new(Datum::MaxValue, false, Datum::MaxValue, false).is_point());
        let prefix = Range::with_tuple(
            vec![Datum::Int(1), Datum::MinNotNull],
            false,
            vec![Datum::Int(1), Datum::MaxValue],
            false,
        );
        assert!(!prefix.is_point());
        assert_eq!(prefix.prefix_equal_len(), 1);
    }

    #[test]
    fn unsigned_split_drops_negative_part() {
        let ranges = vec![
            Range::new(Datum::Int(-10), true, Datum::Int(5), false),
            Range::new(Datum::Int(-10), false, Datum::Int(-1), false),
            Range::new(Datum::MinNotNull, false, Datum::MaxValue, false),
        ];
        let split = split_int_ranges(&ranges, true);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0], Range::new(Datum::Uint(0), false, Datum::Uint(5), false));
        assert_eq!(split[1], Range::full_not_null());
    }

    #[test]
    fn signed_split_clamps_large_unsigned() {
        let ranges = vec![
            Range::new(Datum::Int(-5), false, Datum::Uint(u64::MAX), false),
            Range::new(Datum::Uint(u64::MAX - 1), false, Datum::Uint(u64::MAX), false),
        ];
        let split = split_int_ranges(&ranges, false);
        assert_eq!(split, vec![Range::new(Datum::Int(-5), false, Datum::Int(i64::MAX), false)]);
    }

    #[test_case(Range::new(Datum::Int(1), true, Datum::Int(5), true), Some((2, 4)) ; "both exclusive")]
    #[test_case(Range::new(Datum::Int(1), true, Datum::Int(2), true), None ; "empty")]
    #[test_case(Range::new(Datum::Int(i64::MAX), true, Datum::MaxValue, false), None ; "overflow")]
    #[test_case(Range::new(Datum::Int(1), false, Datum::Int(5), false), Some((1, 5)) ; "inclusive")]
    fn normalize(range: Range, expected: Option<(i64, i64)>) {
        let expected = expected.map(|(l, h)| Range::new(Datum::Int(l), false, Datum::Int(h), false));
        assert_eq!(normalize_int_range(&range), expected);
    }
}
