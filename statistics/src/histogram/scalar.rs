use crate::datum::Datum;

use super::Bucket;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScalarKind {
    Numeric,
    Bytes,
    Other,
}

/// Numeric projection of one bucket's bounds.
///
/// Byte strings drop the prefix shared by both bounds and read the next eight
/// bytes as a big-endian integer.
#[derive(Debug, Clone, Copy)]
pub(super) struct BucketScalar {
    kind: ScalarKind,
    lower: f64,
    upper: f64,
    common_prefix_len: usize,
}

impl BucketScalar {
    pub(super) fn new(bucket: &Bucket) -> Self {
        match (&bucket.lower, &bucket.upper) {
            (Datum::Bytes(lower), Datum::Bytes(upper)) => {
                let common = common_prefix_len(&[lower.as_slice(), upper.as_slice()]);
                Self {
                    kind: ScalarKind::Bytes,
                    lower: bytes_to_scalar(&lower[common..]),
                    upper: bytes_to_scalar(&upper[common..]),
                    common_prefix_len: common,
                }
            }
            (lower, upper) => match (lower.to_f64(), upper.to_f64()) {
                (Some(lower), Some(upper)) => Self {
                    kind: ScalarKind::Numeric,
                    lower,
                    upper,
                    common_prefix_len: 0,
                },
                _ => Self {
                    kind: ScalarKind::Other,
                    lower: 0.0,
                    upper: 0.0,
                    common_prefix_len: 0,
                },
            },
        }
    }

    /// Position of `value` inside the bucket, in `[0, 1]`.
    pub(super) fn fraction(&self, value: &Datum) -> f64 {
        match (self.kind, value) {
            (ScalarKind::Numeric, v) => match v.to_f64() {
                Some(v) => calc_fraction(self.lower, self.upper, v),
                None => 0.5,
            },
            (ScalarKind::Bytes, Datum::Bytes(b)) => {
                let tail = b.get(self.common_prefix_len..).unwrap_or_default();
                calc_fraction(self.lower, self.upper, bytes_to_scalar(tail))
            }
            _ => 0.5,
        }
    }
}

fn calc_fraction(lower: f64, upper: f64, value: f64) -> f64 {
    if upper <= lower {
        return 0.5;
    }
    if value <= lower {
        return 0.0;
    }
    if value >= upper {
        return 1.0;
    }
    let frac = (value - lower) / (upper - lower);
    if frac.is_finite() {
        frac
    } else {
        0.5
    }
}

fn bytes_to_scalar(bytes: &[u8]) -> f64 {
    let mut word = [0u8; 8];
    let n = bytes.len().min(8);
    word[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(word) as f64
}

/// Length of the prefix shared by every slice.
pub(crate) fn common_prefix_len(slices: &[&[u8]]) -> usize {
    let Some((first, rest)) = slices.split_first() else {
        return 0;
    };
    let mut len = first.len();
    for s in rest {
        len = first
            .iter()
            .zip(s.iter())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    len
}

/// Projects a datum onto the real line for out-of-range estimation.
///
/// Sentinels map to the infinities.
pub(crate) fn datum_to_scalar(datum: &Datum, common_prefix: usize) -> f64 {
    match datum {
        Datum::Null | Datum::MinNotNull => f64::NEG_INFINITY,
        Datum::MaxValue => f64::INFINITY,
        Datum::Bytes(b) => bytes_to_scalar(b.get(common_prefix..).unwrap_or_default()),
        other => other.to_f64().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_fraction() {
        let scalar = BucketScalar::new(&Bucket::new(Datum::Int(10), Datum::Int(25), 50, 1));
        assert!((scalar.fraction(&Datum::Int(17)) - 7.0 / 15.0).abs() < 1e-9);
        assert_eq!(scalar.fraction(&Datum::Int(5)), 0.0);
        assert_eq!(scalar.fraction(&Datum::Int(30)), 1.0);
    }

    #[test]
    fn degenerate_bucket_is_half() {
        let scalar = BucketScalar::new(&Bucket::new(Datum::Int(3), Datum::Int(3), 5, 5));
        assert_eq!(scalar.fraction(&Datum::Int(3)), 0.5);
    }

    #[test]
    fn bytes_fraction_skips_common_prefix() {
        let bucket = Bucket::new(Datum::from("user_a"), Datum::from("user_c"), 10, 1);
        let scalar = BucketScalar::new(&bucket);
        assert_eq!(scalar.common_prefix_len, 5);
        let frac = scalar.fraction(&Datum::from("user_b"));
        assert!((frac - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mismatched_kind_is_half() {
        let scalar = BucketScalar::new(&Bucket::new(Datum::from("a"), Datum::from("z"), 10, 1));
        assert_eq!(scalar.fraction(&Datum::Int(3)), 0.5);
    }

    #[test]
    fn prefix_of_many() {
        assert_eq!(common_prefix_len(&[&b"abcd"[..], &b"abxx"[..], &b"abc"[..]]), 2);
        assert_eq!(common_prefix_len(&[&b"abc"[..]]), 3);
        assert_eq!(common_prefix_len(&[]), 0);
    }
}
