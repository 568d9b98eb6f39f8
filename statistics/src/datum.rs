use std::cmp::Ordering;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A single SQL value as seen by the statistics layer.
///
/// The total order is `Null < MinNotNull < numbers < Bytes < MaxValue`.
/// Numeric variants compare by value across kinds, so `Int(3) == Uint(3)`.
/// `MinNotNull` and `MaxValue` are sentinels used as open range bounds.
#[derive(Clone, Serialize, Deserialize)]
pub enum Datum {
    Null,
    MinNotNull,
    Int(i64),
    Uint(u64),
    Float(OrderedFloat<f64>),
    Bytes(Vec<u8>),
    MaxValue,
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Whether this is one of the `MinNotNull` / `MaxValue` range sentinels.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Datum::MinNotNull | Datum::MaxValue)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Datum::Int(_) | Datum::Uint(_) | Datum::Float(_))
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(v) => Some(*v as f64),
            Datum::Uint(v) => Some(*v as f64),
            Datum::Float(v) => Some(v.0),
            _ => None,
        }
    }

    /// Approximate in-memory footprint, used for total column size.
    pub fn mem_size(&self) -> usize {
        match self {
            Datum::Null | Datum::MinNotNull | Datum::MaxValue => 1,
            Datum::Int(_) | Datum::Uint(_) | Datum::Float(_) => 8,
            Datum::Bytes(b) => b.len(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::MinNotNull => 1,
            Datum::Int(_) | Datum::Uint(_) | Datum::Float(_) => 2,
            Datum::Bytes(_) => 3,
            Datum::MaxValue => 4,
        }
    }
}

fn cmp_int_float(i: i64, f: OrderedFloat<f64>) -> Ordering {
    OrderedFloat(i as f64).cmp(&f)
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        use Datum::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Uint(a), Uint(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.cmp(b),
            (Int(a), Uint(b)) => {
                if *a < 0 {
                    Ordering::Less
                } else {
                    (*a as u64).cmp(b)
                }
            }
            (Uint(_), Int(_)) => other.cmp(self).reverse(),
            (Int(a), Float(b)) => cmp_int_float(*a, *b),
            (Float(_), Int(_)) => other.cmp(self).reverse(),
            (Uint(a), Float(b)) => OrderedFloat(*a as f64).cmp(b),
            (Float(a), Uint(b)) => a.cmp(&OrderedFloat(*b as f64)),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::MinNotNull => write!(f, "-inf"),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::Uint(v) => write!(f, "{v}u"),
            Datum::Float(v) => write!(f, "{:?}", v.0),
            Datum::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => write!(f, "0x{}", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
            },
            Datum::MaxValue => write!(f, "+inf"),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::Uint(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(OrderedFloat(v))
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Bytes(v)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(v: Option<T>) -> Self {
        v.map_or(Datum::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_bracket_values() {
        let values = [
            Datum::from(-5i64),
            Datum::from(u64::MAX),
            Datum::from(1.5),
            Datum::from("abc"),
        ];
        for v in &values {
            assert!(Datum::Null < *v);
            assert!(Datum::MinNotNull < *v);
            assert!(*v < Datum::MaxValue);
        }
        assert!(Datum::Null < Datum::MinNotNull);
    }

    #[test]
    fn numeric_kinds_compare_by_value() {
        assert_eq!(Datum::Int(3), Datum::Uint(3));
        assert!(Datum::Int(-1) < Datum::Uint(0));
        assert!(Datum::Uint(u64::MAX) > Datum::Int(i64::MAX));
        assert!(Datum::from(2.5) > Datum::Int(2));
        assert!(Datum::from(2.5) < Datum::Uint(3));
        assert!(Datum::Int(100) < Datum::from("0"));
    }

    #[test]
    fn option_maps_none_to_null() {
        assert!(Datum::from(None::<i64>).is_null());
        assert_eq!(Datum::from(Some(4i64)), Datum::Int(4));
    }
}
