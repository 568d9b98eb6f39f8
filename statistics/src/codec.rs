//! Memcomparable key encoding.
//!
//! Encoded keys of values of the same kind sort bytewise in the same order as
//! the values themselves, so index bounds, TopN entries and sketch keys can be
//! handled as plain byte strings.

use ordered_float::OrderedFloat;
use snafu::ensure;

use crate::datum::Datum;
use crate::error::DecodeSnafu;
use crate::Result;

const NIL_FLAG: u8 = 0;
const BYTES_FLAG: u8 = 1;
const INT_FLAG: u8 = 3;
const UINT_FLAG: u8 = 4;
const FLOAT_FLAG: u8 = 5;
const MAX_FLAG: u8 = 250;

const GROUP_SIZE: usize = 8;
const MARKER: u8 = 0xFF;
const PAD: u8 = 0;
const SIGN_MASK: u64 = 1 << 63;

/// Encodes a tuple of datums into one comparable key.
///
/// `MinNotNull` is written as a bare bytes flag and may only appear as the
/// last datum of a key.
pub fn encode_key(datums: &[Datum]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(datums.len() * 9);
    for d in datums {
        encode_datum(&mut buf, d);
    }
    buf
}

/// Encodes a single datum, appending to `buf`.
pub fn encode_datum(buf: &mut Vec<u8>, datum: &Datum) {
    match datum {
        Datum::Null => buf.push(NIL_FLAG),
        Datum::MinNotNull => buf.push(BYTES_FLAG),
        Datum::Bytes(b) => {
            buf.push(BYTES_FLAG);
            encode_bytes(buf, b);
        }
        Datum::Int(v) => {
            buf.push(INT_FLAG);
            buf.extend_from_slice(&((*v as u64) ^ SIGN_MASK).to_be_bytes());
        }
        Datum::Uint(v) => {
            buf.push(UINT_FLAG);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Datum::Float(v) => {
            buf.push(FLOAT_FLAG);
            buf.extend_from_slice(&encode_float(v.0).to_be_bytes());
        }
        Datum::MaxValue => buf.push(MAX_FLAG),
    }
}

fn encode_float(v: f64) -> u64 {
    // -0.0 and 0.0 must share one encoding.
    let v = if v == 0.0 { 0.0 } else { v };
    let bits = v.to_bits();
    if bits & SIGN_MASK == 0 {
        bits | SIGN_MASK
    } else {
        !bits
    }
}

fn decode_float(u: u64) -> f64 {
    let bits = if u & SIGN_MASK != 0 { u & !SIGN_MASK } else { !u };
    f64::from_bits(bits)
}

fn encode_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    let mut idx = 0;
    loop {
        let remain = data.len() - idx;
        if remain >= GROUP_SIZE {
            buf.extend_from_slice(&data[idx..idx + GROUP_SIZE]);
            buf.push(MARKER);
            idx += GROUP_SIZE;
        } else {
            let pad_count = GROUP_SIZE - remain;
            buf.extend_from_slice(&data[idx..]);
            buf.extend(std::iter::repeat(PAD).take(pad_count));
            buf.push(MARKER - pad_count as u8);
            return;
        }
    }
}

fn decode_bytes(data: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    let mut rest = data;
    loop {
        ensure!(
            rest.len() > GROUP_SIZE,
            DecodeSnafu {
                message: "truncated bytes group"
            }
        );
        let (group, tail) = rest.split_at(GROUP_SIZE + 1);
        let marker = group[GROUP_SIZE];
        let pad_count = usize::from(MARKER - marker);
        ensure!(
            pad_count <= GROUP_SIZE,
            DecodeSnafu {
                message: format!("invalid group marker {marker:#x}")
            }
        );
        let real = GROUP_SIZE - pad_count;
        out.extend_from_slice(&group[..real]);
        if pad_count != 0 {
            ensure!(
                group[real..GROUP_SIZE].iter().all(|&b| b == PAD),
                DecodeSnafu {
                    message: "invalid padding"
                }
            );
            return Ok((out, tail));
        }
        rest = tail;
    }
}

fn read_u64(data: &[u8]) -> Result<(u64, &[u8])> {
    ensure!(
        data.len() >= 8,
        DecodeSnafu {
            message: "truncated 8-byte value"
        }
    );
    let (head, tail) = data.split_at(8);
    let mut word = [0u8; 8];
    word.copy_from_slice(head);
    Ok((u64::from_be_bytes(word), tail))
}

/// Decodes a key produced by [`encode_key`].
pub fn decode_key(mut data: &[u8]) -> Result<Vec<Datum>> {
    let mut datums = Vec::new();
    while let Some((&flag, rest)) = data.split_first() {
        let (datum, rest) = match flag {
            NIL_FLAG => (Datum::Null, rest),
            BYTES_FLAG if rest.is_empty() => (Datum::MinNotNull, rest),
            BYTES_FLAG => {
                let (bytes, rest) = decode_bytes(rest)?;
                (Datum::Bytes(bytes), rest)
            }
            INT_FLAG => {
                let (u, rest) = read_u64(rest)?;
                (Datum::Int((u ^ SIGN_MASK) as i64), rest)
            }
            UINT_FLAG => {
                let (u, rest) = read_u64(rest)?;
                (Datum::Uint(u), rest)
            }
            FLOAT_FLAG => {
                let (u, rest) = read_u64(rest)?;
                (Datum::Float(OrderedFloat(decode_float(u))), rest)
            }
            MAX_FLAG => (Datum::MaxValue, rest),
            other => {
                return DecodeSnafu {
                    message: format!("unknown flag {other}"),
                }
                .fail()
            }
        };
        datums.push(datum);
        data = rest;
    }
    Ok(datums)
}

/// Smallest key that is greater than every key starting with `key`.
///
/// Increments the last byte with carry; an all-`0xFF` key gets a zero byte
/// appended instead.
pub fn prefix_next(key: &[u8]) -> Vec<u8> {
    let mut buf = key.to_vec();
    for i in (0..buf.len()).rev() {
        buf[i] = buf[i].wrapping_add(1);
        if buf[i] != 0 {
            return buf;
        }
    }
    let mut buf = key.to_vec();
    buf.push(0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn key(d: impl Into<Datum>) -> Vec<u8> {
        encode_key(&[d.into()])
    }

    #[test]
    fn ints_sort_bytewise() {
        let values = [i64::MIN, -100, -1, 0, 1, 42, i64::MAX];
        let keys: Vec<_> = values.iter().map(|&v| key(v)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn floats_sort_bytewise() {
        let values = [f64::NEG_INFINITY, -3.5, -0.25, 0.0, 1e-9, 2.0, f64::INFINITY];
        let keys: Vec<_> = values.iter().map(|&v| key(v)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(key(-0.0), key(0.0));
    }

    #[test]
    fn bytes_sort_bytewise() {
        let values: [&[u8]; 6] = [b"", b"\x00", b"a", b"abcdefgh", b"abcdefgh\x00", b"b"];
        let keys: Vec<_> = values.iter().map(|v| key(v.to_vec())).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sentinels_bracket_keys() {
        let min = encode_key(&[Datum::MinNotNull]);
        let max = encode_key(&[Datum::MaxValue]);
        let null = encode_key(&[Datum::Null]);
        for k in [key(-5i64), key(7u64), key(""), key(1.5)] {
            assert!(null < min);
            assert!(min < k);
            assert!(k < max);
        }
    }

    #[test_case(vec![Datum::Int(-7), Datum::from("hello world")] ; "int and bytes")]
    #[test_case(vec![Datum::Null, Datum::Uint(u64::MAX), Datum::from(-2.5)] ; "null uint float")]
    #[test_case(vec![Datum::Int(1), Datum::MinNotNull] ; "trailing min not null")]
    #[test_case(vec![Datum::MaxValue] ; "max")]
    fn decode_inverts_encode(datums: Vec<Datum>) {
        let encoded = encode_key(&datums);
        let decoded = decode_key(&encoded).unwrap();
        assert_eq!(format!("{decoded:?}"), format!("{datums:?}"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_key(&[INT_FLAG, 1, 2]).is_err());
        assert!(decode_key(&[42]).is_err());
        assert!(decode_key(&[BYTES_FLAG, 1, 2, 3]).is_err());
    }

    #[test_case(&[0x01, 0x02], &[0x01, 0x03] ; "simple")]
    #[test_case(&[0x01, 0xFF], &[0x02, 0x00] ; "carry")]
    #[test_case(&[0xFF, 0xFF], &[0xFF, 0xFF, 0x00] ; "overflow")]
    #[test_case(&[], &[0x00] ; "empty")]
    fn prefix_next_cases(input: &[u8], expected: &[u8]) {
        assert_eq!(prefix_next(input), expected);
    }

    #[test]
    fn prefix_next_bounds_extensions() {
        let prefix = encode_key(&[Datum::Int(5)]);
        let next = prefix_next(&prefix);
        let extended = encode_key(&[Datum::Int(5), Datum::from("zzz")]);
        assert!(prefix < extended && extended < next);
        assert!(next <= encode_key(&[Datum::Int(6)]));
    }
}
