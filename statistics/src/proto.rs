//! Flat representation of statistics handed to the storage layer.
//!
//! Bucket bounds are stored as encoded keys so that the layout does not
//! depend on the value type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use synopses::frequent::CountMinSketch;

use crate::codec::{decode_key, encode_key};
use crate::datum::Datum;
use crate::error::{DecodeSnafu, ProtoSnafu};
use crate::histogram::Histogram;
use crate::table::StatsPayload;
use crate::topn::{TopN, TopNMeta};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketProto {
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
    pub count: u64,
    pub repeat: u64,
    pub ndv: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramProto {
    pub id: i64,
    pub ndv: i64,
    pub null_count: i64,
    pub last_update_version: u64,
    pub tot_col_size: i64,
    pub correlation: f64,
    pub buckets: Vec<BucketProto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopNProto {
    pub entries: Vec<TopNMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadProto {
    pub histogram: HistogramProto,
    pub topn: TopNProto,
    pub cm_sketch: Option<CountMinSketch>,
}

pub fn histogram_to_proto(hist: &Histogram) -> HistogramProto {
    HistogramProto {
        id: hist.id,
        ndv: hist.ndv,
        null_count: hist.null_count,
        last_update_version: hist.last_update_version,
        tot_col_size: hist.tot_col_size,
        correlation: hist.correlation,
        buckets: hist
            .buckets()
            .iter()
            .map(|b| BucketProto {
                lower: encode_key(std::slice::from_ref(&b.lower)),
                upper: encode_key(std::slice::from_ref(&b.upper)),
                count: b.count,
                repeat: b.repeat,
                ndv: b.ndv,
            })
            .collect(),
    }
}

fn decode_bound(bytes: &[u8]) -> Result<Datum> {
    let mut datums = decode_key(bytes)?;
    ensure!(
        datums.len() == 1,
        DecodeSnafu {
            message: format!("bucket bound holds {} values", datums.len()),
        }
    );
    Ok(datums.remove(0))
}

/// Rebuilds a histogram, ready for estimation.
pub fn histogram_from_proto(proto: &HistogramProto) -> Result<Histogram> {
    let mut hist = Histogram::new(
        proto.id,
        proto.ndv,
        proto.null_count,
        proto.last_update_version,
        proto.tot_col_size,
    );
    hist.correlation = proto.correlation;
    for bucket in &proto.buckets {
        hist.append_bucket_with_ndv(
            decode_bound(&bucket.lower)?,
            decode_bound(&bucket.upper)?,
            bucket.count,
            bucket.repeat,
            bucket.ndv,
        );
    }
    ensure!(
        hist.is_well_formed(),
        DecodeSnafu {
            message: "buckets are out of order",
        }
    );
    hist.pre_calculate_scalar();
    Ok(hist)
}

pub fn topn_to_proto(topn: &TopN) -> TopNProto {
    TopNProto {
        entries: topn
            .iter()
            .map(|(key, count)| TopNMeta::new(key.to_vec(), count))
            .collect(),
    }
}

pub fn topn_from_proto(proto: &TopNProto) -> TopN {
    TopN::new(proto.entries.iter().cloned())
}

pub fn payload_to_proto(payload: &StatsPayload) -> PayloadProto {
    PayloadProto {
        histogram: histogram_to_proto(&payload.histogram),
        topn: topn_to_proto(&payload.topn),
        cm_sketch: payload.cm_sketch.clone(),
    }
}

pub fn payload_from_proto(proto: &PayloadProto) -> Result<StatsPayload> {
    Ok(StatsPayload::new(
        histogram_from_proto(&proto.histogram)?,
        topn_from_proto(&proto.topn),
        proto.cm_sketch.clone(),
    ))
}

pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).context(ProtoSnafu)
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).context(ProtoSnafu)
}
