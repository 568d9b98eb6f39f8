//! Column and index statistics for cardinality estimation.
//!
//! Scan-time collectors ([`sample`]) feed the builders ([`builder`]), which
//! produce immutable [`Histogram`], [`TopN`] and count-min summaries. These are
//! installed into a [`HistColl`] and read by the row-count estimators in
//! [`estimate`].

pub mod builder;
pub mod codec;
pub mod config;
pub mod datum;
mod error;
pub mod estimate;
pub mod handle;
pub mod histogram;
pub mod proto;
pub mod sample;
pub mod table;
pub mod topn;

pub use config::StatsConfig;
pub use datum::Datum;
pub use error::{Error, Result};
pub use estimate::Range;
pub use handle::StatsHandle;
pub use histogram::{Bucket, Histogram};
pub use table::{ColumnInfo, ColumnStats, FieldType, HistColl, IndexInfo, IndexStats, LoadStatus};
pub use topn::{TopN, TopNMeta};
