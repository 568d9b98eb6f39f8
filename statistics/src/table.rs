//! Table-level statistics: one entry per column and per index, owned by a
//! flat id-keyed collection.

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use synopses::frequent::CountMinSketch;

use crate::histogram::Histogram;
use crate::topn::TopN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    UnsignedInt,
    Float,
    Bytes,
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::UnsignedInt)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, FieldType::UnsignedInt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: i64,
    pub field_type: FieldType,
    /// The column is the integer primary key of the table.
    pub is_handle: bool,
}

impl ColumnInfo {
    pub fn new(id: i64, field_type: FieldType) -> Self {
        Self {
            id,
            field_type,
            is_handle: false,
        }
    }

    pub fn handle(id: i64, field_type: FieldType) -> Self {
        Self {
            id,
            field_type,
            is_handle: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: i64,
    pub unique: bool,
    /// Number of columns in the index key.
    pub column_count: usize,
}

/// How much of an entry's statistics is in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    Uninitialized,
    AllLoaded,
    /// Histogram and TopN are loaded, the count-min sketch is not.
    CmSketchEvicted,
    AllEvicted,
}

impl LoadStatus {
    /// Whether the histogram and TopN can answer estimates.
    pub fn is_usable(&self) -> bool {
        matches!(self, LoadStatus::AllLoaded | LoadStatus::CmSketchEvicted)
    }

    pub fn has_cm_sketch(&self) -> bool {
        matches!(self, LoadStatus::AllLoaded)
    }
}

/// The summaries shared by column and index statistics. TopN rows are not
/// part of the histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsPayload {
    pub histogram: Histogram,
    pub topn: TopN,
    pub cm_sketch: Option<CountMinSketch>,
}

impl StatsPayload {
    pub fn new(histogram: Histogram, topn: TopN, cm_sketch: Option<CountMinSketch>) -> Self {
        Self {
            histogram,
            topn,
            cm_sketch,
        }
    }

    pub fn not_null_count(&self) -> f64 {
        self.histogram.not_null_count() + self.topn.total_count() as f64
    }

    pub fn total_row_count(&self) -> f64 {
        self.not_null_count() + self.histogram.null_count as f64
    }

    pub fn ndv(&self) -> i64 {
        self.histogram.ndv + self.topn.num() as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub info: ColumnInfo,
    pub payload: StatsPayload,
    pub status: LoadStatus,
}

impl ColumnStats {
    pub fn new(info: ColumnInfo, payload: StatsPayload) -> Self {
        Self {
            info,
            payload,
            status: LoadStatus::AllLoaded,
        }
    }

    /// Drops the count-min sketch to save memory.
    pub fn evict_cm_sketch(&mut self) {
        self.payload.cm_sketch = None;
        if self.status == LoadStatus::AllLoaded {
            self.status = LoadStatus::CmSketchEvicted;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub info: IndexInfo,
    pub payload: StatsPayload,
    pub status: LoadStatus,
}

impl IndexStats {
    pub fn new(info: IndexInfo, payload: StatsPayload) -> Self {
        Self {
            info,
            payload,
            status: LoadStatus::AllLoaded,
        }
    }

    pub fn evict_cm_sketch(&mut self) {
        self.payload.cm_sketch = None;
        if self.status == LoadStatus::AllLoaded {
            self.status = LoadStatus::CmSketchEvicted;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsKey {
    Column(i64),
    Index(i64),
}

#[derive(Debug, Clone, Copy)]
pub enum StatsRef<'a> {
    Column(&'a ColumnStats),
    Index(&'a IndexStats),
}

impl<'a> StatsRef<'a> {
    pub fn payload(&self) -> &'a StatsPayload {
        match self {
            StatsRef::Column(c) => &c.payload,
            StatsRef::Index(i) => &i.payload,
        }
    }

    pub fn status(&self) -> LoadStatus {
        match self {
            StatsRef::Column(c) => c.status,
            StatsRef::Index(i) => i.status,
        }
    }
}

/// Statistics of one physical table.
///
/// Entries are shared behind `Arc` and never mutated once installed; a
/// rebuilt entry replaces the old one.
#[derive(Debug, Clone, Default)]
pub struct HistColl {
    pub physical_id: i64,
    /// Current row count, maintained outside of statistics collection.
    pub realtime_count: i64,
    /// Rows modified since the statistics were built.
    pub modify_count: i64,
    /// No statistics were collected; estimates use fixed selectivities.
    pub pseudo: bool,
    columns: HashMap<i64, Arc<ColumnStats>>,
    indices: HashMap<i64, Arc<IndexStats>>,
}

impl HistColl {
    pub fn new(physical_id: i64, realtime_count: i64, modify_count: i64) -> Self {
        Self {
            physical_id,
            realtime_count,
            modify_count,
            ..Default::default()
        }
    }

    /// A table without statistics.
    pub fn pseudo_table(physical_id: i64, realtime_count: i64) -> Self {
        Self {
            pseudo: true,
            ..Self::new(physical_id, realtime_count, 0)
        }
    }

    pub fn insert_column(&mut self, stats: ColumnStats) {
        self.columns.insert(stats.info.id, Arc::new(stats));
    }

    pub fn insert_index(&mut self, stats: IndexStats) {
        self.indices.insert(stats.info.id, Arc::new(stats));
    }

    pub fn remove_column(&mut self, id: i64) -> Option<Arc<ColumnStats>> {
        self.columns.remove(&id)
    }

    pub fn column(&self, id: i64) -> Option<&ColumnStats> {
        self.columns.get(&id).map(Arc::as_ref)
    }

    pub fn index(&self, id: i64) -> Option<&IndexStats> {
        self.indices.get(&id).map(Arc::as_ref)
    }

    pub fn get(&self, key: StatsKey) -> Option<StatsRef<'_>> {
        match key {
            StatsKey::Column(id) => self.column(id).map(StatsRef::Column),
            StatsKey::Index(id) => self.index(id).map(StatsRef::Index),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnStats> {
        self.columns.values().map(Arc::as_ref)
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexStats> {
        self.indices.values().map(Arc::as_ref)
    }

    /// Ratio between the live row count and the rows the statistics saw.
    pub fn increase_factor(&self, stats_total: f64) -> f64 {
        if stats_total <= 0.0 {
            return 1.0;
        }
        self.realtime_count as f64 / stats_total
    }
}
