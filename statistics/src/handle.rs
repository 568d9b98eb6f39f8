use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::table::HistColl;

/// Shared entry point for the statistics of one table.
///
/// Readers take a snapshot and estimate against it without holding the
/// lock. Writers install a whole new [`HistColl`]; a snapshot taken earlier
/// keeps seeing the old one.
#[derive(Debug, Default)]
pub struct StatsHandle {
    inner: RwLock<Arc<HistColl>>,
}

impl StatsHandle {
    pub fn new(coll: HistColl) -> Self {
        Self {
            inner: RwLock::new(Arc::new(coll)),
        }
    }

    pub fn snapshot(&self) -> Arc<HistColl> {
        self.inner.read().clone()
    }

    /// Installs `coll`, returning the statistics it replaced.
    pub fn replace(&self, coll: HistColl) -> Arc<HistColl> {
        let coll = Arc::new(coll);
        debug!(table = coll.physical_id, "installing table statistics");
        std::mem::replace(&mut *self.inner.write(), coll)
    }

    /// Copies the current statistics, applies `f` to the copy and installs
    /// it. Entries are shared between the copy and the installed one, so only the
    /// changed ones are rebuilt.
    pub fn update(&self, f: impl FnOnce(&mut HistColl)) {
        let mut guard = self.inner.write();
        let mut next = HistColl::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Histogram;
    use crate::table::{ColumnInfo, ColumnStats, FieldType, StatsPayload};
    use crate::topn::TopN;

    fn column(id: i64, rows: u64) -> ColumnStats {
        let mut hist = Histogram::new(id, 1, 0, 0, 0);
        hist.append_bucket(crate::Datum::Int(0), crate::Datum::Int(0), rows, rows);
        hist.pre_calculate_scalar();
        ColumnStats::new(ColumnInfo::new(id, FieldType::Int), StatsPayload::new(hist, TopN::default(), None))
    }

    #[test]
    fn snapshots_survive_replacement() {
        let mut coll = HistColl::new(1, 10, 0);
        coll.insert_column(column(1, 10));
        let handle = StatsHandle::new(coll);
        let before = handle.snapshot();

        let mut next = HistColl::new(1, 20, 0);
        next.insert_column(column(1, 20));
        let old = handle.replace(next);
        assert!(Arc::ptr_eq(&old, &before));
        assert_eq!(before.realtime_count, 10);
        assert_eq!(handle.snapshot().realtime_count, 20);
    }

    #[test]
    fn update_shares_untouched_entries() {
        let mut coll = HistColl::new(1, 10, 0);
        coll.insert_column(column(1, 10));
        let handle = StatsHandle::new(coll);
        let before = handle.snapshot();
        handle.update(|coll| {
            coll.modify_count += 5;
            coll.insert_column(column(2, 10));
        });
        let after = handle.snapshot();
        assert_eq!(before.modify_count, 0);
        assert_eq!(after.modify_count, 5);
        assert!(before.column(2).is_none());
        assert!(std::ptr::eq(before.column(1).unwrap(), after.column(1).unwrap()));
    }

    #[test]
    fn concurrent_readers_see_whole_tables() {
        let handle = Arc::new(StatsHandle::new(HistColl::new(1, 0, 0)));
        let writer = {
            let handle = Arc::clone(&handle);
            std::thread::spawn(move || {
                for rows in 1..=100 {
                    let mut coll = HistColl::new(1, rows, 0);
                    coll.insert_column(column(1, rows as u64));
                    handle.replace(coll);
                }
            })
        };
        for _ in 0..100 {
            let snapshot = handle.snapshot();
            if let Some(col) = snapshot.column(1) {
                assert_eq!(col.payload.total_row_count(), snapshot.realtime_count as f64);
            }
        }
        writer.join().unwrap();
        assert_eq!(handle.snapshot().realtime_count, 100);
    }
}
