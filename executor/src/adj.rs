//! The adjustment-factor cache and its application to result rows
//! (§4.5.5). Cumulative factors are computed once per `(db, sec)` and
//! cached until the next write to `_adj_` invalidates the whole database.

use std::sync::Arc;

use dashmap::DashMap;

use catalog::ADJ_TABLE;
use common::error::Error;
use common::value::Value;
use common::CResult;
use kv::{Store, Transaction};

pub type Timestamp = (i64, i32);

#[derive(Debug, Clone, Copy)]
pub struct AdjEntry {
    pub tm: Timestamp,
    pub px_fwd: f64,
    pub vol_fwd: f64,
    pub px_back: f64,
    pub vol_back: f64,
}

/// Process-wide `(db, sec) -> cumulative adjustment table` cache.
#[derive(Default)]
pub struct AdjustmentCache {
    entries: DashMap<(String, i64), Arc<Vec<AdjEntry>>>,
}

fn nonzero(v: f64) -> f64 {
    if v == 0.0 {
        1.0
    } else {
        v
    }
}

/// Build the cumulative table from ascending `(tm, raw_px, raw_vol)`
/// rows, replacing zero factors with one (§4.5.5).
fn build_cumulative(rows: &[(Timestamp, f64, f64)]) -> Vec<AdjEntry> {
    let n = rows.len();
    let mut px_fwd = vec![0.0; n];
    let mut vol_fwd = vec![0.0; n];
    let mut px_back = vec![0.0; n];
    let mut vol_back = vec![0.0; n];

    let mut running_px = 1.0;
    let mut running_vol = 1.0;
    for i in (0..n).rev() {
        running_px *= nonzero(rows[i].1);
        running_vol *= nonzero(rows[i].2);
        px_fwd[i] = running_px;
        vol_fwd[i] = running_vol;
    }

    let mut running_px_inv = 1.0;
    let mut running_vol_inv = 1.0;
    for i in 0..n {
        running_px_inv *= 1.0 / nonzero(rows[i].1);
        running_vol_inv *= 1.0 / nonzero(rows[i].2);
        px_back[i] = running_px_inv;
        vol_back[i] = running_vol_inv;
    }

    (0..n)
        .map(|i| AdjEntry {
            tm: rows[i].0,
            px_fwd: px_fwd[i],
            vol_fwd: vol_fwd[i],
            px_back: px_back[i],
            vol_back: vol_back[i],
        })
        .collect()
}

impl AdjustmentCache {
    pub fn new() -> Self {
        AdjustmentCache { entries: DashMap::new() }
    }

    /// Read-through fetch of the cumulative table for `(db, sec)`. On
    /// miss, scans `_adj_` for `sec` in its own transaction.
    pub fn get_or_build<S: Store>(&self, store: &S, db: &str, sec: i64) -> CResult<Arc<Vec<AdjEntry>>> {
        let key = (db.to_string(), sec);
        if let Some(entries) = self.entries.get(&key) {
            return Ok(entries.clone());
        }

        let rows = store.transact(|tx| {
            let table_path = vec!["db".to_string(), db.to_string(), ADJ_TABLE.to_string()];
            let subspace = match tx.dir_open(&table_path)? {
                Some(s) => s,
                None => return Ok(Vec::new()),
            };
            let (begin, end) = subspace.range(&[Value::Int(sec as i32)]);
            let pairs = tx.range(&begin, &end, None, false)?;
            let mut rows = Vec::with_capacity(pairs.len());
            for (raw_key, raw_value) in pairs {
                let key_tail = subspace.unpack(&raw_key).ok_or_else(|| Error::internal("row key outside table subspace"))?;
                let key_tuple = kv::tuple::unpack(key_tail)?;
                let value_tuple = kv::tuple::unpack(&raw_value)?;
                let tm = key_tuple
                    .get(1)
                    .and_then(Value::as_timestamp)
                    .ok_or_else(|| Error::internal("_adj_ row missing tm key"))?;
                let px = value_tuple.first().and_then(Value::as_float).unwrap_or(1.0);
                let vol = value_tuple.get(1).and_then(Value::as_float).unwrap_or(1.0);
                rows.push((tm, px, vol));
            }
            rows.sort_by_key(|(tm, _, _)| *tm);
            Ok(rows)
        })?;

        let entries = Arc::new(build_cumulative(&rows));
        self.entries.insert(key, entries.clone());
        Ok(entries)
    }

    pub fn invalidate_database(&self, db: &str) {
        self.entries.retain(|(d, _), _| d != db);
    }

    /// §4.5.5 step 1: the upper-bound index for `tm` in `entries`, via a
    /// full bisection. Used on the first row of a `sec` run and whenever
    /// the run resets; later rows in the same ascending run should call
    /// `advance` from this index instead of re-bisecting.
    pub fn locate(entries: &[AdjEntry], tm: Timestamp) -> usize {
        entries.partition_point(|e| e.tm <= tm)
    }

    /// §4.5.5 steps 2-3: turn an index from `locate`/`advance` into the
    /// `(px_factor, vol_factor)` in force, or `None` if none applies.
    pub fn factor_at(entries: &[AdjEntry], i: usize, backward: bool) -> Option<(f64, f64)> {
        if !backward {
            if i == entries.len() {
                None
            } else {
                Some((entries[i].px_fwd, entries[i].vol_fwd))
            }
        } else if i == 0 {
            None
        } else {
            Some((entries[i - 1].px_back, entries[i - 1].vol_back))
        }
    }

    /// Steps `cursor` forward to the upper-bound index for `tm`, touching
    /// only entries between the old and new position -- the batch-scan
    /// optimization of §4.5.5 ("steps `i` monotonically along `A` rather
    /// than re-bisecting"). Only valid when `tm` is `>=` the `tm` that
    /// produced `cursor`; callers must reset (via `locate`) on a `sec`
    /// change or when `tm` goes backward.
    pub fn advance(entries: &[AdjEntry], cursor: usize, tm: Timestamp) -> usize {
        let mut i = cursor;
        while i < entries.len() && entries[i].tm <= tm {
            i += 1;
        }
        i
    }

    /// Apply §4.5.5 steps 1-4 in one call: locate the adjustment in force
    /// at `tm` and return `(px_factor, vol_factor)`, or `None` if none
    /// applies. Re-bisects from scratch; batch callers scanning many rows
    /// for the same `sec` should use `locate`/`advance`/`factor_at`
    /// directly to stay linear.
    pub fn apply(entries: &[AdjEntry], tm: Timestamp, backward: bool) -> Option<(f64, f64)> {
        Self::factor_at(entries, Self::locate(entries, tm), backward)
    }
}

/// `true` when writing to or deleting from `table` should blow away the
/// database's adjustment cache (§4.5.4, §4.5.2, §9).
pub fn table_invalidates_adjustments(table: &str) -> bool {
    table == ADJ_TABLE
}
