//! `SELECT` execution (§4.4, §4.5.5): turns a resolved `SelectPlan` into
//! concrete key-value operations, unpacks rows, and applies adjustments.

use std::sync::Arc;

use catalog::Schema;
use common::error::Error;
use common::value::{RawValue, Value};
use common::CResult;
use kv::{tuple, Store, Transaction};
use resolver::{AdjKind, Projection, SelectPlan, WherePlan};

use crate::adj::{AdjEntry, AdjustmentCache, Timestamp};
use crate::range;
use crate::table_path;

/// One fetched row, in declared-column order.
pub type Row = Vec<Value>;

fn assemble_row(schema: &Schema, key_tuple: &[Value], value_tuple: &[Value]) -> Row {
    let mut row = vec![Value::Boolean(false); schema.columns.len()];
    for (i, col) in schema.keys.iter().enumerate() {
        row[col.column_index as usize] = key_tuple[i].clone();
    }
    for (i, col) in schema.values.iter().enumerate() {
        row[col.column_index as usize] = value_tuple[i].clone();
    }
    row
}

fn fetch_rows<S: Store>(store: &S, plan: &SelectPlan, args: &[RawValue]) -> CResult<Vec<Row>> {
    let path = table_path(&plan.database, &plan.table);
    let schema = &plan.schema;

    store.transact(|tx| {
        let subspace = tx
            .dir_open(&path)?
            .ok_or_else(|| Error::schema(format!("table {}.{} does not exist", plan.database, plan.table)))?;

        match &plan.where_plan {
            WherePlan::PointGet(key_values) => {
                let keys = range::coerce_prefix(schema, key_values, args)?;
                let key_bytes = subspace.pack(&keys);
                match tx.get(&key_bytes)? {
                    None => Ok(Vec::new()),
                    Some(raw_value) => {
                        let value_tuple = tuple::unpack(&raw_value)?;
                        Ok(vec![assemble_row(schema, &keys, &value_tuple)])
                    }
                }
            }
            WherePlan::RangeScan { equal_prefix, bound } => {
                let prefix = range::coerce_prefix(schema, equal_prefix, args)?;
                let (begin, end) = range::build_range(&subspace, schema, &prefix, bound.as_ref(), args)?;
                let (limit, reverse) = match plan.limit {
                    Some(n) if n < 0 => (Some((-n) as usize), true),
                    Some(n) => (Some(n as usize), false),
                    None => (None, false),
                };
                let pairs = tx.range(&begin, &end, limit, reverse)?;
                let mut rows = Vec::with_capacity(pairs.len());
                for (raw_key, raw_value) in pairs {
                    let key_tail = subspace
                        .unpack(&raw_key)
                        .ok_or_else(|| Error::internal("row key outside table subspace"))?;
                    let key_tuple = tuple::unpack(key_tail)?;
                    let value_tuple = tuple::unpack(&raw_value)?;
                    rows.push(assemble_row(schema, &key_tuple, &value_tuple));
                }
                Ok(rows)
            }
        }
    })
}

/// §4.5.5's batch pass: one `(px_factor, vol_factor)` (or `None`) per row,
/// computed in one left-to-right walk. Rows arrive in scan order, so
/// consecutive rows sharing a `sec` with non-decreasing `tm` step the
/// cursor forward along that `sec`'s table instead of re-bisecting;
/// a `sec` change or a `tm` that goes backward resets it.
fn adjustment_factors<S: Store>(
    store: &S,
    cache: &AdjustmentCache,
    db: &str,
    schema: &Schema,
    rows: &[Row],
    backward: bool,
) -> CResult<Vec<Option<(f64, f64)>>> {
    let sec_col = schema.keys[0].column_index as usize;
    let tm_col = schema.keys.last().unwrap().column_index as usize;

    let mut run: Option<(i64, Arc<Vec<AdjEntry>>, usize, Timestamp)> = None;
    let mut factors = Vec::with_capacity(rows.len());

    for row in rows {
        let sec = row[sec_col].as_int().ok_or_else(|| Error::internal("adjustment requires an integer first key"))?;
        let tm = row[tm_col].as_timestamp().ok_or_else(|| Error::internal("adjustment requires a timestamp last key"))?;

        let (entries, cursor) = match &mut run {
            Some((run_sec, entries, cursor, last_tm)) if *run_sec == sec && tm >= *last_tm => {
                *cursor = AdjustmentCache::advance(entries, *cursor, tm);
                *last_tm = tm;
                (entries.clone(), *cursor)
            }
            _ => {
                let entries = cache.get_or_build(store, db, sec)?;
                let cursor = AdjustmentCache::locate(&entries, tm);
                run = Some((sec, entries.clone(), cursor, tm));
                (entries, cursor)
            }
        };

        factors.push(AdjustmentCache::factor_at(&entries, cursor, backward));
    }

    Ok(factors)
}

/// Run a resolved `SELECT`, returning rows projected and adjusted per plan.
pub fn execute_select<S: Store>(
    store: &S,
    adj_cache: &AdjustmentCache,
    plan: &SelectPlan,
    args: &[RawValue],
) -> CResult<Vec<Row>> {
    let rows = fetch_rows(store, plan, args)?;

    match &plan.projection {
        Projection::All => Ok(rows),
        Projection::Columns(items) => {
            // Every adjusted item in one SELECT shares a direction (the
            // resolver rejects mixing), so the batch pass only needs it once.
            let factors = match items.iter().find_map(|item| item.adjustment.map(|a| a.backward)) {
                Some(backward) => Some(adjustment_factors(store, adj_cache, &plan.database, &plan.schema, &rows, backward)?),
                None => None,
            };

            let mut out = Vec::with_capacity(rows.len());
            for (row_index, row) in rows.iter().enumerate() {
                let mut projected = Vec::with_capacity(items.len());
                for item in items {
                    let mut value = row[item.column_index].clone();
                    if let Some(adjustment) = item.adjustment {
                        let factor = factors.as_ref().and_then(|f| f[row_index]);
                        let scale = match (factor, adjustment.kind) {
                            (Some((px, _)), AdjKind::Px) => px,
                            (Some((_, vol)), AdjKind::Vol) => vol,
                            (None, _) => 1.0,
                        };
                        value = value.scaled(scale);
                    }
                    projected.push(value);
                }
                out.push(projected);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use common::value::DataType;
    use kv::MemoryStore;
    use resolver::BoundValue;

    use super::*;

    fn setup() -> (MemoryStore, Arc<Schema>) {
        let store = MemoryStore::new();
        catalog::create_database(&store, "t").unwrap();
        let defs = vec![
            ("sec".to_string(), DataType::Int),
            ("tm".to_string(), DataType::Timestamp),
            ("px".to_string(), DataType::Double),
        ];
        catalog::create_table(&store, "t", "quote", &defs, &["sec".to_string(), "tm".to_string()], false).unwrap();
        let cache = catalog::SchemaCache::new();
        let schema = cache.get_or_load(&store, "t", "quote").unwrap();

        store
            .transact(|tx| {
                let sub = tx.dir_open(&table_path("t", "quote"))?.unwrap();
                for (sec, tm, px) in [(1i32, 1i64, 10.0f64), (1, 2, 11.0), (2, 1, 20.0)] {
                    let key = sub.pack(&[Value::Int(sec), Value::Timestamp(tm, 0)]);
                    let value = tuple::pack(&[Value::Double(px)]);
                    tx.set(&key, &value);
                }
                Ok(())
            })
            .unwrap();

        (store, schema)
    }

    #[test]
    fn point_get_returns_the_matching_row() {
        let (store, schema) = setup();
        let plan = SelectPlan {
            database: "t".to_string(),
            table: "quote".to_string(),
            schema,
            projection: Projection::All,
            where_plan: WherePlan::PointGet(vec![
                BoundValue::Literal(RawValue::Integer(1)),
                BoundValue::Literal(RawValue::TimestampPair(2, 0)),
            ]),
            limit: None,
            num_placeholders: 0,
        };
        let cache = AdjustmentCache::new();
        let rows = execute_select(&store, &cache, &plan, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], Value::Double(11.0));
    }

    #[test]
    fn range_scan_returns_every_matching_row() {
        let (store, schema) = setup();
        let plan = SelectPlan {
            database: "t".to_string(),
            table: "quote".to_string(),
            schema,
            projection: Projection::All,
            where_plan: WherePlan::RangeScan {
                equal_prefix: vec![BoundValue::Literal(RawValue::Integer(1))],
                bound: None,
            },
            limit: None,
            num_placeholders: 0,
        };
        let cache = AdjustmentCache::new();
        let rows = execute_select(&store, &cache, &plan, &[]).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn missing_point_get_returns_no_rows() {
        let (store, schema) = setup();
        let plan = SelectPlan {
            database: "t".to_string(),
            table: "quote".to_string(),
            schema,
            projection: Projection::All,
            where_plan: WherePlan::PointGet(vec![
                BoundValue::Literal(RawValue::Integer(9)),
                BoundValue::Literal(RawValue::TimestampPair(9, 0)),
            ]),
            limit: None,
            num_placeholders: 0,
        };
        let cache = AdjustmentCache::new();
        let rows = execute_select(&store, &cache, &plan, &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn adjusted_projection_scales_the_value() {
        let (store, schema) = setup();

        let adj_defs_table = table_path("t", catalog::ADJ_TABLE);
        store
            .transact(|tx| {
                let sub = tx.dir_open(&adj_defs_table)?.unwrap();
                let key = sub.pack(&[Value::Int(1), Value::Timestamp(2, 0)]);
                let value = tuple::pack(&[Value::Double(0.5), Value::Double(1.0)]);
                tx.set(&key, &value);
                Ok(())
            })
            .unwrap();

        let plan = SelectPlan {
            database: "t".to_string(),
            table: "quote".to_string(),
            schema: schema.clone(),
            projection: Projection::Columns(vec![resolver::ProjectionItem {
                column_index: 2,
                adjustment: Some(resolver::Adjustment { kind: AdjKind::Px, backward: false }),
            }]),
            where_plan: WherePlan::PointGet(vec![
                BoundValue::Literal(RawValue::Integer(1)),
                BoundValue::Literal(RawValue::TimestampPair(1, 0)),
            ]),
            limit: None,
            num_placeholders: 0,
        };
        let cache = AdjustmentCache::new();
        let rows = execute_select(&store, &cache, &plan, &[]).unwrap();
        assert_eq!(rows[0][0], Value::Double(5.0));
    }
}
