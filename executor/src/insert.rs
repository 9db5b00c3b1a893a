//! `INSERT` execution (§3 invariant 3, §4.5.2): coerces a resolved
//! `InsertPlan`'s key/value tuples and writes the packed row in one
//! transaction.

use common::error::Error;
use common::value::RawValue;
use common::CResult;
use kv::{tuple, Store, Subspace, Transaction};
use resolver::InsertPlan;

use crate::adj::{self, AdjustmentCache};
use crate::range;
use crate::table_path;

fn write_row(tx: &mut dyn Transaction, subspace: &Subspace, plan: &InsertPlan, args: &[RawValue]) -> CResult<()> {
    let schema = &plan.schema;
    let keys = range::coerce_columns(&schema.keys, &plan.key_values, args)?;
    let values = range::coerce_columns(&schema.values, &plan.value_values, args)?;
    let key_bytes = subspace.pack(&keys);
    let value_bytes = tuple::pack(&values);
    tx.set(&key_bytes, &value_bytes);
    Ok(())
}

pub fn execute_insert<S: Store>(
    store: &S,
    adj_cache: &AdjustmentCache,
    plan: &InsertPlan,
    args: &[RawValue],
) -> CResult<()> {
    let path = table_path(&plan.database, &plan.table);

    store.transact(|tx| {
        let subspace = tx
            .dir_open(&path)?
            .ok_or_else(|| Error::schema(format!("table {}.{} does not exist", plan.database, plan.table)))?;
        write_row(tx, &subspace, plan, args)
    })?;

    if adj::table_invalidates_adjustments(&plan.table) {
        adj_cache.invalidate_database(&plan.database);
    }
    Ok(())
}

/// Write every row of `rows` under one transaction (§4.5.3): the KV has a
/// per-transaction size cap, so splitting oversized batches is the
/// client's job, not this function's.
pub fn execute_batch_insert<S: Store>(
    store: &S,
    adj_cache: &AdjustmentCache,
    plan: &InsertPlan,
    rows: &[Vec<RawValue>],
) -> CResult<()> {
    let path = table_path(&plan.database, &plan.table);

    store.transact(|tx| {
        let subspace = tx
            .dir_open(&path)?
            .ok_or_else(|| Error::schema(format!("table {}.{} does not exist", plan.database, plan.table)))?;
        for args in rows {
            write_row(tx, &subspace, plan, args)?;
        }
        Ok(())
    })?;

    if adj::table_invalidates_adjustments(&plan.table) {
        adj_cache.invalidate_database(&plan.database);
    }
    Ok(())
}
