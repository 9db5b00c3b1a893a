//! `DELETE` execution (§4.4): resolves the same WHERE-to-range plan as
//! `SELECT` and clears either a single key or a key range.

use common::error::Error;
use common::value::RawValue;
use common::CResult;
use kv::{Store, Transaction};
use resolver::{DeletePlan, WherePlan};

use crate::adj::{self, AdjustmentCache};
use crate::range;
use crate::table_path;

pub fn execute_delete<S: Store>(
    store: &S,
    adj_cache: &AdjustmentCache,
    plan: &DeletePlan,
    args: &[RawValue],
) -> CResult<()> {
    let schema = &plan.schema;
    let path = table_path(&plan.database, &plan.table);

    // Invalidate before the transaction commits, not after: a reader that
    // rebuilds the cache between commit and invalidation would otherwise
    // load the now-stale table and no later write would evict it.
    if adj::table_invalidates_adjustments(&plan.table) {
        adj_cache.invalidate_database(&plan.database);
    }

    store.transact(|tx| {
        let subspace = tx
            .dir_open(&path)?
            .ok_or_else(|| Error::schema(format!("table {}.{} does not exist", plan.database, plan.table)))?;

        match &plan.where_plan {
            WherePlan::PointGet(key_values) => {
                let keys = range::coerce_prefix(schema, key_values, args)?;
                tx.clear(&subspace.pack(&keys));
                Ok(())
            }
            WherePlan::RangeScan { equal_prefix, bound } => {
                let prefix = range::coerce_prefix(schema, equal_prefix, args)?;
                let (begin, end) = range::build_range(&subspace, schema, &prefix, bound.as_ref(), args)?;
                tx.clear_range(&begin, &end);
                Ok(())
            }
        }
    })?;

    Ok(())
}
