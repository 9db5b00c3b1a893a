//! Turns a resolved WHERE plan's equal-prefix + optional trailing bound
//! into concrete `[begin, end)` byte keys (§4.4 last paragraph).

use catalog::Schema;
use common::error::Error;
use common::value::RawValue;
use common::CResult;
use kv::{tuple, Subspace};
use resolver::{BoundValue, TrailingBound};
use sql::CompareOp;

pub(crate) fn bind(value: &BoundValue, args: &[RawValue]) -> CResult<RawValue> {
    match value {
        BoundValue::Literal(raw) => Ok(raw.clone()),
        BoundValue::Placeholder(i) => args
            .get(*i)
            .cloned()
            .ok_or_else(|| Error::plan(format!("missing argument for placeholder {i}"))),
    }
}

/// Coerce `values` against `columns`, one-to-one and in order.
pub fn coerce_columns(columns: &[catalog::Column], values: &[BoundValue], args: &[RawValue]) -> CResult<Vec<common::Value>> {
    values
        .iter()
        .zip(columns)
        .map(|(v, col)| {
            let raw = bind(v, args)?;
            common::Value::coerce(col.data_type, &raw, &col.name)
        })
        .collect()
}

/// Coerce an equal-prefix of `BoundValue`s against the schema's key
/// columns, in key order.
pub fn coerce_prefix(schema: &Schema, values: &[BoundValue], args: &[RawValue]) -> CResult<Vec<common::Value>> {
    coerce_columns(&schema.keys, values, args)
}

/// Build the `[begin, end)` byte range for a range-scan plan.
pub fn build_range(
    subspace: &Subspace,
    schema: &Schema,
    equal_prefix: &[common::Value],
    bound: Option<&TrailingBound>,
    args: &[RawValue],
) -> CResult<(Vec<u8>, Vec<u8>)> {
    let prefix_bytes = subspace.pack(equal_prefix);

    let Some(bound) = bound else {
        return Ok((prefix_bytes.clone(), tuple::strinc(&prefix_bytes)));
    };

    let col = &schema.keys[bound.key_index];

    let begin = match &bound.lower {
        None => prefix_bytes.clone(),
        Some((op, v)) => {
            let raw = bind(v, args)?;
            let value = common::Value::coerce(col.data_type, &raw, &col.name)?;
            let mut tuple_values = equal_prefix.to_vec();
            tuple_values.push(value);
            let packed = subspace.pack(&tuple_values);
            match op {
                CompareOp::Ge => packed,
                CompareOp::Gt => tuple::strinc(&packed),
                _ => unreachable!("lower bound op must be > or >="),
            }
        }
    };

    let end = match &bound.upper {
        None => tuple::strinc(&prefix_bytes),
        Some((op, v)) => {
            let raw = bind(v, args)?;
            let value = common::Value::coerce(col.data_type, &raw, &col.name)?;
            let mut tuple_values = equal_prefix.to_vec();
            tuple_values.push(value);
            let packed = subspace.pack(&tuple_values);
            match op {
                CompareOp::Le => tuple::strinc(&packed),
                CompareOp::Lt => packed,
                _ => unreachable!("upper bound op must be < or <="),
            }
        }
    };

    Ok((begin, end))
}
