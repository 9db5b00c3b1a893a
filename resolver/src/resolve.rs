use std::sync::Arc;

use catalog::Schema;
use common::error::Error;
use common::value::{DataType, RawValue};
use common::CResult;
use sql::ast::{self, CompareOp, Literal};

use crate::plan::{
    Adjustment, AdjKind, BoundValue, DeletePlan, InsertPlan, Projection, ProjectionItem, SelectPlan, TrailingBound, WherePlan,
};

fn literal_to_bound(lit: &Literal, placeholders: &mut usize) -> BoundValue {
    match lit {
        Literal::Placeholder => {
            let index = *placeholders;
            *placeholders += 1;
            BoundValue::Placeholder(index)
        }
        Literal::Integer(v) => BoundValue::Literal(RawValue::Integer(*v)),
        Literal::Float(v) => BoundValue::Literal(RawValue::Float(*v)),
        Literal::Text(v) => BoundValue::Literal(RawValue::Text(v.clone())),
        Literal::Boolean(v) => BoundValue::Literal(RawValue::Boolean(*v)),
    }
}

#[derive(Default, Clone)]
struct KeyColumnCond {
    eq: Option<BoundValue>,
    lower: Option<(CompareOp, BoundValue)>,
    upper: Option<(CompareOp, BoundValue)>,
}

impl KeyColumnCond {
    fn is_empty(&self) -> bool {
        self.eq.is_none() && self.lower.is_none() && self.upper.is_none()
    }
}

fn is_lower(op: CompareOp) -> bool {
    matches!(op, CompareOp::Gt | CompareOp::Ge)
}

fn is_upper(op: CompareOp) -> bool {
    matches!(op, CompareOp::Lt | CompareOp::Le)
}

/// Build the WHERE-to-range plan shared by `SELECT` and `DELETE` (§4.4).
fn resolve_where(schema: &Schema, conditions: &[ast::Condition], placeholders: &mut usize) -> CResult<WherePlan> {
    let n = schema.keys.len();
    let mut per_key: Vec<KeyColumnCond> = vec![KeyColumnCond::default(); n];

    for cond in conditions {
        let col = schema
            .column(&cond.column)
            .ok_or_else(|| Error::schema(format!("undefined column name {}", cond.column)))?;
        if !col.is_key {
            return Err(Error::plan(format!(
                "cannot execute this query as it might involve data filtering: {} is not a primary key column",
                cond.column
            )));
        }
        if col.data_type == DataType::Boolean && cond.op != CompareOp::Eq {
            return Err(Error::Type {
                column: cond.column.clone(),
                expected: "Boolean",
                got: "non-equality comparison".to_string(),
            });
        }

        let key_index = col.position as usize;
        let bound = literal_to_bound(&cond.value, placeholders);
        let slot = &mut per_key[key_index];
        match cond.op {
            CompareOp::Eq => {
                if slot.eq.is_some() || slot.lower.is_some() || slot.upper.is_some() {
                    return Err(Error::plan(format!("conflicting conditions on column {}", cond.column)));
                }
                slot.eq = Some(bound);
            }
            op if is_lower(op) => {
                if slot.eq.is_some() {
                    return Err(Error::plan(format!("conflicting conditions on column {}", cond.column)));
                }
                if slot.lower.is_some() {
                    return Err(Error::plan(format!("duplicate lower bound on column {}", cond.column)));
                }
                slot.lower = Some((op, bound));
            }
            op if is_upper(op) => {
                if slot.eq.is_some() {
                    return Err(Error::plan(format!("conflicting conditions on column {}", cond.column)));
                }
                if slot.upper.is_some() {
                    return Err(Error::plan(format!("duplicate upper bound on column {}", cond.column)));
                }
                slot.upper = Some((op, bound));
            }
            _ => unreachable!(),
        }
    }

    let filtering_err = || {
        Error::plan("cannot execute this query as it might involve data filtering".to_string())
    };

    let mut equal_prefix = Vec::new();
    let mut bound_at: Option<(usize, KeyColumnCond)> = None;

    for (i, slot) in per_key.iter().enumerate() {
        if slot.is_empty() {
            break;
        }
        if let Some(eq) = &slot.eq {
            equal_prefix.push(eq.clone());
            continue;
        }
        // A range-only column: must be the last non-empty key column.
        bound_at = Some((i, slot.clone()));
        break;
    }

    let last_bound_index = bound_at.as_ref().map(|(i, _)| *i).unwrap_or(equal_prefix.len());
    for slot in per_key.iter().skip(last_bound_index + 1) {
        if !slot.is_empty() {
            return Err(filtering_err());
        }
    }

    match bound_at {
        None if equal_prefix.len() == n => Ok(WherePlan::PointGet(equal_prefix)),
        None => Ok(WherePlan::RangeScan {
            equal_prefix,
            bound: None,
        }),
        Some((key_index, slot)) => Ok(WherePlan::RangeScan {
            equal_prefix,
            bound: Some(TrailingBound {
                key_index,
                lower: slot.lower,
                upper: slot.upper,
            }),
        }),
    }
}

fn resolve_func(name: ast::FuncName, column: &str) -> AdjKind {
    match name {
        ast::FuncName::AdjPx => AdjKind::Px,
        ast::FuncName::AdjVol => AdjKind::Vol,
        ast::FuncName::Adj => {
            let lower = column.to_ascii_lowercase();
            if lower.contains("qty") || lower.contains("vol") || lower.contains("size") {
                AdjKind::Vol
            } else {
                AdjKind::Px
            }
        }
    }
}

fn resolve_projection(schema: &Schema, projection: &ast::Projection) -> CResult<Projection> {
    let cols = match projection {
        ast::Projection::All => {
            return Ok(Projection::All);
        }
        ast::Projection::Columns(cols) => cols,
    };

    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::with_capacity(cols.len());
    let mut saw_forward = false;
    let mut saw_backward = false;

    for projected in cols {
        if !seen.insert(projected.column.clone()) {
            return Err(Error::plan(format!("duplicate column {} in projection", projected.column)));
        }
        let col = schema
            .column(&projected.column)
            .ok_or_else(|| Error::schema(format!("undefined column name {}", projected.column)))?;

        let adjustment = match &projected.func {
            None => None,
            Some(func) => {
                let first_key_is_int = matches!(
                    schema.keys.first().map(|k| k.data_type),
                    Some(DataType::TinyInt) | Some(DataType::SmallInt) | Some(DataType::Int) | Some(DataType::BigInt)
                );
                let last_key_is_timestamp = matches!(schema.keys.last().map(|k| k.data_type), Some(DataType::Timestamp));
                if !first_key_is_int || !last_key_is_timestamp {
                    return Err(Error::plan(
                        "adjustments require the table's first key to be an integer and its last key a timestamp".to_string(),
                    ));
                }
                let backward = func.backward.unwrap_or(false);
                if backward {
                    saw_backward = true;
                } else {
                    saw_forward = true;
                }
                if saw_backward && saw_forward {
                    return Err(Error::plan("mixing backward and forward adjustments in one select".to_string()));
                }
                Some(Adjustment {
                    kind: resolve_func(func.name, &projected.column),
                    backward,
                })
            }
        };

        items.push(ProjectionItem {
            column_index: col.column_index as usize,
            adjustment,
        });
    }

    Ok(Projection::Columns(items))
}

/// Resolve a parsed `SELECT` against its target schema.
pub fn resolve_select(database: &str, schema: Arc<Schema>, stmt: &ast::SelectStmt) -> CResult<SelectPlan> {
    let mut placeholders = 0usize;
    let where_plan = resolve_where(&schema, &stmt.where_clause, &mut placeholders)?;
    let projection = resolve_projection(&schema, &stmt.projection)?;

    Ok(SelectPlan {
        database: database.to_string(),
        table: stmt.table.table.clone(),
        schema,
        projection,
        where_plan,
        limit: stmt.limit,
        num_placeholders: placeholders,
    })
}

/// Resolve a parsed `DELETE` against its target schema -- identical
/// WHERE-to-range work as `SELECT` (§4.4).
pub fn resolve_delete(database: &str, schema: Arc<Schema>, stmt: &ast::DeleteStmt) -> CResult<DeletePlan> {
    let mut placeholders = 0usize;
    let where_plan = resolve_where(&schema, &stmt.where_clause, &mut placeholders)?;

    Ok(DeletePlan {
        database: database.to_string(),
        table: stmt.table.table.clone(),
        schema,
        where_plan,
        num_placeholders: placeholders,
    })
}

/// Resolve a parsed `INSERT`: every primary-key column must receive a
/// value (literal or placeholder); every other declared column must too,
/// since a row's value tuple is always fully dense (§3 invariant 3).
pub fn resolve_insert(database: &str, schema: Arc<Schema>, stmt: &ast::InsertStmt) -> CResult<InsertPlan> {
    if stmt.columns.len() != stmt.values.len() {
        return Err(Error::plan("column list and values list have different lengths".to_string()));
    }

    let mut placeholders = 0usize;
    let mut key_values: Vec<Option<BoundValue>> = vec![None; schema.keys.len()];
    let mut value_values: Vec<Option<BoundValue>> = vec![None; schema.values.len()];

    for (name, lit) in stmt.columns.iter().zip(stmt.values.iter()) {
        let col = schema
            .column(name)
            .ok_or_else(|| Error::schema(format!("undefined column name {name}")))?;
        let bound = literal_to_bound(lit, &mut placeholders);
        let slot = if col.is_key {
            &mut key_values[col.position as usize]
        } else {
            &mut value_values[col.position as usize]
        };
        if slot.is_some() {
            return Err(Error::plan(format!("duplicate column name {name}")));
        }
        *slot = Some(bound);
    }

    let missing_keys: Vec<String> = schema
        .keys
        .iter()
        .zip(key_values.iter())
        .filter(|(_, v)| v.is_none())
        .map(|(c, _)| c.name.clone())
        .collect();
    if !missing_keys.is_empty() {
        return Err(Error::plan(format!("some primary keys are missing: {}", missing_keys.join(", "))));
    }

    let missing_values: Vec<String> = schema
        .values
        .iter()
        .zip(value_values.iter())
        .filter(|(_, v)| v.is_none())
        .map(|(c, _)| c.name.clone())
        .collect();
    if !missing_values.is_empty() {
        return Err(Error::plan(format!("missing values for columns: {}", missing_values.join(", "))));
    }

    Ok(InsertPlan {
        database: database.to_string(),
        table: stmt.table.table.clone(),
        schema,
        key_values: key_values.into_iter().map(Option::unwrap).collect(),
        value_values: value_values.into_iter().map(Option::unwrap).collect(),
        num_placeholders: placeholders,
    })
}
