//! The shapes a parse tree resolves to (§4.4): a validated plan that
//! owns a reference to the schema (shared with the process-wide schema
//! cache) and defers argument binding to execute time.

use std::sync::Arc;

use catalog::Schema;
use common::value::RawValue;
use sql::CompareOp;

/// A value known at resolve time, or a positional placeholder bound at
/// execute time. Both funnel through the same coercion path (§4.3) once
/// the executor knows the declared column type.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Literal(RawValue),
    Placeholder(usize),
}

#[derive(Debug, Clone)]
pub struct TrailingBound {
    pub key_index: usize,
    pub lower: Option<(CompareOp, BoundValue)>,
    pub upper: Option<(CompareOp, BoundValue)>,
}

/// The outcome of WHERE-to-range resolution (§4.4), shared by `SELECT`
/// and `DELETE`.
#[derive(Debug, Clone)]
pub enum WherePlan {
    /// Every key column is bound by `=`: a single-key read or clear.
    PointGet(Vec<BoundValue>),
    /// `equal_prefix` holds `=` bindings for a leading run of key
    /// columns; `bound` optionally narrows the first unbound key column.
    RangeScan {
        equal_prefix: Vec<BoundValue>,
        bound: Option<TrailingBound>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjKind {
    Px,
    Vol,
}

#[derive(Debug, Clone, Copy)]
pub struct Adjustment {
    pub kind: AdjKind,
    pub backward: bool,
}

/// One resolved output column: its position in `Schema::columns`, plus
/// an optional adjustment to apply to its unpacked value.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionItem {
    pub column_index: usize,
    pub adjustment: Option<Adjustment>,
}

#[derive(Debug, Clone)]
pub enum Projection {
    All,
    Columns(Vec<ProjectionItem>),
}

#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub database: String,
    pub table: String,
    pub schema: Arc<Schema>,
    pub projection: Projection,
    pub where_plan: WherePlan,
    /// Positive: forward scan with this limit. Negative: reverse scan
    /// with limit `|n|`. Absent: unbounded.
    pub limit: Option<i64>,
    pub num_placeholders: usize,
}

#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub database: String,
    pub table: String,
    pub schema: Arc<Schema>,
    /// In key order, one entry per key column.
    pub key_values: Vec<BoundValue>,
    /// In value order, one entry per non-key column.
    pub value_values: Vec<BoundValue>,
    pub num_placeholders: usize,
}

#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub database: String,
    pub table: String,
    pub schema: Arc<Schema>,
    pub where_plan: WherePlan,
    pub num_placeholders: usize,
}
