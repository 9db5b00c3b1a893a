pub mod plan;
pub mod resolve;

pub use plan::{AdjKind, Adjustment, BoundValue, DeletePlan, InsertPlan, Projection, ProjectionItem, SelectPlan, TrailingBound, WherePlan};
pub use resolve::{resolve_delete, resolve_insert, resolve_select};
