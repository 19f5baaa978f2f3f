//! Query-plan execution operators
//!
//! The planner hands this module a compiled grouping plan (GROUP BY
//! expressions plus projections over an evaluator contract); the
//! grouping executor runs it over a window of input rows and keeps the
//! previous and current result sets apart for downstream diffing.

pub mod aggregate;
pub mod evaluator;
pub mod group_by;

pub use aggregate::{AggregateCall, AggregateFunc, Avg, Count, Max, Min, Sum};
pub use evaluator::{Constant, Evaluator, FieldAccess};
pub use group_by::{
    GroupingExecutor, GroupingPlan, GroupingProcessor, Projection, ResultRow, HAVING_ALIAS,
};
