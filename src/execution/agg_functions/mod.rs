/// Built-in aggregate registry. Fixed per release: plans reference these by
/// name, so master and workers must agree on the set.

pub mod count;
pub mod crossmatch;
pub mod histogram;
pub mod histogram2d;
pub mod minmax;
pub mod pickone;
pub mod sleep;
pub mod sum;

use crate::error::Result;
use crate::execution::agg::{AggCall, AggPlanner, FuncParts};
use std::sync::Arc;

const AGGREGATE_NAMES: &[&str] = &[
    "count",
    "sum",
    "min",
    "max",
    "minmax",
    "histogram",
    "histogram2d",
    "crossmatch",
    "sleep",
];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATE_NAMES.contains(&name)
}

/// Instantiates the aggregate for a call node, registering any
/// sub-aggregates it depends on with the planner first.
pub fn instantiate(parts: &FuncParts<'_>, planner: &mut AggPlanner) -> Result<Arc<dyn AggCall>> {
    match parts.name {
        "count" => count::plan(parts),
        "sum" => sum::plan(parts),
        "min" => minmax::plan(parts, minmax::Output::Min),
        "max" => minmax::plan(parts, minmax::Output::Max),
        "minmax" => minmax::plan(parts, minmax::Output::Pair),
        "histogram" => histogram::plan(parts, planner),
        "histogram2d" => histogram2d::plan(parts, planner),
        "crossmatch" => crossmatch::plan(parts),
        "sleep" => sleep::plan(parts),
        other => Err(crate::error::EngineError::Internal(format!(
            "not an aggregate: {}",
            other
        ))),
    }
}
