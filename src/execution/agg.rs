/// Aggregate planner.
///
/// A `SELECT` with aggregate calls turns into a sequence of map/reduce
/// passes, one per aggregate, executed in dependency order (a sub-aggregate
/// such as the MINMAX backing a HISTOGRAM range always runs before its
/// parent). Target expressions that still depend on row context after
/// stripping aggregates are wrapped in a synthetic PickOne aggregate whose
/// value must be unique within each group.

use crate::error::{EngineError, Result};
use crate::execution::agg_functions::{self, pickone::PickOneAggCall};
use crate::execution::context::{evaluate, AggContext, SharedValues};
use crate::execution::plan::{
    PlanMode, PlanOutput, PlanRunner, Progress, ProgressCB, QueryPlan,
};
use crate::kernel::sort::multi_column_unique;
use crate::kernel::{GroupKey, GroupMap, Value};
use crate::parser::{ExprKind, Expression, NodeId, Select};
use crate::safeevent::SafeEvent;
use crate::store::{Selection, Shard};
use std::collections::HashMap;
use std::sync::Arc;

/// One aggregate operation: per-shard mapper, associative/commutative state
/// reducer, and a finalizer mapping the merged state to its result value.
pub trait AggCall: Send + Sync {
    fn mapper(&self, ctx: &AggContext) -> Result<Value>;
    fn reducer(&self, a: Value, b: Value) -> Result<Value>;
    fn finalizer(&self, state: Value) -> Result<Value>;
}

/// Borrowed view of a `FuncCall` node, handed to aggregate constructors.
pub struct FuncParts<'a> {
    pub name: &'a str,
    pub args: &'a [Expression],
    pub named_args: &'a [(String, Expression)],
    pub agg_star: bool,
}

pub fn func_parts(e: &Expression) -> Option<FuncParts<'_>> {
    match &e.kind {
        ExprKind::FuncCall {
            name,
            args,
            named_args,
            agg_star,
        } => Some(FuncParts {
            name,
            args,
            named_args,
            agg_star: *agg_star,
        }),
        _ => None,
    }
}

pub struct PlannedAgg {
    pub call: Arc<dyn AggCall>,
    /// The target-list expression this pass computes, when it is one.
    pub expr_id: Option<NodeId>,
}

/// Collects passes during plan construction. Aggregate constructors register
/// their sub-aggregates here, which places dependencies ahead of dependents.
#[derive(Default)]
pub struct AggPlanner {
    passes: Vec<PlannedAgg>,
}

impl AggPlanner {
    /// Registers a dependency pass and returns its index.
    pub fn add_sub(&mut self, call: Arc<dyn AggCall>) -> usize {
        self.passes.push(PlannedAgg {
            call,
            expr_id: None,
        });
        self.passes.len() - 1
    }
}

pub struct AggPlan {
    passes: Vec<PlannedAgg>,
    expr_to_pass: HashMap<NodeId, usize>,
}

impl AggPlan {
    /// Walks every target expression, instantiating each top-level aggregate
    /// call (with its sub-aggregates first) and wrapping context-dependent
    /// targets in PickOne.
    pub fn build(select: &Select) -> Result<AggPlan> {
        let mut planner = AggPlanner::default();
        let mut expr_to_pass = HashMap::new();

        for target in &select.target_list {
            let mut agg_nodes: Vec<&Expression> = Vec::new();
            target.expr.walk_pruned(
                &mut |e| {
                    if is_agg_call(e) {
                        agg_nodes.push(e);
                    }
                },
                &|e| is_agg_call(e),
            );
            for e in agg_nodes {
                let parts = func_parts(e).expect("aggregate node is a function call");
                let call = agg_functions::instantiate(&parts, &mut planner)?;
                planner.passes.push(PlannedAgg {
                    call,
                    expr_id: Some(e.id),
                });
                expr_to_pass.insert(e.id, planner.passes.len() - 1);
            }
            if is_context_dependent(&target.expr) {
                let call = Arc::new(PickOneAggCall::new(target.expr.clone()));
                planner.passes.push(PlannedAgg {
                    call,
                    expr_id: Some(target.expr.id),
                });
                expr_to_pass.insert(target.expr.id, planner.passes.len() - 1);
            }
        }

        if planner.passes.is_empty() {
            return Err(EngineError::Sql("no aggregation operation".to_string()));
        }
        Ok(AggPlan {
            passes: planner.passes,
            expr_to_pass,
        })
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass(&self, i: usize) -> Result<&PlannedAgg> {
        self.passes
            .get(i)
            .ok_or_else(|| EngineError::Internal(format!("no aggregate pass {}", i)))
    }

    pub fn pass_of_expr(&self, id: NodeId) -> Option<usize> {
        self.expr_to_pass.get(&id).copied()
    }
}

pub fn is_agg_call(e: &Expression) -> bool {
    matches!(&e.kind, ExprKind::FuncCall { name, .. } if agg_functions::is_aggregate(name))
}

/// Whether the expression references columns outside of aggregate calls.
pub fn is_context_dependent(root: &Expression) -> bool {
    let mut dependent = false;
    root.walk_pruned(
        &mut |e| {
            if matches!(e.kind, ExprKind::ColumnRef(_)) {
                dependent = true;
            }
        },
        &|e| is_agg_call(e),
    );
    dependent
}

pub fn check_select(select: &Select) -> Result<()> {
    if select.order_by.is_some() {
        return Err(EngineError::Sql(
            "ORDER BY clause is not allowed in aggregation query".to_string(),
        ));
    }
    if select.limit.is_some() {
        return Err(EngineError::Sql(
            "LIMIT clause is not allowed in aggregation query".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// One pass over one shard.

/// Mapper for aggregate pass `pass`: apply WHERE, split into groups, run the
/// aggregate's own mapper on each per-group slice. Shards left empty after
/// WHERE contribute an empty map.
pub fn map_shard(
    select: &Select,
    plan: &AggPlan,
    pass: usize,
    prior: &[GroupMap],
    shared: &Arc<SharedValues>,
    shard: Arc<dyn Shard>,
) -> Result<GroupMap> {
    let agg = plan.pass(pass)?;
    let ctx = AggContext::new(shard, shared.clone(), plan, prior, GroupKey::none());
    let ctx = match &select.where_clause {
        Some(w) => {
            let mask = evaluate(w, &ctx)?.into_mask(ctx.size())?;
            ctx.sliced(&Selection::Mask(mask), GroupKey::none())?
        }
        None => ctx,
    };

    let mut out = GroupMap::new();
    match &select.group_by {
        Some(group_exprs) => {
            if ctx.size() == 0 {
                return Ok(out);
            }
            let cols = group_exprs
                .iter()
                .map(|g| evaluate(g, &ctx)?.into_vector(ctx.size()))
                .collect::<Result<Vec<_>>>()?;
            let (keys, group_index) = multi_column_unique(&cols)?;
            for (k, key_values) in keys.into_iter().enumerate() {
                let mask: Vec<bool> = group_index.iter().map(|&g| g == k).collect();
                let key = GroupKey::tuple(key_values);
                let group_ctx = ctx.sliced(&Selection::Mask(mask), key.clone())?;
                out.insert(key, agg.call.mapper(&group_ctx)?);
            }
        }
        None => {
            if ctx.size() > 0 {
                out.insert(GroupKey::none(), agg.call.mapper(&ctx)?);
            }
        }
    }
    Ok(out)
}

pub fn reduce(plan: &AggPlan, pass: usize, mut a: GroupMap, b: GroupMap) -> Result<GroupMap> {
    let agg = plan.pass(pass)?;
    a.merge(b, |x, y| agg.call.reducer(x, y))?;
    Ok(a)
}

pub fn finalize(plan: &AggPlan, pass: usize, acc: Option<GroupMap>) -> Result<GroupMap> {
    let agg = plan.pass(pass)?;
    match acc {
        None => Ok(GroupMap::new()),
        Some(map) => map.map_values(|v| agg.call.finalizer(v)),
    }
}

// ---------------------------------------------------------------------------
// Multi-pass driver.

pub struct AggQueryResult {
    /// Per distinct group key, the evaluated target values in order.
    pub groups: Vec<(GroupKey, Vec<Value>)>,
    pub target_names: Vec<String>,
}

pub async fn run_agg_query(
    select: &Select,
    runner: &dyn PlanRunner,
    shared: &SharedValues,
    progress: Option<ProgressCB>,
    interrupt: &SafeEvent,
) -> Result<AggQueryResult> {
    check_select(select)?;
    let plan = AggPlan::build(select)?;
    let n_passes = plan.len() as u64;

    let mut results: Vec<GroupMap> = Vec::new();
    for pass in 0..plan.len() {
        let query_plan = QueryPlan {
            select: select.clone(),
            mode: PlanMode::AggPass {
                pass,
                prior: results.clone(),
            },
        };
        // Pass totals are identical across passes (same shard chunks), so
        // per-pass progress scales into one monotonic sequence.
        let pass_progress: Option<ProgressCB> = progress.as_ref().map(|outer| {
            let outer = outer.clone();
            let pass = pass as u64;
            Arc::new(move |p: Progress| {
                let total = p.total.max(1);
                outer(Progress {
                    done: pass * total + p.done,
                    total: n_passes * total,
                    data: None,
                });
            }) as ProgressCB
        });
        let out = runner
            .run(&query_plan, shared, pass_progress, interrupt)
            .await?;
        match out {
            PlanOutput::Groups(map) => results.push(map),
            PlanOutput::Table(_) => {
                return Err(EngineError::Internal(
                    "aggregate pass returned a row table".to_string(),
                ))
            }
        }
    }

    // Assemble the result table: group keys come from the first pass.
    let shared = Arc::new(shared.clone());
    let group_keys: Vec<GroupKey> = results[0].keys().cloned().collect();
    let mut groups = Vec::with_capacity(group_keys.len());
    for key in group_keys {
        let ctx = AggContext::finalize(shared.clone(), &plan, &results, key.clone());
        let mut row = Vec::with_capacity(select.target_list.len());
        for target in &select.target_list {
            let value = match plan.pass_of_expr(target.expr.id) {
                Some(pass) => results[pass]
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::Sql("no aggregate result for this group".to_string())
                    })?,
                None => evaluate(&target.expr, &ctx)?,
            };
            row.push(value);
        }
        groups.push((key, row));
    }

    Ok(AggQueryResult {
        groups,
        target_names: select.target_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Select;

    #[test]
    fn plan_orders_dependencies_first() {
        let select = Select::parse("SELECT histogram(flux) FROM t").unwrap();
        let plan = AggPlan::build(&select).unwrap();
        // MINMAX sub-aggregate precedes the histogram pass.
        assert_eq!(plan.len(), 2);
        assert!(plan.pass(0).unwrap().expr_id.is_none());
        assert!(plan.pass(1).unwrap().expr_id.is_some());
    }

    #[test]
    fn context_dependent_targets_get_pickone() {
        let select =
            Select::parse("SELECT object_id % 2, count(*) FROM t GROUP BY object_id % 2").unwrap();
        let plan = AggPlan::build(&select).unwrap();
        assert_eq!(plan.len(), 2);
        // Both targets resolve to a pass.
        for t in &select.target_list {
            assert!(plan.pass_of_expr(t.expr.id).is_some());
        }
    }

    #[test]
    fn constant_folding_of_agg_targets_needs_no_pickone() {
        let select = Select::parse("SELECT 2 * count(*) FROM t").unwrap();
        let plan = AggPlan::build(&select).unwrap();
        assert_eq!(plan.len(), 1);
        // The product expression itself is not a pass; it is evaluated in
        // the finalize phase over the count result.
        assert!(plan.pass_of_expr(select.target_list[0].expr.id).is_none());
    }

    #[test]
    fn no_aggregates_is_an_error() {
        let select = Select::parse("SELECT object_id FROM t").unwrap();
        assert!(AggPlan::build(&select).is_err());
    }

    #[test]
    fn order_and_limit_are_rejected() {
        let select = Select::parse("SELECT count(*) FROM t ORDER BY x LIMIT 1").unwrap();
        assert!(check_select(&select).is_err());
    }
}
