/// Evaluation contexts.
///
/// A `Context` binds an expression tree to a shard, the client-provided
/// shared values and, during aggregate plans, the table of already-computed
/// aggregate results. Evaluation is a double dispatch: `evaluate` walks the
/// tree and calls one hook per node kind, so a context can override exactly
/// the bindings it cares about.

use crate::error::{EngineError, Result};
use crate::execution::agg::AggPlan;
use crate::execution::functions;
use crate::kernel::ops::{self, BinOp, BoolOp, UnaryOp};
use crate::kernel::{GroupKey, GroupMap, Value};
use crate::parser::{ExprKind, Expression};
use crate::store::{self, Selection, Shard};
use std::collections::HashMap;
use std::sync::Arc;

pub type SharedValues = HashMap<String, Value>;

pub trait Context {
    fn evaluate_column_ref(&self, path: &[String]) -> Result<Value>;

    fn evaluate_shared_ref(&self, name: &str) -> Result<Value>;

    /// Receives the unevaluated call node: aggregate-aware contexts resolve
    /// memoized results without touching the arguments.
    fn evaluate_func_call(&self, e: &Expression) -> Result<Value>;

    fn evaluate_unary_op(&self, op: UnaryOp, arg: Value) -> Result<Value> {
        ops::unary_op(op, &arg)
    }

    fn evaluate_binary_op(&self, op: BinOp, left: Value, right: Value) -> Result<Value> {
        ops::binary_op(op, &left, &right)
    }

    fn evaluate_between(&self, arg: Value, low: Value, high: Value, negated: bool) -> Result<Value> {
        ops::between(&arg, &low, &high, negated)
    }

    fn evaluate_bool_op(&self, op: BoolOp, args: Vec<Value>) -> Result<Value> {
        ops::bool_op(op, &args)
    }

    fn evaluate_row(&self, args: Vec<Value>) -> Result<Value> {
        Ok(Value::Row(args))
    }

    fn evaluate_indirection(&self, arg: Value, index: i64) -> Result<Value> {
        ops::indirection(&arg, index)
    }
}

pub fn evaluate<C: Context + ?Sized>(e: &Expression, ctx: &C) -> Result<Value> {
    match &e.kind {
        ExprKind::Const(s) => Ok(Value::Scalar(s.clone())),
        ExprKind::ColumnRef(path) => ctx.evaluate_column_ref(path),
        ExprKind::SharedRef(name) => ctx.evaluate_shared_ref(name),
        ExprKind::Unary { op, arg } => {
            let v = evaluate(arg, ctx)?;
            ctx.evaluate_unary_op(*op, v)
        }
        ExprKind::Binary { op, left, right } => {
            let l = evaluate(left, ctx)?;
            let r = evaluate(right, ctx)?;
            ctx.evaluate_binary_op(*op, l, r)
        }
        ExprKind::Between {
            arg,
            low,
            high,
            negated,
        } => {
            let a = evaluate(arg, ctx)?;
            let b = evaluate(low, ctx)?;
            let c = evaluate(high, ctx)?;
            ctx.evaluate_between(a, b, c, *negated)
        }
        ExprKind::Bool { op, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, ctx))
                .collect::<Result<Vec<_>>>()?;
            ctx.evaluate_bool_op(*op, values)
        }
        ExprKind::FuncCall { .. } => ctx.evaluate_func_call(e),
        ExprKind::Row(args) => {
            let values = args
                .iter()
                .map(|a| evaluate(a, ctx))
                .collect::<Result<Vec<_>>>()?;
            ctx.evaluate_row(values)
        }
        ExprKind::Indirection { arg, index } => {
            let v = evaluate(arg, ctx)?;
            ctx.evaluate_indirection(v, *index)
        }
    }
}

/// Evaluates a function call's arguments and dispatches to the scalar table.
fn scalar_func_call<C: Context + ?Sized>(e: &Expression, ctx: &C) -> Result<Value> {
    let (name, args, named_args, agg_star) = match &e.kind {
        ExprKind::FuncCall {
            name,
            args,
            named_args,
            agg_star,
        } => (name, args, named_args, agg_star),
        _ => return Err(EngineError::Internal("not a function call".to_string())),
    };
    let f = functions::lookup(name)
        .ok_or_else(|| EngineError::Sql(format!("no such function: {}", name)))?;
    if *agg_star {
        return Err(EngineError::Sql(format!(
            "\"*\" is not allowed here: {}",
            name
        )));
    }
    let arg_values = args
        .iter()
        .map(|a| evaluate(a, ctx))
        .collect::<Result<Vec<_>>>()?;
    let named_values = named_args
        .iter()
        .map(|(k, a)| Ok((k.clone(), evaluate(a, ctx)?)))
        .collect::<Result<Vec<_>>>()?;
    f(&arg_values, &named_values)
}

/// Row-phase context over one shard.
#[derive(Clone)]
pub struct ShardContext {
    shard: Arc<dyn Shard>,
    shared: Arc<SharedValues>,
}

impl ShardContext {
    pub fn new(shard: Arc<dyn Shard>, shared: Arc<SharedValues>) -> ShardContext {
        ShardContext { shard, shared }
    }

    pub fn size(&self) -> usize {
        self.shard.size()
    }

    pub fn sliced(&self, sel: &Selection) -> ShardContext {
        ShardContext {
            shard: store::slice(&self.shard, sel),
            shared: self.shared.clone(),
        }
    }
}

impl Context for ShardContext {
    fn evaluate_column_ref(&self, path: &[String]) -> Result<Value> {
        Ok(Value::Array(self.shard.column(path)?))
    }

    fn evaluate_shared_ref(&self, name: &str) -> Result<Value> {
        self.shared
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Sql(format!("no such shared value: {}", name)))
    }

    fn evaluate_func_call(&self, e: &Expression) -> Result<Value> {
        scalar_func_call(e, self)
    }
}

/// Aggregate-phase context: optionally bound to a shard (mapper phase) or
/// not (finalize phase), carrying completed pass results for one group.
pub struct AggContext<'a> {
    shard: Option<Arc<dyn Shard>>,
    shared: Arc<SharedValues>,
    plan: &'a AggPlan,
    results: &'a [GroupMap],
    group: GroupKey,
}

impl<'a> AggContext<'a> {
    pub fn new(
        shard: Arc<dyn Shard>,
        shared: Arc<SharedValues>,
        plan: &'a AggPlan,
        results: &'a [GroupMap],
        group: GroupKey,
    ) -> AggContext<'a> {
        AggContext {
            shard: Some(shard),
            shared,
            plan,
            results,
            group,
        }
    }

    /// Finalize-phase context: column references fail here.
    pub fn finalize(
        shared: Arc<SharedValues>,
        plan: &'a AggPlan,
        results: &'a [GroupMap],
        group: GroupKey,
    ) -> AggContext<'a> {
        AggContext {
            shard: None,
            shared,
            plan,
            results,
            group,
        }
    }

    pub fn size(&self) -> usize {
        self.shard.as_ref().map(|s| s.size()).unwrap_or(0)
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn sliced(&self, sel: &Selection, group: GroupKey) -> Result<AggContext<'a>> {
        let shard = self
            .shard
            .as_ref()
            .ok_or_else(|| EngineError::Internal("cannot slice a finalize context".to_string()))?;
        Ok(AggContext {
            shard: Some(store::slice(shard, sel)),
            shared: self.shared.clone(),
            plan: self.plan,
            results: self.results,
            group,
        })
    }

    /// The memoized result of a completed pass for the current group.
    pub fn pass_result(&self, pass: usize) -> Result<Value> {
        let table = self.results.get(pass).ok_or_else(|| {
            EngineError::Internal(format!("aggregate pass {} has not been run", pass))
        })?;
        table.get(&self.group).cloned().ok_or_else(|| {
            EngineError::Sql("no aggregate result for this group".to_string())
        })
    }
}

impl Context for AggContext<'_> {
    fn evaluate_column_ref(&self, path: &[String]) -> Result<Value> {
        match &self.shard {
            Some(shard) => Ok(Value::Array(shard.column(path)?)),
            None => Err(EngineError::Sql(format!(
                "column `{}` cannot be referenced outside an aggregate here",
                path.join(".")
            ))),
        }
    }

    fn evaluate_shared_ref(&self, name: &str) -> Result<Value> {
        self.shared
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Sql(format!("no such shared value: {}", name)))
    }

    fn evaluate_func_call(&self, e: &Expression) -> Result<Value> {
        if let Some(pass) = self.plan.pass_of_expr(e.id) {
            if pass < self.results.len() {
                return self.pass_result(pass);
            }
            return Err(EngineError::Internal(format!(
                "aggregate pass {} evaluated before its result is available",
                pass
            )));
        }
        scalar_func_call(e, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Vector;
    use crate::store::memory::MemoryShard;

    fn context() -> ShardContext {
        let shard = MemoryShard::builder()
            .column("object_id", Vector::Int(vec![1, 2, 3, 4]))
            .column("flux", Vector::Float(vec![0.5, f64::NAN, 2.0, 4.0]))
            .build();
        let mut shared = SharedValues::new();
        shared.insert("threshold".to_string(), Value::int(2));
        ShardContext::new(shard, Arc::new(shared))
    }

    fn eval(ctx: &ShardContext, sql: &str) -> Value {
        let select = crate::parser::Select::parse(&format!("SELECT {} FROM t LIMIT 1", sql)).unwrap();
        evaluate(&select.target_list[0].expr, ctx).unwrap()
    }

    #[test]
    fn column_refs_load_vectors() {
        let ctx = context();
        assert_eq!(
            eval(&ctx, "object_id"),
            Value::vector(Vector::Int(vec![1, 2, 3, 4]))
        );
    }

    #[test]
    fn arithmetic_over_columns() {
        let ctx = context();
        assert_eq!(
            eval(&ctx, "object_id % 2"),
            Value::vector(Vector::Int(vec![1, 0, 1, 0]))
        );
        assert_eq!(
            eval(&ctx, "object_id * 2 + 1"),
            Value::vector(Vector::Int(vec![3, 5, 7, 9]))
        );
    }

    #[test]
    fn shared_values_resolve() {
        let ctx = context();
        assert_eq!(eval(&ctx, "shared.threshold"), Value::int(2));
        assert_eq!(
            eval(&ctx, "object_id > shared.threshold"),
            Value::vector(Vector::Bool(vec![false, false, true, true]))
        );
    }

    #[test]
    fn scalar_functions_dispatch() {
        let ctx = context();
        assert_eq!(
            eval(&ctx, "isnan(flux)"),
            Value::vector(Vector::Bool(vec![false, true, false, false]))
        );
    }

    #[test]
    fn unknown_function_is_a_sql_error() {
        let ctx = context();
        let select = crate::parser::Select::parse("SELECT no_such(object_id) FROM t LIMIT 1").unwrap();
        let err = evaluate(&select.target_list[0].expr, &ctx).unwrap_err();
        assert!(err.to_string().contains("no such function"));
    }

    #[test]
    fn sliced_context_shrinks_columns() {
        let ctx = context();
        let sliced = ctx.sliced(&Selection::Mask(vec![true, false, true, false]));
        assert_eq!(sliced.size(), 2);
        assert_eq!(
            eval(&sliced, "object_id"),
            Value::vector(Vector::Int(vec![1, 3]))
        );
    }

    #[test]
    fn between_over_columns() {
        let ctx = context();
        assert_eq!(
            eval(&ctx, "object_id BETWEEN 2 AND 3"),
            Value::vector(Vector::Bool(vec![false, true, true, false]))
        );
    }
}
