use crate::error::{EngineError, Result};
use crate::execution::agg::AggCall;
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::sort::unique_inverse;
use crate::kernel::Value;
use crate::parser::Expression;

/// Synthetic aggregate wrapping a target expression that still depends on
/// row context. Contract: the expression evaluates to a single distinct
/// value within each group (e.g. the group key expression itself).
pub struct PickOneAggCall {
    expr: Expression,
}

impl PickOneAggCall {
    pub fn new(expr: Expression) -> PickOneAggCall {
        PickOneAggCall { expr }
    }

    fn non_unique(&self) -> EngineError {
        EngineError::Sql(format!(
            "non-unique values for the expression at line {} column {}",
            self.expr.loc.line, self.expr.loc.column
        ))
    }
}

impl AggCall for PickOneAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let v = evaluate(&self.expr, ctx)?.into_vector(ctx.size())?;
        let (distinct, _) = unique_inverse(&v);
        if distinct.len() >= 2 {
            return Err(self.non_unique());
        }
        Ok(Value::Scalar(v.get(0)))
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        if a != b {
            return Err(self.non_unique());
        }
        Ok(a)
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        Ok(state)
    }
}
