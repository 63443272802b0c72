use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, FuncParts};
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::ops::{self, BinOp};
use crate::kernel::{Value, Vector};
use crate::parser::Expression;
use std::sync::Arc;

/// `SUM(x)`.
pub struct SumAggCall {
    arg: Expression,
}

pub fn plan(parts: &FuncParts<'_>) -> Result<Arc<dyn AggCall>> {
    if parts.args.len() != 1 || !parts.named_args.is_empty() || parts.agg_star {
        return Err(EngineError::Sql("`sum` accepts only 1 argument".to_string()));
    }
    Ok(Arc::new(SumAggCall {
        arg: parts.args[0].clone(),
    }))
}

impl AggCall for SumAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let v = evaluate(&self.arg, ctx)?.into_vector(ctx.size())?;
        Ok(match v {
            Vector::Int(d) => Value::int(d.iter().sum()),
            Vector::Bool(d) => Value::int(d.iter().filter(|&&b| b).count() as i64),
            Vector::Float(d) => Value::float(d.iter().sum()),
        })
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        ops::binary_op(BinOp::Add, &a, &b)
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        Ok(state)
    }
}
