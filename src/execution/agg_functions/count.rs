use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, FuncParts};
use crate::execution::context::AggContext;
use crate::kernel::Value;
use std::sync::Arc;

/// `COUNT(*)`: group sizes.
pub struct CountAggCall;

pub fn plan(parts: &FuncParts<'_>) -> Result<Arc<dyn AggCall>> {
    if !parts.args.is_empty() || !parts.named_args.is_empty() {
        return Err(EngineError::Sql(
            "`count` only supports the form count(*)".to_string(),
        ));
    }
    Ok(Arc::new(CountAggCall))
}

impl AggCall for CountAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        Ok(Value::int(ctx.size() as i64))
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        Ok(Value::int(a.as_usize()? as i64 + b.as_usize()? as i64))
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        Ok(state)
    }
}
