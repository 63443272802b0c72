use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, FuncParts};
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::Value;
use crate::parser::Expression;
use std::sync::Arc;
use std::time::Duration;

/// `SLEEP(seconds)`: test aid. Sleeps in the mapper, worker side, so
/// cancellation is observable between chunks.
pub struct SleepAggCall {
    duration: Expression,
}

pub fn plan(parts: &FuncParts<'_>) -> Result<Arc<dyn AggCall>> {
    if parts.args.len() != 1 || parts.agg_star {
        return Err(EngineError::Sql(
            "`sleep` accepts only 1 positional argument".to_string(),
        ));
    }
    Ok(Arc::new(SleepAggCall {
        duration: parts.args[0].clone(),
    }))
}

impl AggCall for SleepAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let seconds = evaluate(&self.duration, ctx)?.as_f64()?;
        if !(0.0..=60.0).contains(&seconds) {
            return Err(EngineError::User(format!(
                "sleep duration out of range: {}",
                seconds
            )));
        }
        std::thread::sleep(Duration::from_secs_f64(seconds));
        Ok(Value::float(seconds))
    }

    fn reducer(&self, a: Value, _b: Value) -> Result<Value> {
        Ok(a)
    }

    fn finalizer(&self, _state: Value) -> Result<Value> {
        Ok(Value::int(0))
    }
}
