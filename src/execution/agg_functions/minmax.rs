use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, FuncParts};
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::{Value, Vector};
use crate::parser::Expression;
use std::sync::Arc;

/// `MINMAX(x)` and its `MIN`/`MAX` projections. The running state is the
/// `(min, max)` pair over finite values, or Null when none were seen.
pub struct MinMaxAggCall {
    arg: Expression,
    output: Output,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Pair,
    Min,
    Max,
}

pub fn plan(parts: &FuncParts<'_>, output: Output) -> Result<Arc<dyn AggCall>> {
    if parts.args.len() != 1 || !parts.named_args.is_empty() || parts.agg_star {
        return Err(EngineError::Sql(format!(
            "`{}` accepts only 1 argument",
            parts.name
        )));
    }
    Ok(Arc::new(MinMaxAggCall {
        arg: parts.args[0].clone(),
        output,
    }))
}

/// Builds the call directly; used by histogram range sub-aggregates.
pub fn minmax_of(arg: Expression) -> Arc<dyn AggCall> {
    Arc::new(MinMaxAggCall {
        arg,
        output: Output::Pair,
    })
}

fn pair(min: f64, max: f64) -> Value {
    Value::Row(vec![Value::float(min), Value::float(max)])
}

fn unpack(v: &Value) -> Result<Option<(f64, f64)>> {
    match v {
        Value::Null => Ok(None),
        Value::Row(items) if items.len() == 2 => {
            Ok(Some((items[0].as_f64()?, items[1].as_f64()?)))
        }
        other => Err(EngineError::Internal(format!(
            "bad minmax state: {}",
            other.type_name()
        ))),
    }
}

impl AggCall for MinMaxAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let v = evaluate(&self.arg, ctx)?.into_vector(ctx.size())?;
        let finite: Vec<f64> = match v {
            Vector::Float(d) => d.into_iter().filter(|x| x.is_finite()).collect(),
            other => other.to_f64(),
        };
        if finite.is_empty() {
            return Ok(Value::Null);
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for x in finite {
            min = min.min(x);
            max = max.max(x);
        }
        Ok(pair(min, max))
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        Ok(match (unpack(&a)?, unpack(&b)?) {
            (Some((al, ah)), Some((bl, bh))) => pair(al.min(bl), ah.max(bh)),
            (Some(_), None) => a,
            (None, _) => b,
        })
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        let (min, max) = unpack(&state)?.unwrap_or((f64::NAN, f64::NAN));
        Ok(match self.output {
            Output::Pair => pair(min, max),
            Output::Min => Value::float(min),
            Output::Max => Value::float(max),
        })
    }
}
