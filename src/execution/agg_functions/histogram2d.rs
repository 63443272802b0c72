use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, AggPlanner, FuncParts};
use crate::execution::agg_functions::histogram::{resolve_bins, RangeSource};
use crate::execution::agg_functions::minmax;
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::ops::add_arrays;
use crate::kernel::{hist, Value};
use crate::parser::Expression;
use std::sync::Arc;

/// `HISTOGRAM2D(x, y, bins?, range?)`. Without an explicit range the bin
/// edges come from two dependent MINMAX passes, one per axis.
pub struct Histogram2dAggCall {
    x: Expression,
    y: Expression,
    bins: Option<Expression>,
    range: Range2d,
}

enum Range2d {
    /// `range => ((xlow, xhigh), (ylow, yhigh))`.
    Expr(Expression),
    /// MINMAX pass indices for the x and y axes.
    Passes(usize, usize),
}

pub fn plan(parts: &FuncParts<'_>, planner: &mut AggPlanner) -> Result<Arc<dyn AggCall>> {
    if parts.args.len() != 2 || parts.agg_star {
        return Err(EngineError::Sql(
            "`histogram2d` accepts exactly 2 positional arguments".to_string(),
        ));
    }
    let x = parts.args[0].clone();
    let y = parts.args[1].clone();
    let mut bins = None;
    let mut range = None;
    for (key, value) in parts.named_args {
        match key.as_str() {
            "bins" => bins = Some(value.clone()),
            "range" => range = Some(value.clone()),
            other => {
                return Err(EngineError::Sql(format!(
                    "unknown named argument `{}` for function `histogram2d`",
                    other
                )))
            }
        }
    }
    let range = match range {
        Some(e) => Range2d::Expr(e),
        None => {
            let xr = planner.add_sub(minmax::minmax_of(x.clone()));
            let yr = planner.add_sub(minmax::minmax_of(y.clone()));
            Range2d::Passes(xr, yr)
        }
    };
    Ok(Arc::new(Histogram2dAggCall { x, y, bins, range }))
}

impl Histogram2dAggCall {
    fn ranges(&self, ctx: &AggContext) -> Result<((f64, f64), (f64, f64))> {
        match &self.range {
            Range2d::Expr(e) => match evaluate(e, ctx)? {
                Value::Row(items) if items.len() == 2 => Ok((
                    items[0].clone().into_range_pair()?,
                    items[1].clone().into_range_pair()?,
                )),
                other => Err(EngineError::Sql(format!(
                    "histogram2d range must be a pair of pairs, got {}",
                    other.type_name()
                ))),
            },
            Range2d::Passes(xr, yr) => Ok((
                super::histogram::resolve_range(&RangeSource::Pass(*xr), ctx)?,
                super::histogram::resolve_range(&RangeSource::Pass(*yr), ctx)?,
            )),
        }
    }
}

impl AggCall for Histogram2dAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let bins = resolve_bins(&self.bins, ctx)?;
        let (x_range, y_range) = self.ranges(ctx)?;
        let x = evaluate(&self.x, ctx)?.into_vector(ctx.size())?;
        let y = evaluate(&self.y, ctx)?.into_vector(ctx.size())?;
        let (counts, x_edges, y_edges) = hist::histogram2d(&x, &y, bins, x_range, y_range)?;
        Ok(Value::Row(vec![
            Value::Array(crate::kernel::NdArray::Matrix(counts)),
            Value::vector(x_edges),
            Value::vector(y_edges),
        ]))
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        match (&a, &b) {
            (Value::Row(ai), Value::Row(bi)) if ai.len() == 3 && bi.len() == 3 => {
                let (ac, bc) = match (&ai[0], &bi[0]) {
                    (Value::Array(x), Value::Array(y)) => (x, y),
                    _ => {
                        return Err(EngineError::Internal(
                            "bad histogram2d state".to_string(),
                        ))
                    }
                };
                Ok(Value::Row(vec![
                    Value::Array(add_arrays(ac, bc)?),
                    ai[1].clone(),
                    ai[2].clone(),
                ]))
            }
            _ => Err(EngineError::Internal("bad histogram2d state".to_string())),
        }
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        Ok(state)
    }
}
