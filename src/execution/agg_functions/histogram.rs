use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, AggPlanner, FuncParts};
use crate::execution::agg_functions::minmax;
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::ops::add_arrays;
use crate::kernel::{hist, Value};
use crate::parser::Expression;
use std::sync::Arc;

pub const DEFAULT_BINS: usize = 50;

/// `HISTOGRAM(x, bins?, range?)`. Without an explicit range the bin edges
/// come from a dependent MINMAX pass over the same expression.
pub struct HistogramAggCall {
    array: Expression,
    bins: Option<Expression>,
    range: RangeSource,
}

pub enum RangeSource {
    /// `range => (low, high)` given in the query.
    Expr(Expression),
    /// Index of the MINMAX pass this histogram depends on.
    Pass(usize),
}

pub fn plan(parts: &FuncParts<'_>, planner: &mut AggPlanner) -> Result<Arc<dyn AggCall>> {
    if parts.args.len() != 1 || parts.agg_star {
        return Err(EngineError::Sql(
            "`histogram` accepts only 1 positional argument".to_string(),
        ));
    }
    let array = parts.args[0].clone();
    let mut bins = None;
    let mut range = None;
    for (key, value) in parts.named_args {
        match key.as_str() {
            "bins" => bins = Some(value.clone()),
            "range" => range = Some(value.clone()),
            other => {
                return Err(EngineError::Sql(format!(
                    "unknown named argument `{}` for function `histogram`",
                    other
                )))
            }
        }
    }
    let range = match range {
        Some(e) => RangeSource::Expr(e),
        None => RangeSource::Pass(planner.add_sub(minmax::minmax_of(array.clone()))),
    };
    Ok(Arc::new(HistogramAggCall { array, bins, range }))
}

pub(super) fn resolve_bins(bins: &Option<Expression>, ctx: &AggContext) -> Result<usize> {
    match bins {
        None => Ok(DEFAULT_BINS),
        Some(e) => evaluate(e, ctx)?.as_usize(),
    }
}

pub(super) fn resolve_range(source: &RangeSource, ctx: &AggContext) -> Result<(f64, f64)> {
    match source {
        RangeSource::Expr(e) => evaluate(e, ctx)?.into_range_pair(),
        RangeSource::Pass(i) => ctx.pass_result(*i)?.into_range_pair(),
    }
}

fn unpack2(state: &Value) -> Result<(&Value, &Value)> {
    match state {
        Value::Row(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        other => Err(EngineError::Internal(format!(
            "bad histogram state: {}",
            other.type_name()
        ))),
    }
}

impl AggCall for HistogramAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let bins = resolve_bins(&self.bins, ctx)?;
        let range = resolve_range(&self.range, ctx)?;
        let values = evaluate(&self.array, ctx)?.into_vector(ctx.size())?;
        let (counts, edges) = hist::histogram(&values, bins, range)?;
        Ok(Value::Row(vec![
            Value::vector(counts),
            Value::vector(edges),
        ]))
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        let (ac, ae) = unpack2(&a)?;
        let (bc, _) = unpack2(&b)?;
        let (ac, bc) = match (ac, bc) {
            (Value::Array(x), Value::Array(y)) => (x, y),
            _ => return Err(EngineError::Internal("bad histogram state".to_string())),
        };
        Ok(Value::Row(vec![
            Value::Array(add_arrays(ac, bc)?),
            ae.clone(),
        ]))
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        Ok(state)
    }
}
