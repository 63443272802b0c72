/// Non-aggregate planner: WHERE / ORDER BY / LIMIT pipelines.
///
/// The mapper slices each shard by the WHERE mask (truncated to the limit),
/// takes the per-shard top-`limit` rows by the signed sort keys and
/// materializes the target expressions. The reducer merges two partials by
/// concatenation, re-sorting when sort keys are present. Ties across shards
/// have no specified order.

use crate::error::{EngineError, Result};
use crate::execution::context::{evaluate, ShardContext, SharedValues};
use crate::kernel::sort::lexsort;
use crate::kernel::{NdArray, Vector};
use crate::parser::Select;
use crate::store::{Selection, Shard};
use std::sync::Arc;

pub fn check_select(select: &Select, streaming: bool) -> Result<()> {
    if streaming && select.order_by.is_some() {
        return Err(EngineError::User(
            "ORDER BY clause cannot be given in streaming query".to_string(),
        ));
    }
    if !streaming && select.limit.is_none() {
        return Err(EngineError::Sql("LIMIT must be specified".to_string()));
    }
    if select.group_by.is_some() {
        return Err(EngineError::Sql(
            "GROUP clause is not allowed for non-aggregate query".to_string(),
        ));
    }
    Ok(())
}

pub struct RowsOut {
    pub targets: Vec<NdArray>,
    pub sort_keys: Option<Vec<Vector>>,
}

pub fn map_shard(
    select: &Select,
    shared: &Arc<SharedValues>,
    shard: Arc<dyn Shard>,
) -> Result<RowsOut> {
    let ctx = ShardContext::new(shard, shared.clone());
    let ctx = match &select.where_clause {
        Some(w) => {
            let mut mask = evaluate(w, &ctx)?.into_mask(ctx.size())?;
            if let Some(limit) = select.limit {
                mask.truncate(limit);
            }
            ctx.sliced(&Selection::Mask(mask))
        }
        None => ctx,
    };

    let (ctx, sort_keys) = match &select.order_by {
        Some(items) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                let key = evaluate(&item.node, &ctx)?.into_vector(ctx.size())?;
                keys.push(if item.reverse { key.negated()? } else { key });
            }
            let mut indices = lexsort(&keys)?;
            if let Some(limit) = select.limit {
                indices.truncate(limit);
            }
            let keys: Vec<Vector> = keys.iter().map(|k| k.take(&indices)).collect();
            (ctx.sliced(&Selection::Indices(indices)), Some(keys))
        }
        None => (ctx, None),
    };

    let targets = select
        .target_list
        .iter()
        .map(|t| evaluate(&t.expr, &ctx)?.into_array(ctx.size()))
        .collect::<Result<Vec<_>>>()?;
    Ok(RowsOut { targets, sort_keys })
}

/// Merge two partials. Without sort keys the result is a plain truncated
/// concatenation, so this is only commutative up to row order; with sort
/// keys the merged top-`limit` selection is order-independent.
pub fn reduce(select: &Select, a: RowsOut, b: RowsOut) -> Result<RowsOut> {
    match (a.sort_keys, b.sort_keys) {
        (Some(a_keys), Some(b_keys)) => {
            let keys = a_keys
                .iter()
                .zip(&b_keys)
                .map(|(x, y)| x.concat(y))
                .collect::<Result<Vec<_>>>()?;
            let mut indices = lexsort(&keys)?;
            if let Some(limit) = select.limit {
                indices.truncate(limit);
            }
            let targets = a
                .targets
                .iter()
                .zip(&b.targets)
                .map(|(x, y)| Ok(x.concat(y)?.take(&indices)))
                .collect::<Result<Vec<_>>>()?;
            let keys = keys.iter().map(|k| k.take(&indices)).collect();
            Ok(RowsOut {
                targets,
                sort_keys: Some(keys),
            })
        }
        (None, None) => {
            let targets = a
                .targets
                .iter()
                .zip(&b.targets)
                .map(|(x, y)| {
                    let joined = x.concat(y)?;
                    Ok(match select.limit {
                        Some(limit) => joined.truncate(limit),
                        None => joined,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(RowsOut {
                targets,
                sort_keys: None,
            })
        }
        _ => Err(EngineError::Internal(
            "mixed sorted and unsorted partials".to_string(),
        )),
    }
}

pub fn finalize(select: &Select, acc: Option<RowsOut>) -> Result<Vec<NdArray>> {
    match acc {
        Some(out) => Ok(out.targets),
        // No shards at all: one empty column per target.
        None => Ok(select
            .target_list
            .iter()
            .map(|_| NdArray::Vector(Vector::Float(Vec::new())))
            .collect()),
    }
}
