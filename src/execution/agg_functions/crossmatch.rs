use crate::error::{EngineError, Result};
use crate::execution::agg::{AggCall, FuncParts};
use crate::execution::context::{evaluate, AggContext};
use crate::kernel::kdtree::KdTree;
use crate::kernel::{Matrix, NdArray, Value, Vector};
use crate::parser::Expression;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// `CROSSMATCH(catalog_coord, target_coord, radius, fields...)`
///
/// Spatial cross-match of catalog objects against a client-provided target
/// list. Coordinates are 2-D arrays: two components (RA/Dec in radians) or
/// three (unit xyz). The result pairs each target index with the selected
/// field slices of its catalog matches. The radius is a chord length on the
/// unit sphere.
pub struct CrossmatchAggCall {
    catalog_coord: Expression,
    target_coord: Expression,
    radius: Expression,
    fields: Vec<Expression>,
    /// The target list is the same for every shard; its tree is built once.
    target_tree: OnceCell<Arc<KdTree>>,
}

pub fn plan(parts: &FuncParts<'_>) -> Result<Arc<dyn AggCall>> {
    if parts.args.len() < 3 || parts.agg_star {
        return Err(EngineError::Sql(
            "`crossmatch` needs catalog coordinates, target coordinates and a radius".to_string(),
        ));
    }
    if !parts.named_args.is_empty() {
        return Err(EngineError::Sql(
            "unknown named arguments for function `crossmatch`".to_string(),
        ));
    }
    Ok(Arc::new(CrossmatchAggCall {
        catalog_coord: parts.args[0].clone(),
        target_coord: parts.args[1].clone(),
        radius: parts.args[2].clone(),
        fields: parts.args[3..].to_vec(),
        target_tree: OnceCell::new(),
    }))
}

fn make_points(coord: &Matrix) -> Result<Vec<[f64; 3]>> {
    match coord.axes {
        2 => {
            let a = &coord.data[..coord.len];
            let d = &coord.data[coord.len..];
            Ok(a.iter()
                .zip(d)
                .map(|(&a, &d)| {
                    let cos_d = d.cos();
                    [cos_d * a.cos(), cos_d * a.sin(), d.sin()]
                })
                .collect())
        }
        3 => Ok((0..coord.len)
            .map(|i| {
                [
                    coord.data[i],
                    coord.data[coord.len + i],
                    coord.data[2 * coord.len + i],
                ]
            })
            .collect()),
        n => Err(EngineError::Sql(format!(
            "coordinates must have 2 or 3 components, got {}",
            n
        ))),
    }
}

fn coord_matrix(v: Value) -> Result<Matrix> {
    match v {
        Value::Array(NdArray::Matrix(m)) => Ok(m),
        other => Err(EngineError::Sql(format!(
            "coordinates must be a 2-d array, got {}",
            other.type_name()
        ))),
    }
}

fn state(obj_indices: Vector, fields: Vec<Value>) -> Value {
    Value::Row(vec![Value::vector(obj_indices), Value::Row(fields)])
}

impl AggCall for CrossmatchAggCall {
    fn mapper(&self, ctx: &AggContext) -> Result<Value> {
        let catalog = coord_matrix(evaluate(&self.catalog_coord, ctx)?)?;
        let radius = evaluate(&self.radius, ctx)?.as_f64()?;

        let (obj_indices, cat_indices) = if catalog.len == 0 {
            (Vec::new(), Vec::new())
        } else {
            let catalog_tree = KdTree::build(make_points(&catalog)?);
            let target_tree = self.target_tree.get_or_try_init(|| {
                let target = coord_matrix(evaluate(&self.target_coord, ctx)?)?;
                Ok::<_, EngineError>(Arc::new(KdTree::build(make_points(&target)?)))
            })?;
            let mut obj = Vec::new();
            let mut cat = Vec::new();
            for i in 0..target_tree.len() {
                for j in catalog_tree.query_ball(target_tree.point(i), radius) {
                    obj.push(i as i64);
                    cat.push(j);
                }
            }
            (obj, cat)
        };

        let fields = self
            .fields
            .iter()
            .map(|f| {
                let a = evaluate(f, ctx)?.into_array(ctx.size())?;
                Ok(Value::Array(a.take(&cat_indices)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(state(Vector::Int(obj_indices), fields))
    }

    fn reducer(&self, a: Value, b: Value) -> Result<Value> {
        let unpack = |v: &Value| -> Result<(NdArray, Vec<Value>)> {
            match v {
                Value::Row(items) if items.len() == 2 => match (&items[0], &items[1]) {
                    (Value::Array(idx), Value::Row(fields)) => {
                        Ok((idx.clone(), fields.clone()))
                    }
                    _ => Err(EngineError::Internal("bad crossmatch state".to_string())),
                },
                _ => Err(EngineError::Internal("bad crossmatch state".to_string())),
            }
        };
        let (ai, af) = unpack(&a)?;
        let (bi, bf) = unpack(&b)?;
        let indices = ai.concat(&bi)?;
        let fields = af
            .iter()
            .zip(&bf)
            .map(|(x, y)| match (x, y) {
                (Value::Array(xa), Value::Array(ya)) => Ok(Value::Array(xa.concat(ya)?)),
                _ => Err(EngineError::Internal("bad crossmatch state".to_string())),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Row(vec![Value::Array(indices), Value::Row(fields)]))
    }

    fn finalizer(&self, state: Value) -> Result<Value> {
        Ok(state)
    }
}
