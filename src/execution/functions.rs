/// Scalar (non-aggregate) function table.

use crate::error::{EngineError, Result};
use crate::kernel::ops::{self, BinOp};
use crate::kernel::{NdArray, Value, Vector};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub type ScalarFn = fn(&[Value], &[(String, Value)]) -> Result<Value>;

static SCALAR_FUNCTIONS: Lazy<HashMap<&'static str, ScalarFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, ScalarFn> = HashMap::new();
    m.insert("flux2mag", flux2mag);
    m.insert("isnan", isnan);
    m.insert("isfinite", isfinite);
    m
});

pub fn lookup(name: &str) -> Option<ScalarFn> {
    SCALAR_FUNCTIONS.get(name).copied()
}

pub fn is_scalar(name: &str) -> bool {
    SCALAR_FUNCTIONS.contains_key(name)
}

fn one_positional<'a>(name: &str, args: &'a [Value], named: &[(String, Value)]) -> Result<&'a Value> {
    if args.len() != 1 || !named.is_empty() {
        return Err(EngineError::Sql(format!(
            "`{}` accepts exactly 1 argument",
            name
        )));
    }
    Ok(&args[0])
}

// nanojansky -> magnitude scale factor
const FLUX2MAG_SCALE: f64 = 57.543993733715695;

fn flux2mag(args: &[Value], named: &[(String, Value)]) -> Result<Value> {
    let a = one_positional("flux2mag", args, named)?;
    ops::binary_op(BinOp::Mul, &Value::float(FLUX2MAG_SCALE), a)
}

fn float_predicate(
    name: &str,
    args: &[Value],
    named: &[(String, Value)],
    f: fn(f64) -> bool,
) -> Result<Value> {
    let a = one_positional(name, args, named)?;
    match a {
        Value::Scalar(s) => {
            let v = s
                .as_f64()
                .ok_or_else(|| EngineError::Sql(format!("`{}` expects a number", name)))?;
            Ok(Value::boolean(f(v)))
        }
        Value::Array(NdArray::Vector(v)) => Ok(Value::vector(Vector::Bool(
            v.to_f64().into_iter().map(f).collect(),
        ))),
        other => Err(EngineError::Sql(format!(
            "`{}` expects a number or a column, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn isnan(args: &[Value], named: &[(String, Value)]) -> Result<Value> {
    float_predicate("isnan", args, named, f64::is_nan)
}

fn isfinite(args: &[Value], named: &[(String, Value)]) -> Result<Value> {
    float_predicate("isfinite", args, named, f64::is_finite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert!(is_scalar("flux2mag"));
        assert!(is_scalar("isnan"));
        assert!(!is_scalar("count"));
    }

    #[test]
    fn flux2mag_scales() {
        let v = flux2mag(&[Value::float(2.0)], &[]).unwrap();
        assert_eq!(v, Value::float(2.0 * FLUX2MAG_SCALE));
    }

    #[test]
    fn isfinite_masks() {
        let v = isfinite(
            &[Value::vector(Vector::Float(vec![1.0, f64::NAN, f64::INFINITY]))],
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::vector(Vector::Bool(vec![true, false, false])));
    }
}
