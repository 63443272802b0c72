/// Element-wise operator semantics.
///
/// All operators broadcast scalars against vectors. Arithmetic on two
/// integer operands stays integral except `/`, which always divides in
/// floating point; `%` and `//` follow floor semantics (sign of the divisor).

use crate::error::{EngineError, Result};
use crate::kernel::{Matrix, NdArray, Scalar, Value, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    FloorDiv,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::FloorDiv => "//",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
            BoolOp::Not => "NOT",
        })
    }
}

/// Integer operand view: scalar or vector.
enum Ints<'a> {
    S(i64),
    V(&'a [i64]),
}

/// Float operand view: scalar or vector (ints and bools promote).
enum Floats {
    S(f64),
    V(Vec<f64>),
}

fn as_ints(v: &Value) -> Option<Ints<'_>> {
    match v {
        Value::Scalar(Scalar::Int(i)) => Some(Ints::S(*i)),
        Value::Array(NdArray::Vector(Vector::Int(d))) => Some(Ints::V(d)),
        _ => None,
    }
}

fn as_floats(v: &Value) -> Option<Floats> {
    match v {
        Value::Scalar(s) => s.as_f64().map(Floats::S),
        Value::Array(NdArray::Vector(vec)) => Some(Floats::V(vec.to_f64())),
        _ => None,
    }
}

fn common_len(a: Option<usize>, b: Option<usize>, op: impl fmt::Display) -> Result<Option<usize>> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(EngineError::Sql(format!(
            "operands of `{}` have lengths {} and {}",
            op, x, y
        ))),
        (Some(x), _) => Ok(Some(x)),
        (_, y) => Ok(y),
    }
}

fn zip_i64(a: Ints<'_>, b: Ints<'_>, f: impl Fn(i64, i64) -> i64) -> Result<Value> {
    Ok(match (a, b) {
        (Ints::S(x), Ints::S(y)) => Value::int(f(x, y)),
        (Ints::S(x), Ints::V(ys)) => Value::vector(Vector::Int(ys.iter().map(|&y| f(x, y)).collect())),
        (Ints::V(xs), Ints::S(y)) => Value::vector(Vector::Int(xs.iter().map(|&x| f(x, y)).collect())),
        (Ints::V(xs), Ints::V(ys)) => Value::vector(Vector::Int(
            xs.iter().zip(ys).map(|(&x, &y)| f(x, y)).collect(),
        )),
    })
}

fn zip_f64(a: Floats, b: Floats, f: impl Fn(f64, f64) -> f64) -> Value {
    match (a, b) {
        (Floats::S(x), Floats::S(y)) => Value::float(f(x, y)),
        (Floats::S(x), Floats::V(ys)) => {
            Value::vector(Vector::Float(ys.iter().map(|&y| f(x, y)).collect()))
        }
        (Floats::V(xs), Floats::S(y)) => {
            Value::vector(Vector::Float(xs.iter().map(|&x| f(x, y)).collect()))
        }
        (Floats::V(xs), Floats::V(ys)) => Value::vector(Vector::Float(
            xs.iter().zip(&ys).map(|(&x, &y)| f(x, y)).collect(),
        )),
    }
}

fn zip_f64_bool(a: Floats, b: Floats, f: impl Fn(f64, f64) -> bool) -> Value {
    match (a, b) {
        (Floats::S(x), Floats::S(y)) => Value::boolean(f(x, y)),
        (Floats::S(x), Floats::V(ys)) => {
            Value::vector(Vector::Bool(ys.iter().map(|&y| f(x, y)).collect()))
        }
        (Floats::V(xs), Floats::S(y)) => {
            Value::vector(Vector::Bool(xs.iter().map(|&x| f(x, y)).collect()))
        }
        (Floats::V(xs), Floats::V(ys)) => Value::vector(Vector::Bool(
            xs.iter().zip(&ys).map(|(&x, &y)| f(x, y)).collect(),
        )),
    }
}

fn operand_len(v: &Value) -> Option<usize> {
    match v {
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

// Floor semantics (remainder takes the divisor's sign), not Euclidean:
// truncating division rounds toward zero, so nudge when the signs disagree.
fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a % b < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod_i64(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    common_len(operand_len(a), operand_len(b), op)?;

    if op.is_comparison() {
        let (fa, fb) = match (as_floats(a), as_floats(b)) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(EngineError::Sql(format!(
                    "invalid operands for `{}`: {} and {}",
                    op,
                    a.type_name(),
                    b.type_name()
                )))
            }
        };
        return Ok(match op {
            BinOp::Eq => zip_f64_bool(fa, fb, |x, y| x == y),
            BinOp::Ne => zip_f64_bool(fa, fb, |x, y| x != y),
            BinOp::Lt => zip_f64_bool(fa, fb, |x, y| x < y),
            BinOp::Le => zip_f64_bool(fa, fb, |x, y| x <= y),
            BinOp::Gt => zip_f64_bool(fa, fb, |x, y| x > y),
            BinOp::Ge => zip_f64_bool(fa, fb, |x, y| x >= y),
            _ => unreachable!(),
        });
    }

    // Integer path for everything but true division.
    if op != BinOp::Div {
        if let (Some(ia), Some(ib)) = (as_ints(a), as_ints(b)) {
            if matches!(op, BinOp::Mod | BinOp::FloorDiv) {
                let zero = match &ib {
                    Ints::S(0) => true,
                    Ints::V(ys) => ys.contains(&0),
                    _ => false,
                };
                if zero {
                    return Err(EngineError::Sql(format!("division by zero in `{}`", op)));
                }
            }
            let f: fn(i64, i64) -> i64 = match op {
                BinOp::Add => |x, y| x + y,
                BinOp::Sub => |x, y| x - y,
                BinOp::Mul => |x, y| x * y,
                BinOp::Mod => floor_mod_i64,
                BinOp::FloorDiv => floor_div_i64,
                _ => unreachable!(),
            };
            return zip_i64(ia, ib, f);
        }
    }

    let (fa, fb) = match (as_floats(a), as_floats(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(EngineError::Sql(format!(
                "invalid operands for `{}`: {} and {}",
                op,
                a.type_name(),
                b.type_name()
            )))
        }
    };
    Ok(match op {
        BinOp::Add => zip_f64(fa, fb, |x, y| x + y),
        BinOp::Sub => zip_f64(fa, fb, |x, y| x - y),
        BinOp::Mul => zip_f64(fa, fb, |x, y| x * y),
        BinOp::Div => zip_f64(fa, fb, |x, y| x / y),
        BinOp::Mod => zip_f64(fa, fb, |x, y| x - y * (x / y).floor()),
        BinOp::FloorDiv => zip_f64(fa, fb, |x, y| (x / y).floor()),
        _ => unreachable!(),
    })
}

pub fn unary_op(op: UnaryOp, v: &Value) -> Result<Value> {
    match op {
        UnaryOp::Plus => Ok(v.clone()),
        UnaryOp::Minus => match v {
            Value::Scalar(Scalar::Int(i)) => Ok(Value::int(-i)),
            Value::Scalar(Scalar::Float(f)) => Ok(Value::float(-f)),
            Value::Array(NdArray::Vector(vec)) => Ok(Value::vector(vec.negated()?)),
            other => Err(EngineError::Sql(format!(
                "invalid operand for unary `-`: {}",
                other.type_name()
            ))),
        },
    }
}

/// Boolean mask view: scalar or vector.
enum Mask {
    S(bool),
    V(Vec<bool>),
}

fn as_mask(v: &Value) -> Result<Mask> {
    match v {
        Value::Scalar(Scalar::Bool(b)) => Ok(Mask::S(*b)),
        Value::Array(NdArray::Vector(Vector::Bool(m))) => Ok(Mask::V(m.clone())),
        other => Err(EngineError::Sql(format!(
            "boolean operator applied to {}",
            other.type_name()
        ))),
    }
}

fn combine(a: Mask, b: Mask, f: impl Fn(bool, bool) -> bool) -> Result<Mask> {
    Ok(match (a, b) {
        (Mask::S(x), Mask::S(y)) => Mask::S(f(x, y)),
        (Mask::S(x), Mask::V(ys)) => Mask::V(ys.into_iter().map(|y| f(x, y)).collect()),
        (Mask::V(xs), Mask::S(y)) => Mask::V(xs.into_iter().map(|x| f(x, y)).collect()),
        (Mask::V(xs), Mask::V(ys)) => {
            if xs.len() != ys.len() {
                return Err(EngineError::Sql(format!(
                    "boolean operands have lengths {} and {}",
                    xs.len(),
                    ys.len()
                )));
            }
            Mask::V(xs.into_iter().zip(ys).map(|(x, y)| f(x, y)).collect())
        }
    })
}

/// AND/OR reduce across any arity; NOT is unary.
pub fn bool_op(op: BoolOp, args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Err(EngineError::Sql(format!("`{}` with no operands", op)));
    }
    if op == BoolOp::Not {
        if args.len() != 1 {
            return Err(EngineError::Sql("`NOT` takes exactly one operand".to_string()));
        }
        return Ok(match as_mask(&args[0])? {
            Mask::S(b) => Value::boolean(!b),
            Mask::V(m) => Value::vector(Vector::Bool(m.into_iter().map(|b| !b).collect())),
        });
    }
    let mut acc = as_mask(&args[0])?;
    for v in &args[1..] {
        let m = as_mask(v)?;
        acc = match op {
            BoolOp::And => combine(acc, m, |x, y| x && y)?,
            BoolOp::Or => combine(acc, m, |x, y| x || y)?,
            BoolOp::Not => unreachable!(),
        };
    }
    Ok(match acc {
        Mask::S(b) => Value::boolean(b),
        Mask::V(m) => Value::vector(Vector::Bool(m)),
    })
}

/// `a BETWEEN b AND c` is `b <= a AND a <= c`; negated it is `a < b OR a > c`.
pub fn between(a: &Value, b: &Value, c: &Value, negated: bool) -> Result<Value> {
    if negated {
        let low = binary_op(BinOp::Lt, a, b)?;
        let high = binary_op(BinOp::Gt, a, c)?;
        bool_op(BoolOp::Or, &[low, high])
    } else {
        let low = binary_op(BinOp::Le, b, a)?;
        let high = binary_op(BinOp::Le, a, c)?;
        bool_op(BoolOp::And, &[low, high])
    }
}

/// `x[i]` projects a 2-D array along its outer axis.
pub fn indirection(v: &Value, index: i64) -> Result<Value> {
    match v {
        Value::Array(NdArray::Matrix(m)) => {
            if index < 0 {
                return Err(EngineError::Sql(format!("invalid use of [{}]", index)));
            }
            Ok(Value::vector(m.row(index as usize)?))
        }
        other => Err(EngineError::Sql(format!(
            "invalid use of [{}] on {}",
            index,
            other.type_name()
        ))),
    }
}

/// Element-wise addition of two same-shape arrays; used by histogram merges.
pub fn add_arrays(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    match (a, b) {
        (NdArray::Matrix(x), NdArray::Matrix(y)) => {
            if x.axes != y.axes || x.len != y.len {
                return Err(EngineError::Internal(
                    "matrix shapes differ in addition".to_string(),
                ));
            }
            let data = x.data.iter().zip(&y.data).map(|(p, q)| p + q).collect();
            Ok(NdArray::Matrix(Matrix::new(x.axes, x.len, data)?))
        }
        _ => {
            let v = binary_op(
                BinOp::Add,
                &Value::Array(a.clone()),
                &Value::Array(b.clone()),
            )?;
            match v {
                Value::Array(arr) => Ok(arr),
                _ => Err(EngineError::Internal("vector addition lost shape".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Value {
        Value::vector(Vector::Int(v.to_vec()))
    }

    #[test]
    fn arithmetic_keeps_integers() {
        let v = binary_op(BinOp::Mod, &ints(&[1, 2, 3, 4]), &Value::int(2)).unwrap();
        assert_eq!(v, ints(&[1, 0, 1, 0]));
        let v = binary_op(BinOp::Add, &ints(&[1, 2]), &ints(&[10, 20])).unwrap();
        assert_eq!(v, ints(&[11, 22]));
    }

    #[test]
    fn division_is_floating_point() {
        let v = binary_op(BinOp::Div, &Value::int(1), &Value::int(2)).unwrap();
        assert_eq!(v, Value::float(0.5));
    }

    #[test]
    fn floor_division_follows_divisor_sign() {
        let v = binary_op(BinOp::FloorDiv, &Value::int(-7), &Value::int(2)).unwrap();
        assert_eq!(v, Value::int(-4));
        let v = binary_op(BinOp::Mod, &Value::int(-7), &Value::int(2)).unwrap();
        assert_eq!(v, Value::int(1));
        // Negative divisors: the remainder follows the divisor's sign.
        let v = binary_op(BinOp::FloorDiv, &Value::int(7), &Value::int(-2)).unwrap();
        assert_eq!(v, Value::int(-4));
        let v = binary_op(BinOp::Mod, &Value::int(7), &Value::int(-2)).unwrap();
        assert_eq!(v, Value::int(-1));
        let v = binary_op(BinOp::Mod, &Value::float(7.0), &Value::float(-2.0)).unwrap();
        assert_eq!(v, Value::float(-1.0));
    }

    #[test]
    fn comparisons_broadcast() {
        let v = binary_op(BinOp::Eq, &ints(&[1, 2, 3]), &Value::int(2)).unwrap();
        assert_eq!(
            v,
            Value::vector(Vector::Bool(vec![false, true, false]))
        );
    }

    #[test]
    fn nan_comparisons_are_false() {
        let v = binary_op(
            BinOp::Lt,
            &Value::vector(Vector::Float(vec![f64::NAN, 1.0])),
            &Value::float(2.0),
        )
        .unwrap();
        assert_eq!(v, Value::vector(Vector::Bool(vec![false, true])));
    }

    #[test]
    fn boolean_reduce_any_arity() {
        let t = Value::vector(Vector::Bool(vec![true, true, false]));
        let u = Value::vector(Vector::Bool(vec![true, false, false]));
        let v = Value::boolean(true);
        let out = bool_op(BoolOp::And, &[t, u, v]).unwrap();
        assert_eq!(out, Value::vector(Vector::Bool(vec![true, false, false])));
    }

    #[test]
    fn between_and_not_between() {
        let a = ints(&[1, 5, 10]);
        let v = between(&a, &Value::int(2), &Value::int(9), false).unwrap();
        assert_eq!(v, Value::vector(Vector::Bool(vec![false, true, false])));
        let v = between(&a, &Value::int(2), &Value::int(9), true).unwrap();
        assert_eq!(v, Value::vector(Vector::Bool(vec![true, false, true])));
    }

    #[test]
    fn indirection_projects_outer_axis() {
        let m = Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let v = indirection(&Value::Array(NdArray::Matrix(m)), 1).unwrap();
        assert_eq!(v, Value::vector(Vector::Float(vec![3.0, 4.0])));
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert!(binary_op(BinOp::Add, &ints(&[1]), &ints(&[1, 2])).is_err());
    }
}
