/// Vector kernel for RakeDB
///
/// Columnar value model and the element-wise algebra the SQL evaluator runs
/// on. Everything the mappers and reducers exchange is built from these
/// types: scalars, 1-D vectors, 2-D matrices and rows (ordered tuples).

pub mod array;
pub mod group;
pub mod hist;
pub mod kdtree;
pub mod ops;
pub mod sort;

pub use array::{Dtype, Matrix, NdArray, RawArray, Vector};
pub use group::{GroupKey, GroupMap};

use crate::error::{EngineError, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A single element value. Floats compare with total ordering so scalars can
/// be used as group keys.
#[derive(Debug, Clone)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(b) => Some(*b as i64 as f64),
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Bool(b) => Some(*b as i64),
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Scalar::Bool(_) => 0,
            Scalar::Int(_) => 1,
            Scalar::Float(_) => 2,
            Scalar::Str(_) => 3,
        }
    }

    /// Total ordering: same-type values compare naturally (floats by
    /// `total_cmp`), different types by type rank.
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

// Scalars cross the wire inside the JSON half of the mixed envelope, where a
// bare NaN/Infinity would not survive. Non-finite floats are spelled out as
// strings; everything else is a single-entry map keyed by type.
impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut m = s.serialize_map(Some(1))?;
        match self {
            Scalar::Bool(b) => m.serialize_entry("bool", b)?,
            Scalar::Int(i) => m.serialize_entry("int", i)?,
            Scalar::Float(f) if f.is_finite() => m.serialize_entry("float", f)?,
            Scalar::Float(f) => {
                let repr = if f.is_nan() {
                    "NaN"
                } else if *f > 0.0 {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                m.serialize_entry("float", repr)?
            }
            Scalar::Str(v) => m.serialize_entry("str", v)?,
        }
        m.end()
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        struct ScalarVisitor;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum FloatRepr {
            Num(f64),
            Named(String),
        }

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry scalar map")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Scalar, A::Error> {
                let key: String = map
                    .next_key()?
                    .ok_or_else(|| serde::de::Error::custom("empty scalar map"))?;
                let value = match key.as_str() {
                    "bool" => Scalar::Bool(map.next_value()?),
                    "int" => Scalar::Int(map.next_value()?),
                    "float" => match map.next_value()? {
                        FloatRepr::Num(f) => Scalar::Float(f),
                        FloatRepr::Named(s) => Scalar::Float(match s.as_str() {
                            "NaN" => f64::NAN,
                            "Infinity" => f64::INFINITY,
                            "-Infinity" => f64::NEG_INFINITY,
                            other => {
                                return Err(serde::de::Error::custom(format!(
                                    "bad float literal: {}",
                                    other
                                )))
                            }
                        }),
                    },
                    "str" => Scalar::Str(map.next_value()?),
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "unknown scalar tag: {}",
                            other
                        )))
                    }
                };
                Ok(value)
            }
        }

        d.deserialize_map(ScalarVisitor)
    }
}

/// Result of evaluating an expression: a scalar, an array over the shard's
/// object axis, an ordered tuple (SQL row literal), or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Scalar(Scalar),
    Array(NdArray),
    Row(Vec<Value>),
}

impl Value {
    pub fn int(v: i64) -> Value {
        Value::Scalar(Scalar::Int(v))
    }

    pub fn float(v: f64) -> Value {
        Value::Scalar(Scalar::Float(v))
    }

    pub fn boolean(v: bool) -> Value {
        Value::Scalar(Scalar::Bool(v))
    }

    pub fn vector(v: Vector) -> Value {
        Value::Array(NdArray::Vector(v))
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Scalar(s) => s
                .as_f64()
                .ok_or_else(|| EngineError::Sql(format!("expected a number, got {}", s))),
            other => Err(EngineError::Sql(format!(
                "expected a number, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_usize(&self) -> Result<usize> {
        match self {
            Value::Scalar(Scalar::Int(i)) if *i >= 0 => Ok(*i as usize),
            other => Err(EngineError::Sql(format!(
                "expected a non-negative integer, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Scalar(Scalar::Bool(_)) => "bool",
            Value::Scalar(Scalar::Int(_)) => "int",
            Value::Scalar(Scalar::Float(_)) => "float",
            Value::Scalar(Scalar::Str(_)) => "str",
            Value::Array(NdArray::Vector(_)) => "vector",
            Value::Array(NdArray::Matrix(_)) => "matrix",
            Value::Row(_) => "row",
        }
    }

    /// Coerce to a boolean mask of length `n`, broadcasting scalars.
    pub fn into_mask(self, n: usize) -> Result<Vec<bool>> {
        match self {
            Value::Array(NdArray::Vector(Vector::Bool(m))) => Ok(m),
            Value::Scalar(Scalar::Bool(b)) => Ok(vec![b; n]),
            other => Err(EngineError::Sql(format!(
                "condition must be boolean, got {}",
                other.type_name()
            ))),
        }
    }

    /// Coerce to a 1-D vector of length `n`, broadcasting scalars.
    pub fn into_vector(self, n: usize) -> Result<Vector> {
        match self {
            Value::Array(NdArray::Vector(v)) => Ok(v),
            Value::Scalar(s) => Vector::splat(&s, n),
            other => Err(EngineError::Sql(format!(
                "expected a 1-d value, got {}",
                other.type_name()
            ))),
        }
    }

    /// Coerce to an array over the object axis, broadcasting scalars.
    pub fn into_array(self, n: usize) -> Result<NdArray> {
        match self {
            Value::Array(a) => Ok(a),
            Value::Scalar(s) => Ok(NdArray::Vector(Vector::splat(&s, n)?)),
            other => Err(EngineError::Sql(format!(
                "expected an array value, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn into_range_pair(self) -> Result<(f64, f64)> {
        match self {
            Value::Row(items) if items.len() == 2 => {
                Ok((items[0].as_f64()?, items[1].as_f64()?))
            }
            other => Err(EngineError::Sql(format!(
                "expected a (low, high) pair, got {}",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_total_ordering_handles_nan() {
        let a = Scalar::Float(f64::NAN);
        let b = Scalar::Float(f64::NAN);
        assert_eq!(a, b);
        assert!(Scalar::Float(1.0) < Scalar::Float(2.0));
        assert!(Scalar::Int(1) < Scalar::Int(2));
    }

    #[test]
    fn scalar_serde_round_trip() {
        for s in [
            Scalar::Bool(true),
            Scalar::Int(-42),
            Scalar::Float(2.5),
            Scalar::Float(f64::NAN),
            Scalar::Float(f64::INFINITY),
            Scalar::Str("x".to_string()),
        ] {
            let json = serde_json::to_string(&s).unwrap();
            let back: Scalar = serde_json::from_str(&json).unwrap();
            assert_eq!(s, back);
        }
    }

    #[test]
    fn value_broadcasts_scalars() {
        let v = Value::int(3).into_vector(4).unwrap();
        assert_eq!(v, Vector::Int(vec![3, 3, 3, 3]));
        let m = Value::boolean(true).into_mask(2).unwrap();
        assert_eq!(m, vec![true, true]);
    }
}
