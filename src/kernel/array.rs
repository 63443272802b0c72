/// Array storage for the vector kernel.
///
/// `Vector` is a typed 1-D column, `Matrix` a 2-D float array whose outer
/// axis holds coordinate components and whose inner axis is the object axis.
/// Serialization is stash-aware: inside a mixed-envelope encode/decode
/// session arrays leave the JSON layout as `{"__array__": true, "id": n}`
/// references and travel in the binary archive instead; outside a session
/// they serialize inline (plain JSON), which unit tests and config files use.

use crate::error::{EngineError, Result};
use crate::kernel::Scalar;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl Vector {
    pub fn len(&self) -> usize {
        match self {
            Vector::Bool(v) => v.len(),
            Vector::Int(v) => v.len(),
            Vector::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Vector::Bool(_) => Dtype::Bool,
            Vector::Int(_) => Dtype::Int,
            Vector::Float(_) => Dtype::Float,
        }
    }

    pub fn get(&self, i: usize) -> Scalar {
        match self {
            Vector::Bool(v) => Scalar::Bool(v[i]),
            Vector::Int(v) => Scalar::Int(v[i]),
            Vector::Float(v) => Scalar::Float(v[i]),
        }
    }

    pub fn splat(s: &Scalar, n: usize) -> Result<Vector> {
        Ok(match s {
            Scalar::Bool(b) => Vector::Bool(vec![*b; n]),
            Scalar::Int(i) => Vector::Int(vec![*i; n]),
            Scalar::Float(f) => Vector::Float(vec![*f; n]),
            Scalar::Str(_) => {
                return Err(EngineError::Sql(
                    "string values cannot be broadcast to a column".to_string(),
                ))
            }
        })
    }

    pub fn take(&self, indices: &[usize]) -> Vector {
        match self {
            Vector::Bool(v) => Vector::Bool(indices.iter().map(|&i| v[i]).collect()),
            Vector::Int(v) => Vector::Int(indices.iter().map(|&i| v[i]).collect()),
            Vector::Float(v) => Vector::Float(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    pub fn concat(&self, other: &Vector) -> Result<Vector> {
        match (self, other) {
            (Vector::Bool(a), Vector::Bool(b)) => {
                Ok(Vector::Bool(a.iter().chain(b).copied().collect()))
            }
            (Vector::Int(a), Vector::Int(b)) => {
                Ok(Vector::Int(a.iter().chain(b).copied().collect()))
            }
            (Vector::Float(a), Vector::Float(b)) => {
                Ok(Vector::Float(a.iter().chain(b).copied().collect()))
            }
            (a, b) => Err(EngineError::Internal(format!(
                "cannot concatenate {:?} with {:?}",
                a.dtype(),
                b.dtype()
            ))),
        }
    }

    pub fn truncate(mut self, n: usize) -> Vector {
        match &mut self {
            Vector::Bool(v) => v.truncate(n),
            Vector::Int(v) => v.truncate(n),
            Vector::Float(v) => v.truncate(n),
        }
        self
    }

    /// Sign flip used for `ORDER BY ... DESC` sort keys.
    pub fn negated(&self) -> Result<Vector> {
        Ok(match self {
            Vector::Bool(v) => Vector::Int(v.iter().map(|&b| -(b as i64)).collect()),
            Vector::Int(v) => Vector::Int(v.iter().map(|&x| -x).collect()),
            Vector::Float(v) => Vector::Float(v.iter().map(|&x| -x).collect()),
        })
    }

    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Vector::Bool(v) => v.iter().map(|&b| b as i64 as f64).collect(),
            Vector::Int(v) => v.iter().map(|&x| x as f64).collect(),
            Vector::Float(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Number of outer-axis components (e.g. 2 or 3 for coordinates).
    pub axes: usize,
    /// Object-axis length.
    pub len: usize,
    /// Row-major: `data[axis * len + i]`.
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(axes: usize, len: usize, data: Vec<f64>) -> Result<Matrix> {
        if data.len() != axes * len {
            return Err(EngineError::Internal(format!(
                "matrix data length {} does not match {}x{}",
                data.len(),
                axes,
                len
            )));
        }
        Ok(Matrix { axes, len, data })
    }

    pub fn row(&self, axis: usize) -> Result<Vector> {
        if axis >= self.axes {
            return Err(EngineError::Sql(format!(
                "index {} out of range for array with {} components",
                axis, self.axes
            )));
        }
        Ok(Vector::Float(
            self.data[axis * self.len..(axis + 1) * self.len].to_vec(),
        ))
    }

    pub fn take(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(self.axes * indices.len());
        for axis in 0..self.axes {
            let base = axis * self.len;
            data.extend(indices.iter().map(|&i| self.data[base + i]));
        }
        Matrix {
            axes: self.axes,
            len: indices.len(),
            data,
        }
    }

    pub fn concat(&self, other: &Matrix) -> Result<Matrix> {
        if self.axes != other.axes {
            return Err(EngineError::Internal(format!(
                "cannot concatenate matrices with {} and {} components",
                self.axes, other.axes
            )));
        }
        let len = self.len + other.len;
        let mut data = Vec::with_capacity(self.axes * len);
        for axis in 0..self.axes {
            data.extend_from_slice(&self.data[axis * self.len..(axis + 1) * self.len]);
            data.extend_from_slice(&other.data[axis * other.len..(axis + 1) * other.len]);
        }
        Ok(Matrix {
            axes: self.axes,
            len,
            data,
        })
    }

    pub fn truncate(&self, n: usize) -> Matrix {
        let n = n.min(self.len);
        self.take(&(0..n).collect::<Vec<_>>())
    }
}

/// 1-D or 2-D array over the object axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NdArray {
    Vector(Vector),
    Matrix(Matrix),
}

impl NdArray {
    /// Object-axis length.
    pub fn len(&self) -> usize {
        match self {
            NdArray::Vector(v) => v.len(),
            NdArray::Matrix(m) => m.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self, indices: &[usize]) -> NdArray {
        match self {
            NdArray::Vector(v) => NdArray::Vector(v.take(indices)),
            NdArray::Matrix(m) => NdArray::Matrix(m.take(indices)),
        }
    }

    pub fn concat(&self, other: &NdArray) -> Result<NdArray> {
        match (self, other) {
            (NdArray::Vector(a), NdArray::Vector(b)) => Ok(NdArray::Vector(a.concat(b)?)),
            (NdArray::Matrix(a), NdArray::Matrix(b)) => Ok(NdArray::Matrix(a.concat(b)?)),
            _ => Err(EngineError::Internal(
                "cannot concatenate arrays of different rank".to_string(),
            )),
        }
    }

    pub fn truncate(self, n: usize) -> NdArray {
        match self {
            NdArray::Vector(v) => NdArray::Vector(v.truncate(n)),
            NdArray::Matrix(m) => NdArray::Matrix(m.truncate(n)),
        }
    }
}

/// Plain serde representation of an array, used for the binary side-table of
/// the mixed envelope and for on-disk shard files. Unlike `Vector`/`Matrix`
/// its serialization never consults the stash, so it is safe under bincode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawArray {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Matrix {
        axes: usize,
        len: usize,
        data: Vec<f64>,
    },
}

impl From<Vector> for RawArray {
    fn from(v: Vector) -> RawArray {
        match v {
            Vector::Bool(v) => RawArray::Bool(v),
            Vector::Int(v) => RawArray::Int(v),
            Vector::Float(v) => RawArray::Float(v),
        }
    }
}

impl From<Matrix> for RawArray {
    fn from(m: Matrix) -> RawArray {
        RawArray::Matrix {
            axes: m.axes,
            len: m.len,
            data: m.data,
        }
    }
}

impl RawArray {
    pub fn into_vector(self) -> Result<Vector> {
        match self {
            RawArray::Bool(v) => Ok(Vector::Bool(v)),
            RawArray::Int(v) => Ok(Vector::Int(v)),
            RawArray::Float(v) => Ok(Vector::Float(v)),
            RawArray::Matrix { .. } => Err(EngineError::Serialization(
                "expected a 1-d array".to_string(),
            )),
        }
    }

    pub fn into_matrix(self) -> Result<Matrix> {
        match self {
            RawArray::Matrix { axes, len, data } => Matrix::new(axes, len, data),
            _ => Err(EngineError::Serialization(
                "expected a 2-d array".to_string(),
            )),
        }
    }

    pub fn into_ndarray(self) -> Result<NdArray> {
        Ok(match self {
            RawArray::Matrix { axes, len, data } => NdArray::Matrix(Matrix::new(axes, len, data)?),
            other => NdArray::Vector(other.into_vector()?),
        })
    }
}

impl From<NdArray> for RawArray {
    fn from(a: NdArray) -> RawArray {
        match a {
            NdArray::Vector(v) => v.into(),
            NdArray::Matrix(m) => m.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Array stash: the side-table used by the mixed-envelope codec.

pub mod stash {
    use super::RawArray;
    use std::cell::RefCell;

    thread_local! {
        static ENCODE: RefCell<Option<Vec<RawArray>>> = const { RefCell::new(None) };
        static DECODE: RefCell<Option<Vec<Option<RawArray>>>> = const { RefCell::new(None) };
    }

    pub fn begin_encode() {
        ENCODE.with(|s| *s.borrow_mut() = Some(Vec::new()));
    }

    pub fn end_encode() -> Vec<RawArray> {
        ENCODE.with(|s| s.borrow_mut().take().unwrap_or_default())
    }

    /// Registers an array in the active encode session and returns its id,
    /// or `None` when no session is active (inline serialization).
    pub fn put(a: RawArray) -> Option<usize> {
        ENCODE.with(|s| {
            s.borrow_mut().as_mut().map(|arrays| {
                arrays.push(a);
                arrays.len() - 1
            })
        })
    }

    pub fn begin_decode(arrays: Vec<RawArray>) {
        DECODE.with(|s| *s.borrow_mut() = Some(arrays.into_iter().map(Some).collect()));
    }

    pub fn end_decode() {
        DECODE.with(|s| *s.borrow_mut() = None);
    }

    pub fn take(id: usize) -> Option<RawArray> {
        DECODE.with(|s| {
            s.borrow_mut()
                .as_mut()
                .and_then(|arrays| arrays.get_mut(id).and_then(Option::take))
        })
    }
}

// ---------------------------------------------------------------------------
// Stash-aware serde for Vector and Matrix.

#[derive(Serialize, Deserialize)]
struct ArrayRef {
    #[serde(rename = "__array__")]
    marker: bool,
    id: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "dtype", rename_all = "lowercase")]
enum VectorRepr {
    Bool { data: Vec<bool> },
    Int { data: Vec<i64> },
    Float { data: Vec<f64> },
}

#[derive(Serialize, Deserialize)]
struct MatrixRepr {
    axes: usize,
    len: usize,
    data: Vec<f64>,
}

impl Serialize for Vector {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(id) = stash::put(self.clone().into()) {
            return ArrayRef { marker: true, id }.serialize(s);
        }
        let repr = match self.clone() {
            Vector::Bool(data) => VectorRepr::Bool { data },
            Vector::Int(data) => VectorRepr::Int { data },
            Vector::Float(data) => VectorRepr::Float { data },
        };
        repr.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Ref(ArrayRef),
            Inline(VectorRepr),
        }
        match Wire::deserialize(d)? {
            Wire::Ref(r) => stash::take(r.id)
                .ok_or_else(|| serde::de::Error::custom(format!("no stashed array {}", r.id)))?
                .into_vector()
                .map_err(serde::de::Error::custom),
            Wire::Inline(VectorRepr::Bool { data }) => Ok(Vector::Bool(data)),
            Wire::Inline(VectorRepr::Int { data }) => Ok(Vector::Int(data)),
            Wire::Inline(VectorRepr::Float { data }) => Ok(Vector::Float(data)),
        }
    }
}

impl Serialize for Matrix {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(id) = stash::put(self.clone().into()) {
            return ArrayRef { marker: true, id }.serialize(s);
        }
        MatrixRepr {
            axes: self.axes,
            len: self.len,
            data: self.data.clone(),
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for Matrix {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Ref(ArrayRef),
            Inline(MatrixRepr),
        }
        match Wire::deserialize(d)? {
            Wire::Ref(r) => stash::take(r.id)
                .ok_or_else(|| serde::de::Error::custom(format!("no stashed array {}", r.id)))?
                .into_matrix()
                .map_err(serde::de::Error::custom),
            Wire::Inline(m) => Matrix::new(m.axes, m.len, m.data).map_err(serde::de::Error::custom),
        }
    }
}
