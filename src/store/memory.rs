/// In-memory shard store: the test stub and the `--local` serving mode.

use crate::error::{EngineError, Result};
use crate::kernel::{Dtype, Matrix, NdArray, Vector};
use crate::store::{fill_vector, Shard, ShardStore};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct MemoryShard {
    size: usize,
    columns: HashMap<String, NdArray>,
    /// Known optional columns that are absent from this shard.
    optional: HashMap<String, Dtype>,
}

pub struct MemoryShardBuilder {
    columns: HashMap<String, NdArray>,
    optional: HashMap<String, Dtype>,
}

impl MemoryShard {
    pub fn builder() -> MemoryShardBuilder {
        MemoryShardBuilder {
            columns: HashMap::new(),
            optional: HashMap::new(),
        }
    }
}

impl MemoryShardBuilder {
    pub fn column(mut self, path: &str, v: Vector) -> Self {
        self.columns.insert(path.to_string(), NdArray::Vector(v));
        self
    }

    pub fn matrix(mut self, path: &str, m: Matrix) -> Self {
        self.columns.insert(path.to_string(), NdArray::Matrix(m));
        self
    }

    pub fn optional(mut self, path: &str, dtype: Dtype) -> Self {
        self.optional.insert(path.to_string(), dtype);
        self
    }

    pub fn build(self) -> Arc<MemoryShard> {
        let size = self.columns.values().map(NdArray::len).max().unwrap_or(0);
        Arc::new(MemoryShard {
            size,
            columns: self.columns,
            optional: self.optional,
        })
    }
}

impl Shard for MemoryShard {
    fn size(&self) -> usize {
        self.size
    }

    fn column(&self, path: &[String]) -> Result<NdArray> {
        if path.is_empty() || path.len() > 3 {
            return Err(EngineError::ColumnNotFound(path.join(".")));
        }
        let key = path.join(".");
        if let Some(col) = self.columns.get(&key) {
            return Ok(col.clone());
        }
        if let Some(&dtype) = self.optional.get(&key) {
            return Ok(NdArray::Vector(fill_vector(dtype, self.size)));
        }
        Err(EngineError::ColumnNotFound(key))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    reruns: HashMap<String, Vec<Arc<MemoryShard>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn add_rerun(mut self, name: &str, shards: Vec<Arc<MemoryShard>>) -> Self {
        self.reruns.insert(name.to_string(), shards);
        self
    }
}

impl ShardStore for MemoryStore {
    fn list_shards(&self, rerun: &str) -> Result<Vec<Arc<dyn Shard>>> {
        let shards = self
            .reruns
            .get(rerun)
            .ok_or_else(|| EngineError::User(format!("no such rerun: {}", rerun)))?;
        Ok(shards
            .iter()
            .map(|s| s.clone() as Arc<dyn Shard>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_columns_fill() {
        let shard = MemoryShard::builder()
            .column("object_id", Vector::Int(vec![1, 2]))
            .optional("forced.i.flags", Dtype::Bool)
            .optional("forced.i.flux", Dtype::Float)
            .build();
        assert_eq!(
            shard
                .column(&["forced".into(), "i".into(), "flags".into()])
                .unwrap(),
            NdArray::Vector(Vector::Bool(vec![true, true]))
        );
        match shard
            .column(&["forced".into(), "i".into(), "flux".into()])
            .unwrap()
        {
            NdArray::Vector(Vector::Float(v)) => assert!(v.iter().all(|x| x.is_nan())),
            other => panic!("unexpected column: {:?}", other),
        }
    }

    #[test]
    fn unknown_columns_fail() {
        let shard = MemoryShard::builder()
            .column("object_id", Vector::Int(vec![1]))
            .build();
        let err = shard.column(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::ColumnNotFound(_)));
    }

    #[test]
    fn unknown_rerun_is_a_user_error() {
        let store = MemoryStore::new();
        assert!(store.list_shards("nope").unwrap_err().is_user());
    }
}
