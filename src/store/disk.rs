/// Disk-backed shard store.
///
/// Layout: `<root>/<rerun>/<patch>.shard`, one bincode-encoded column table
/// per patch, listed in filename order so the shard sequence is stable.
/// Column data is loaded lazily on first access and cached per shard.

use crate::error::{EngineError, Result};
use crate::kernel::{Dtype, NdArray, RawArray};
use crate::store::{fill_vector, Shard, ShardStore};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SHARD_EXT: &str = "shard";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardData {
    pub size: usize,
    pub columns: HashMap<String, RawArray>,
    #[serde(default)]
    pub optional: HashMap<String, Dtype>,
}

impl ShardData {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<ShardData> {
        let bytes = std::fs::read(path)?;
        let (data, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(data)
    }
}

#[derive(Debug)]
pub struct DiskShard {
    path: PathBuf,
    cell: OnceCell<ShardData>,
}

impl DiskShard {
    fn load(&self) -> Result<&ShardData> {
        self.cell.get_or_try_init(|| ShardData::read_from(&self.path))
    }
}

impl Shard for DiskShard {
    fn size(&self) -> usize {
        self.load().map(|d| d.size).unwrap_or(0)
    }

    fn column(&self, path: &[String]) -> Result<NdArray> {
        if path.is_empty() || path.len() > 3 {
            return Err(EngineError::ColumnNotFound(path.join(".")));
        }
        let data = self.load()?;
        let key = path.join(".");
        if let Some(raw) = data.columns.get(&key) {
            return raw.clone().into_ndarray();
        }
        if let Some(&dtype) = data.optional.get(&key) {
            return Ok(NdArray::Vector(fill_vector(dtype, data.size)));
        }
        Err(EngineError::ColumnNotFound(key))
    }
}

pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> DiskStore {
        DiskStore { root: root.into() }
    }
}

impl ShardStore for DiskStore {
    fn list_shards(&self, rerun: &str) -> Result<Vec<Arc<dyn Shard>>> {
        // Reject path-like rerun names before touching the filesystem.
        if rerun.contains(['/', '\\']) || rerun.starts_with('.') {
            return Err(EngineError::User(format!("no such rerun: {}", rerun)));
        }
        let dir = self.root.join(rerun);
        if !dir.is_dir() {
            return Err(EngineError::User(format!("no such rerun: {}", rerun)));
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == SHARD_EXT).unwrap_or(false))
            .collect();
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| {
                Arc::new(DiskShard {
                    path,
                    cell: OnceCell::new(),
                }) as Arc<dyn Shard>
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Vector;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let rerun_dir = dir.path().join("test");
        std::fs::create_dir(&rerun_dir).unwrap();

        for (name, ids) in [("p0", vec![1i64, 2]), ("p1", vec![3, 4, 5])] {
            let mut columns = HashMap::new();
            columns.insert("object_id".to_string(), RawArray::Int(ids.clone()));
            let data = ShardData {
                size: ids.len(),
                columns,
                optional: HashMap::new(),
            };
            data.write_to(&rerun_dir.join(format!("{}.{}", name, SHARD_EXT)))
                .unwrap();
        }

        let store = DiskStore::new(dir.path());
        let shards = store.list_shards("test").unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].size(), 2);
        assert_eq!(
            shards[1].column(&["object_id".to_string()]).unwrap(),
            NdArray::Vector(Vector::Int(vec![3, 4, 5]))
        );
        assert!(store.list_shards("missing").unwrap_err().is_user());
    }
}
