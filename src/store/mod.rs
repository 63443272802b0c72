/// Shard store interface.
///
/// The engine consumes a minimal contract from the catalog layer: an ordered
/// shard list per rerun, typed column access by dotted path, and composable
/// slicing. Shards are never mutated.

pub mod disk;
pub mod memory;

use crate::error::Result;
use crate::kernel::{Dtype, NdArray, Vector};
use std::sync::Arc;

/// Row selection: a boolean mask (may be shorter than the shard, selecting
/// only from its prefix) or explicit row indices.
#[derive(Debug, Clone)]
pub enum Selection {
    Mask(Vec<bool>),
    Indices(Vec<usize>),
}

impl Selection {
    fn to_indices(&self) -> Vec<usize> {
        match self {
            Selection::Mask(mask) => mask
                .iter()
                .enumerate()
                .filter(|(_, &b)| b)
                .map(|(i, _)| i)
                .collect(),
            Selection::Indices(idx) => idx.clone(),
        }
    }
}

pub trait Shard: Send + Sync + std::fmt::Debug {
    fn size(&self) -> usize;

    /// Column by 1-3 component path. Unknown columns fail with
    /// `ColumnNotFound`; known optional columns that are absent yield fill
    /// vectors (NaN for floats, -1 for signed integers, true for booleans).
    fn column(&self, path: &[String]) -> Result<NdArray>;
}

pub trait ShardStore: Send + Sync {
    /// Ordered shard list for a catalog version; stable across a run.
    fn list_shards(&self, rerun: &str) -> Result<Vec<Arc<dyn Shard>>>;
}

/// Slices compose: slicing a sliced shard re-indexes into its base.
pub fn slice(shard: &Arc<dyn Shard>, sel: &Selection) -> Arc<dyn Shard> {
    Arc::new(SlicedShard {
        base: shard.clone(),
        indices: sel.to_indices(),
    })
}

#[derive(Debug)]
struct SlicedShard {
    base: Arc<dyn Shard>,
    indices: Vec<usize>,
}

impl Shard for SlicedShard {
    fn size(&self) -> usize {
        self.indices.len()
    }

    fn column(&self, path: &[String]) -> Result<NdArray> {
        Ok(self.base.column(path)?.take(&self.indices))
    }
}

pub(crate) fn fill_vector(dtype: Dtype, n: usize) -> Vector {
    match dtype {
        Dtype::Float => Vector::Float(vec![f64::NAN; n]),
        Dtype::Int => Vector::Int(vec![-1; n]),
        Dtype::Bool => Vector::Bool(vec![true; n]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Vector;
    use memory::MemoryShard;

    #[test]
    fn slicing_composes() {
        let shard = MemoryShard::builder()
            .column("a", Vector::Int(vec![0, 1, 2, 3, 4, 5]))
            .build();
        let s1 = slice(
            &(shard as Arc<dyn Shard>),
            &Selection::Mask(vec![true, false, true, false, true, false]),
        );
        assert_eq!(s1.size(), 3);
        let s2 = slice(&s1, &Selection::Indices(vec![2, 0]));
        assert_eq!(
            s2.column(&["a".to_string()]).unwrap(),
            NdArray::Vector(Vector::Int(vec![4, 0]))
        );
    }

    #[test]
    fn short_mask_selects_from_prefix() {
        let shard = MemoryShard::builder()
            .column("a", Vector::Int(vec![0, 1, 2, 3]))
            .build();
        let s = slice(&(shard as Arc<dyn Shard>), &Selection::Mask(vec![true, true]));
        assert_eq!(s.size(), 2);
    }
}
