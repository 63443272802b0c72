/// Group keys and per-group state tables.

use crate::error::Result;
use crate::kernel::{Scalar, Value};
use serde::{Deserialize, Serialize};

/// Key of one aggregation group: the tuple of `GROUP BY` values, or the
/// sentinel "no grouping" key when the query has no `GROUP BY` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupKey(pub Option<Vec<Scalar>>);

impl GroupKey {
    pub fn none() -> GroupKey {
        GroupKey(None)
    }

    pub fn tuple(values: Vec<Scalar>) -> GroupKey {
        GroupKey(Some(values))
    }

    pub fn to_value(&self) -> Value {
        match &self.0 {
            None => Value::Null,
            Some(values) => Value::Row(values.iter().cloned().map(Value::Scalar).collect()),
        }
    }
}

/// Insertion-ordered map from group key to a per-group value. Group counts
/// are small, so lookups scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMap {
    entries: Vec<(GroupKey, Value)>,
}

impl GroupMap {
    pub fn new() -> GroupMap {
        GroupMap::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: GroupKey, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(GroupKey, Value)> {
        self.entries.iter()
    }

    /// Merges `other` into `self`; values for keys present on both sides are
    /// combined with `reduce`.
    pub fn merge(
        &mut self,
        other: GroupMap,
        mut reduce: impl FnMut(Value, Value) -> Result<Value>,
    ) -> Result<()> {
        for (key, value) in other.entries {
            match self.entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, v)) => {
                    let prev = std::mem::replace(v, Value::Null);
                    *v = reduce(prev, value)?;
                }
                None => self.entries.push((key, value)),
            }
        }
        Ok(())
    }

    pub fn map_values(
        self,
        mut f: impl FnMut(Value) -> Result<Value>,
    ) -> Result<GroupMap> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (k, v) in self.entries {
            entries.push((k, f(v)?));
        }
        Ok(GroupMap { entries })
    }
}

impl FromIterator<(GroupKey, Value)> for GroupMap {
    fn from_iter<T: IntoIterator<Item = (GroupKey, Value)>>(iter: T) -> GroupMap {
        GroupMap {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Scalar;

    #[test]
    fn merge_reduces_shared_keys() {
        let k0 = GroupKey::tuple(vec![Scalar::Int(0)]);
        let k1 = GroupKey::tuple(vec![Scalar::Int(1)]);
        let mut a = GroupMap::new();
        a.insert(k0.clone(), Value::int(2));
        let mut b = GroupMap::new();
        b.insert(k0.clone(), Value::int(3));
        b.insert(k1.clone(), Value::int(5));
        a.merge(b, |x, y| {
            Ok(Value::int(x.as_usize()? as i64 + y.as_usize()? as i64))
        })
        .unwrap();
        assert_eq!(a.get(&k0), Some(&Value::int(5)));
        assert_eq!(a.get(&k1), Some(&Value::int(5)));
    }
}
