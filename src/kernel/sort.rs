/// Sorting and grouping primitives.

use crate::error::{EngineError, Result};
use crate::kernel::{Scalar, Vector};

/// Stable argsort over several keys. The first key has the highest priority;
/// later keys break ties. Ascending; callers flip the sign of a key for
/// descending order.
pub fn lexsort(keys: &[Vector]) -> Result<Vec<usize>> {
    let n = match keys.first() {
        Some(k) => k.len(),
        None => return Ok(Vec::new()),
    };
    for k in keys {
        if k.len() != n {
            return Err(EngineError::Internal(format!(
                "sort keys have lengths {} and {}",
                n,
                k.len()
            )));
        }
    }
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&i, &j| {
        for k in keys {
            let ord = k.get(i).total_cmp(&k.get(j));
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(indices)
}

/// Sorted distinct values of `v` plus, for every element, the index of its
/// value in the distinct table.
pub fn unique_inverse(v: &Vector) -> (Vec<Scalar>, Vec<usize>) {
    let n = v.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| v.get(i).total_cmp(&v.get(j)));

    let mut values: Vec<Scalar> = Vec::new();
    let mut inverse = vec![0usize; n];
    for &i in &order {
        let s = v.get(i);
        match values.last() {
            Some(last) if *last == s => {}
            _ => values.push(s.clone()),
        }
        inverse[i] = values.len() - 1;
    }
    (values, inverse)
}

/// Multi-column grouping: distinct key tuples (sorted lexicographically) and
/// the per-row group index.
pub fn multi_column_unique(cols: &[Vector]) -> Result<(Vec<Vec<Scalar>>, Vec<usize>)> {
    if cols.is_empty() {
        return Err(EngineError::Internal("no grouping columns".to_string()));
    }
    if cols.len() == 1 {
        let (values, inverse) = unique_inverse(&cols[0]);
        return Ok((values.into_iter().map(|s| vec![s]).collect(), inverse));
    }
    let n = cols[0].len();
    for c in cols {
        if c.len() != n {
            return Err(EngineError::Internal(
                "grouping columns have different lengths".to_string(),
            ));
        }
    }
    let per_col: Vec<(Vec<Scalar>, Vec<usize>)> = cols.iter().map(unique_inverse).collect();

    // Row tuples of per-column distinct ids; distinct rows in sorted order.
    let row = |i: usize| -> Vec<usize> { per_col.iter().map(|(_, inv)| inv[i]).collect() };
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| row(i));

    let mut tuples: Vec<Vec<usize>> = Vec::new();
    let mut inverse = vec![0usize; n];
    for &i in &order {
        let r = row(i);
        match tuples.last() {
            Some(last) if *last == r => {}
            _ => tuples.push(r.clone()),
        }
        inverse[i] = tuples.len() - 1;
    }
    let keys = tuples
        .into_iter()
        .map(|t| {
            t.iter()
                .enumerate()
                .map(|(col, &id)| per_col[col].0[id].clone())
                .collect()
        })
        .collect();
    Ok((keys, inverse))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexsort_first_key_primary() {
        let a = Vector::Int(vec![2, 1, 2, 1]);
        let b = Vector::Int(vec![0, 3, 1, 2]);
        let idx = lexsort(&[a, b]).unwrap();
        assert_eq!(idx, vec![3, 1, 0, 2]);
    }

    #[test]
    fn lexsort_is_stable() {
        let a = Vector::Int(vec![1, 1, 1]);
        let idx = lexsort(&[a]).unwrap();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn unique_inverse_round_trips() {
        let v = Vector::Int(vec![3, 1, 3, 2, 1]);
        let (values, inverse) = unique_inverse(&v);
        assert_eq!(
            values,
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)]
        );
        assert_eq!(inverse, vec![2, 0, 2, 1, 0]);
    }

    #[test]
    fn multi_column_groups() {
        let a = Vector::Int(vec![0, 1, 0, 1]);
        let b = Vector::Int(vec![5, 5, 6, 5]);
        let (keys, inverse) = multi_column_unique(&[a, b]).unwrap();
        assert_eq!(
            keys,
            vec![
                vec![Scalar::Int(0), Scalar::Int(5)],
                vec![Scalar::Int(0), Scalar::Int(6)],
                vec![Scalar::Int(1), Scalar::Int(5)],
            ]
        );
        assert_eq!(inverse, vec![0, 2, 1, 2]);
    }
}
