/// Fixed-range histogram binning.
///
/// Bin edges are evenly spaced over `[low, high]`; values outside the range
/// (including NaN) are ignored and the rightmost bin is closed on both sides.

use crate::error::{EngineError, Result};
use crate::kernel::{Matrix, Vector};

fn edges(low: f64, high: f64, bins: usize) -> Vec<f64> {
    let step = (high - low) / bins as f64;
    (0..=bins).map(|i| low + step * i as f64).collect()
}

fn check_range(low: f64, high: f64) -> Result<(f64, f64)> {
    if !low.is_finite() || !high.is_finite() {
        return Err(EngineError::User(
            "histogram range must be finite".to_string(),
        ));
    }
    if low > high {
        return Err(EngineError::User(
            "histogram range must be increasing".to_string(),
        ));
    }
    if low == high {
        // Degenerate range widens by half a unit on both sides.
        return Ok((low - 0.5, high + 0.5));
    }
    Ok((low, high))
}

fn bin_of(v: f64, low: f64, high: f64, bins: usize) -> Option<usize> {
    if !(v >= low && v <= high) {
        return None;
    }
    if v == high {
        return Some(bins - 1);
    }
    Some(((v - low) / (high - low) * bins as f64) as usize)
}

pub fn histogram(
    values: &Vector,
    bins: usize,
    range: (f64, f64),
) -> Result<(Vector, Vector)> {
    if bins == 0 {
        return Err(EngineError::User("histogram needs at least one bin".to_string()));
    }
    let (low, high) = check_range(range.0, range.1)?;
    let mut counts = vec![0i64; bins];
    for v in values.to_f64() {
        if let Some(b) = bin_of(v, low, high, bins) {
            counts[b] += 1;
        }
    }
    Ok((Vector::Int(counts), Vector::Float(edges(low, high, bins))))
}

pub fn histogram2d(
    x: &Vector,
    y: &Vector,
    bins: usize,
    x_range: (f64, f64),
    y_range: (f64, f64),
) -> Result<(Matrix, Vector, Vector)> {
    if bins == 0 {
        return Err(EngineError::User("histogram needs at least one bin".to_string()));
    }
    if x.len() != y.len() {
        return Err(EngineError::Sql(format!(
            "histogram2d inputs have lengths {} and {}",
            x.len(),
            y.len()
        )));
    }
    let (xl, xh) = check_range(x_range.0, x_range.1)?;
    let (yl, yh) = check_range(y_range.0, y_range.1)?;
    let mut counts = vec![0.0f64; bins * bins];
    for (xv, yv) in x.to_f64().into_iter().zip(y.to_f64()) {
        if let (Some(bx), Some(by)) = (bin_of(xv, xl, xh, bins), bin_of(yv, yl, yh, bins)) {
            counts[bx * bins + by] += 1.0;
        }
    }
    Ok((
        Matrix::new(bins, bins, counts)?,
        Vector::Float(edges(xl, xh, bins)),
        Vector::Float(edges(yl, yh, bins)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_land_in_bins() {
        let v = Vector::Float(vec![0.0, 0.5, 1.0, 2.0, 3.0, 4.0]);
        let (counts, edges) = histogram(&v, 4, (0.0, 4.0)).unwrap();
        assert_eq!(counts, Vector::Int(vec![2, 1, 1, 2]));
        assert_eq!(edges, Vector::Float(vec![0.0, 1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn out_of_range_and_nan_ignored() {
        let v = Vector::Float(vec![-1.0, 5.0, f64::NAN, 1.0]);
        let (counts, _) = histogram(&v, 2, (0.0, 4.0)).unwrap();
        assert_eq!(counts, Vector::Int(vec![1, 0]));
    }

    #[test]
    fn two_dimensional_counts() {
        let x = Vector::Float(vec![0.0, 0.0, 1.5]);
        let y = Vector::Float(vec![0.0, 1.5, 1.5]);
        let (counts, _, _) = histogram2d(&x, &y, 2, (0.0, 2.0), (0.0, 2.0)).unwrap();
        assert_eq!(counts.data, vec![1.0, 1.0, 0.0, 1.0]);
    }
}
