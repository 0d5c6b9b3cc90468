use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub min: f32,
    pub max: f32,
}

/// Per-column min-max scaling of a row-major matrix to `[0, 1]`.
///
/// A constant column scales to zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinMaxScaler {
    ranges: Vec<ColumnRange>,
}

impl MinMaxScaler {
    pub fn fit(rows: &[Vec<f32>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Error::Artifact("cannot fit a scaler on no rows".into()));
        };
        let mut ranges: Vec<ColumnRange> = first.iter().map(|&v| ColumnRange { min: v, max: v }).collect();
        for row in &rows[1..] {
            if row.len() != ranges.len() {
                return Err(Error::Dimension { expected: ranges.len(), actual: row.len() });
            }
            for (r, &v) in ranges.iter_mut().zip(row) {
                r.min = r.min.min(v);
                r.max = r.max.max(v);
            }
        }
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[ColumnRange] { &self.ranges }

    pub fn transform_row(&self, row: &[f32]) -> Result<Vec<f32>> {
        if row.len() != self.ranges.len() {
            return Err(Error::Dimension { expected: self.ranges.len(), actual: row.len() });
        }
        Ok(row
            .iter()
            .zip(&self.ranges)
            .map(|(&v, r)| {
                let span = r.max - r.min;
                if span == 0.0 { 0.0 } else { (v - r.min) / span }
            })
            .collect())
    }

    pub fn transform(&self, rows: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    pub fn inverse_row(&self, row: &[f32]) -> Result<Vec<f32>> {
        if row.len() != self.ranges.len() {
            return Err(Error::Dimension { expected: self.ranges.len(), actual: row.len() });
        }
        Ok(row.iter().zip(&self.ranges).map(|(&v, r)| v * (r.max - r.min) + r.min).collect())
    }
}

/// Scale a single vector by its own min and max; all zeros when flat.
pub fn min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if values.is_empty() || max == min {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_each_column_independently() {
        let rows = vec![vec![1.0, 10.0, 5.0], vec![3.0, 20.0, 5.0], vec![2.0, 15.0, 5.0]];
        let s = MinMaxScaler::fit(&rows).unwrap();
        let out = s.transform(&rows).unwrap();
        assert_eq!(out[0], vec![0.0, 0.0, 0.0]);
        assert_eq!(out[1], vec![1.0, 1.0, 0.0]);
        assert_eq!(out[2], vec![0.5, 0.5, 0.0]);
        assert_eq!(s.inverse_row(&out[2]).unwrap(), vec![2.0, 15.0, 5.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(MinMaxScaler::fit(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(MinMaxScaler::fit(&[]).is_err());
    }

    #[test]
    fn flat_vector_scales_to_zero() {
        assert_eq!(min_max(&[3.0, 3.0]), vec![0.0, 0.0]);
        assert_eq!(min_max(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
        assert!(min_max(&[]).is_empty());
    }
}
