use crate::model::Quantizer;
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
}

impl GridCell {
    pub fn new(row: u32, col: u32) -> Self { Self { row, col } }

    /// Big-endian `(row, col)`, so store keys sort by flattened position.
    pub fn to_key(self) -> [u8; 8] {
        let mut key = [0u8; 8];
        key[..4].copy_from_slice(&self.row.to_be_bytes());
        key[4..].copy_from_slice(&self.col.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != 8 {
            return None;
        }
        let row = u32::from_be_bytes(key[..4].try_into().ok()?);
        let col = u32::from_be_bytes(key[4..].try_into().ok()?);
        Some(Self { row, col })
    }
}

/// Rows × columns of a toroidal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: u32,
    pub cols: u32,
}

impl GridShape {
    pub fn new(rows: u32, cols: u32) -> Self { Self { rows, cols } }

    pub fn cells(&self) -> usize { self.rows as usize * self.cols as usize }

    pub fn flat(&self, cell: GridCell) -> usize { cell.row as usize * self.cols as usize + cell.col as usize }

    pub fn cell_at(&self, flat: usize) -> GridCell {
        let cols = self.cols as usize;
        GridCell { row: (flat / cols) as u32, col: (flat % cols) as u32 }
    }

    pub fn contains(&self, cell: GridCell) -> bool { cell.row < self.rows && cell.col < self.cols }

    /// Euclidean distance with wrap-around at both edges.
    pub fn toroidal_distance(&self, a: GridCell, b: GridCell) -> f32 {
        let wrap = |x: u32, y: u32, n: u32| {
            let d = x.abs_diff(y);
            d.min(n - d) as f32
        };
        let dr = wrap(a.row, b.row, self.rows);
        let dc = wrap(a.col, b.col, self.cols);
        (dr * dr + dc * dc).sqrt()
    }
}

/// Trained prototypes, one `dim`-vector per cell in flattened order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebook {
    pub shape: GridShape,
    pub dim: usize,
    pub weights: Vec<f32>,
}

impl Codebook {
    pub fn new(shape: GridShape, dim: usize, weights: Vec<f32>) -> Result<Self> {
        let expected = shape.cells() * dim;
        if shape.cells() == 0 || dim == 0 {
            return Err(Error::Artifact(format!("empty codebook {}x{}x{dim}", shape.rows, shape.cols)));
        }
        if weights.len() != expected {
            return Err(Error::Dimension { expected, actual: weights.len() });
        }
        Ok(Self { shape, dim, weights })
    }

    pub fn prototype(&self, cell: GridCell) -> &[f32] {
        let start = self.shape.flat(cell) * self.dim;
        &self.weights[start..start + self.dim]
    }
}

impl Quantizer for Codebook {
    fn shape(&self) -> GridShape { self.shape }

    fn dim(&self) -> usize { self.dim }

    /// Squared Euclidean distance to every prototype.
    fn activation(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.dim {
            return Err(Error::Dimension { expected: self.dim, actual: vector.len() });
        }
        Ok(self
            .weights
            .chunks_exact(self.dim)
            .map(|proto| proto.iter().zip(vector).map(|(p, v)| (p - v) * (p - v)).sum())
            .collect())
    }
}

/// First index of the smallest value; NaN never wins.
pub fn argmin(row: &[f32]) -> Option<usize> {
    argmin_where(row, |_| true)
}

/// `argmin` restricted to the indices `keep` accepts.
fn argmin_where(row: &[f32], keep: impl Fn(usize) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    let mut first = None;
    for (i, &v) in row.iter().enumerate() {
        if !keep(i) {
            continue;
        }
        first.get_or_insert(i);
        match best {
            None if !v.is_nan() => best = Some((i, v)),
            Some((_, b)) if v < b => best = Some((i, v)),
            _ => {}
        }
    }
    // all-NaN rows still map somewhere
    best.map(|(i, _)| i).or(first)
}

/// Document grid: a codebook plus the top-N best-matching-unit lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridIndex {
    codebook: Codebook,
}

impl GridIndex {
    pub fn new(codebook: Codebook) -> Self { Self { codebook } }

    pub fn train(trainer: &dyn crate::model::GridTrainer, vectors: &[Vec<f32>], shape: GridShape) -> Result<Self> {
        tracing::info!(rows = shape.rows, cols = shape.cols, samples = vectors.len(), "training grid");
        let codebook = trainer.train(vectors, shape)?;
        if codebook.shape != shape {
            return Err(Error::Artifact("trainer returned a codebook of another shape".into()));
        }
        Ok(Self { codebook })
    }

    pub fn codebook(&self) -> &Codebook { &self.codebook }

    pub fn shape(&self) -> GridShape { self.codebook.shape }

    pub fn total_cells(&self) -> usize { self.codebook.shape.cells() }

    pub fn activation(&self, vector: &[f32]) -> Result<Vec<f32>> { self.codebook.activation(vector) }

    /// Single best cell of an activation row.
    pub fn native_bmu(&self, activation: &[f32]) -> Option<GridCell> {
        argmin(activation).map(|i| self.shape().cell_at(i))
    }

    /// The `top_n` best cells of an activation row, best first, never repeating a cell.
    pub fn locate(&self, activation: &[f32], top_n: usize) -> Vec<GridCell> {
        let cells = activation.len().min(self.total_cells());
        if top_n == 0 || cells == 0 {
            return Vec::new();
        }
        if top_n == 1 {
            return self.native_bmu(&activation[..cells]).into_iter().collect();
        }
        let top_n = if top_n > cells {
            tracing::warn!(top_n, cells, "top_n exceeds grid size; clamping");
            cells
        } else {
            top_n
        };
        let activation = &activation[..cells];
        let mut taken = vec![false; cells];
        let mut out = Vec::with_capacity(top_n);
        for _ in 0..top_n {
            let Some(i) = argmin_where(activation, |j| !taken[j]) else { break };
            out.push(self.shape().cell_at(i));
            taken[i] = true;
        }
        out
    }

    /// Best cell for each vector, the labels of a freshly trained grid.
    pub fn bmus(&self, vectors: &[Vec<f32>]) -> Result<Vec<GridCell>> {
        vectors
            .par_iter()
            .map(|v| {
                let act = self.activation(v)?;
                self.native_bmu(&act).ok_or_else(|| Error::Artifact("empty activation".into()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(rows: u32, cols: u32) -> GridIndex {
        let shape = GridShape::new(rows, cols);
        let weights = (0..shape.cells()).map(|i| i as f32).collect();
        GridIndex::new(Codebook::new(shape, 1, weights).unwrap())
    }

    #[test]
    fn top_two_on_two_by_two() {
        let idx = index(2, 2);
        let cells = idx.locate(&[5.0, 1.0, 3.0, 2.0], 2);
        assert_eq!(cells, vec![GridCell::new(0, 1), GridCell::new(1, 1)]);
    }

    #[test]
    fn top_one_is_native_argmin() {
        let idx = index(2, 3);
        let rows = [
            vec![3.0, 2.0, 1.0, 0.5, 9.0, 4.0],
            vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0],
            vec![f32::NAN, 2.0, 2.0, 7.0, 1.5, 8.0],
        ];
        for row in &rows {
            let native = idx.native_bmu(row).unwrap();
            assert_eq!(idx.locate(row, 1), vec![native]);
        }
        assert_eq!(idx.native_bmu(&rows[1]), Some(GridCell::new(0, 0)));
        assert_eq!(idx.native_bmu(&rows[2]), Some(GridCell::new(1, 1)));
    }

    #[test]
    fn locate_is_distinct_and_ordered() {
        let idx = index(3, 3);
        let row = vec![4.0, 4.0, 0.5, 9.0, 1.0, 1.0, 7.0, 3.0, 2.0];
        for k in 1..=9 {
            let cells = idx.locate(&row, k);
            assert_eq!(cells.len(), k);
            let mut seen = std::collections::HashSet::new();
            assert!(cells.iter().all(|c| seen.insert(*c)));
            let dists: Vec<f32> = cells.iter().map(|c| row[idx.shape().flat(*c)]).collect();
            assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn locate_clamps_to_grid() {
        let idx = index(2, 2);
        assert_eq!(idx.locate(&[1.0, 2.0, 3.0, 4.0], 10).len(), 4);
        assert!(idx.locate(&[1.0, 2.0, 3.0, 4.0], 0).is_empty());
    }

    #[test]
    fn locate_never_repeats_infinite_or_nan_cells() {
        let idx = index(1, 3);
        let far = idx.locate(&[1.0, f32::INFINITY, f32::INFINITY], 3);
        assert_eq!(far, vec![GridCell::new(0, 0), GridCell::new(0, 1), GridCell::new(0, 2)]);
        let nan = idx.locate(&[f32::NAN, 1.0, 2.0], 3);
        assert_eq!(nan, vec![GridCell::new(0, 1), GridCell::new(0, 2), GridCell::new(0, 0)]);
        assert_eq!(argmin(&[f32::NAN, f32::NAN]), Some(0));
        assert_eq!(argmin(&[]), None);
    }

    #[test]
    fn activation_and_bmus() {
        let idx = index(2, 2);
        let act = idx.activation(&[2.2]).unwrap();
        assert_eq!(idx.native_bmu(&act), Some(GridCell::new(1, 0)));
        assert_eq!(idx.bmus(&[vec![0.1], vec![2.9]]).unwrap(), vec![GridCell::new(0, 0), GridCell::new(1, 1)]);
        assert!(idx.activation(&[1.0, 2.0]).is_err());
    }

    /// Every prototype is the mean of the inputs.
    struct MeanTrainer;

    impl crate::model::GridTrainer for MeanTrainer {
        fn train(&self, vectors: &[Vec<f32>], shape: GridShape) -> Result<Codebook> {
            let dim = vectors[0].len();
            let mean: Vec<f32> = (0..dim)
                .map(|d| vectors.iter().map(|v| v[d]).sum::<f32>() / vectors.len() as f32)
                .collect();
            Codebook::new(shape, dim, mean.repeat(shape.cells()))
        }
    }

    #[test]
    fn trains_through_a_grid_trainer() {
        let idx = GridIndex::train(&MeanTrainer, &[vec![0.0, 2.0], vec![2.0, 0.0]], GridShape::new(2, 3)).unwrap();
        assert_eq!(idx.total_cells(), 6);
        assert_eq!(idx.codebook().prototype(GridCell::new(1, 2)), &[1.0, 1.0]);
    }

    #[test]
    fn toroidal_distance_wraps() {
        let shape = GridShape::new(10, 10);
        assert_eq!(shape.toroidal_distance(GridCell::new(0, 0), GridCell::new(9, 0)), 1.0);
        assert_eq!(shape.toroidal_distance(GridCell::new(0, 0), GridCell::new(0, 5)), 5.0);
    }

    #[test]
    fn cell_keys_round_trip_in_order() {
        let a = GridCell::new(1, 300);
        let b = GridCell::new(2, 0);
        assert_eq!(GridCell::from_key(&a.to_key()), Some(a));
        assert!(a.to_key() < b.to_key());
    }
}
