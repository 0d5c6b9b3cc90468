//! Word features from bigram context ("Kaski encoding") and the word category map
//! trained on them.
//!
//! Every vocabulary word gets a random seed vector. A word is then described by
//! the count-weighted mean seed vector of the words that follow it, concatenated
//! with the mean seed vector of the words that precede it.

use crate::grid::{GridCell, GridIndex, GridShape};
use crate::scale::MinMaxScaler;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_SLOTS: usize = 90;

/// `slots × words` random context matrix, one column per vocabulary word.
#[derive(Debug, Clone)]
pub struct SeedMatrix {
    slots: usize,
    words: usize,
    data: Vec<f32>,
}

impl SeedMatrix {
    pub fn random(slots: usize, words: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..slots * words).map(|_| rng.gen_range(0.0f32..1.0)).collect();
        Self { slots, words, data }
    }

    pub fn from_columns(columns: &[Vec<f32>]) -> Result<Self> {
        let slots = columns.first().map_or(0, Vec::len);
        let words = columns.len();
        let mut data = vec![0.0; slots * words];
        for (w, col) in columns.iter().enumerate() {
            if col.len() != slots {
                return Err(Error::Dimension { expected: slots, actual: col.len() });
            }
            for (s, &v) in col.iter().enumerate() {
                data[s * words + w] = v;
            }
        }
        Ok(Self { slots, words, data })
    }

    pub fn slots(&self) -> usize { self.slots }

    fn add_scaled_column(&self, word: usize, scale: f32, acc: &mut [f32]) {
        for (s, a) in acc.iter_mut().enumerate() {
            *a += scale * self.data[s * self.words + word];
        }
    }
}

/// Total occurrences per bigram `(first, second)`.
#[derive(Debug, Clone, Default)]
pub struct BigramCounts {
    counts: HashMap<(String, String), f64>,
}

impl BigramCounts {
    pub fn insert(&mut self, first: &str, second: &str, count: f64) {
        *self.counts.entry((first.to_string(), second.to_string())).or_insert(0.0) += count;
    }

    /// Build from `"first second"` terms and their corpus totals.
    pub fn from_terms<'a, I>(terms: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut out = Self::default();
        for (term, count) in terms {
            if let Some((a, b)) = term.split_once(' ') {
                out.insert(a, b, count);
            }
        }
        out
    }

    pub fn len(&self) -> usize { self.counts.len() }

    pub fn is_empty(&self) -> bool { self.counts.is_empty() }
}

/// One `2 × slots` feature row per vocabulary word.
#[derive(Debug, Clone)]
pub struct KaskiFeatures {
    pub words: Vec<String>,
    pub rows: Vec<Vec<f32>>,
}

pub fn encode_kaski(vocabulary: &[String], seeds: &SeedMatrix, bigrams: &BigramCounts) -> Result<KaskiFeatures> {
    if seeds.words != vocabulary.len() {
        return Err(Error::Dimension { expected: vocabulary.len(), actual: seeds.words });
    }
    let index: HashMap<&str, usize> = vocabulary.iter().enumerate().map(|(i, w)| (w.as_str(), i)).collect();

    // partners of each word, split by the side the word is on
    let mut as_first: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    let mut as_last: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    for ((a, b), &c) in &bigrams.counts {
        as_first.entry(a.as_str()).or_default().push((b.as_str(), c));
        as_last.entry(b.as_str()).or_default().push((a.as_str(), c));
    }

    let slots = seeds.slots;
    let mean_context = |pairs: Option<&Vec<(&str, f64)>>| -> Vec<f32> {
        let mut acc = vec![0.0f32; slots];
        let Some(pairs) = pairs else { return acc };
        let total: f64 = pairs.iter().map(|(_, c)| c).sum();
        if total == 0.0 {
            return acc;
        }
        for (partner, c) in pairs {
            if let Some(&p) = index.get(*partner) {
                seeds.add_scaled_column(p, *c as f32, &mut acc);
            }
        }
        acc.iter_mut().for_each(|v| *v /= total as f32);
        acc
    };

    let rows = vocabulary
        .iter()
        .map(|w| {
            let mut row = mean_context(as_first.get(w.as_str()));
            row.extend(mean_context(as_last.get(w.as_str())));
            row
        })
        .collect();
    tracing::info!(words = vocabulary.len(), bigrams = bigrams.len(), slots, "kaski encoded vocabulary");
    Ok(KaskiFeatures { words: vocabulary.to_vec(), rows })
}

impl KaskiFeatures {
    /// Min-max scale each word's feature column, returning one training row per word.
    pub fn scaled(&self) -> Result<(Vec<Vec<f32>>, MinMaxScaler)> {
        let dim = self.rows.first().map_or(0, Vec::len);
        // features × words, so columns are words
        let by_feature: Vec<Vec<f32>> = (0..dim).map(|f| self.rows.iter().map(|r| r[f]).collect()).collect();
        let scaler = MinMaxScaler::fit(&by_feature)?;
        let scaled = scaler.transform(&by_feature)?;
        let rows = (0..self.rows.len()).map(|w| scaled.iter().map(|r| r[w]).collect()).collect();
        Ok((rows, scaler))
    }
}

/// Word-level grid: the cell each vocabulary word was mapped to during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCategoryMap {
    pub shape: GridShape,
    labels: HashMap<String, GridCell>,
}

impl WordCategoryMap {
    pub fn new(shape: GridShape, labels: HashMap<String, GridCell>) -> Result<Self> {
        if let Some((w, c)) = labels.iter().find(|(_, c)| !shape.contains(**c)) {
            return Err(Error::Artifact(format!("label {w} at {c:?} is outside the grid")));
        }
        Ok(Self { shape, labels })
    }

    /// Label every word with its best cell on a trained grid.
    pub fn from_grid(grid: &GridIndex, words: &[String], rows: &[Vec<f32>]) -> Result<Self> {
        let bmus = grid.bmus(rows)?;
        let labels = words.iter().cloned().zip(bmus).collect();
        Self::new(grid.shape(), labels)
    }

    pub fn bmu(&self, word: &str) -> Option<GridCell> { self.labels.get(word).copied() }

    pub fn len(&self) -> usize { self.labels.len() }

    pub fn is_empty(&self) -> bool { self.labels.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Codebook;

    fn words(ws: &[&str]) -> Vec<String> { ws.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn mean_context_per_side() {
        let vocab = words(&["dark", "night", "sky"]);
        // slot vectors: dark=[1,0], night=[0,1], sky=[1,1]
        let seeds = SeedMatrix::from_columns(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let mut bigrams = BigramCounts::default();
        bigrams.insert("dark", "night", 3.0);
        bigrams.insert("dark", "sky", 1.0);
        let f = encode_kaski(&vocab, &seeds, &bigrams).unwrap();

        // dark first: (3*[0,1] + 1*[1,1]) / 4; never second
        assert_eq!(f.rows[0], vec![0.25, 1.0, 0.0, 0.0]);
        // night second after dark
        assert_eq!(f.rows[1], vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(f.rows[2], vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_partner_dilutes_the_mean() {
        let vocab = words(&["cat"]);
        let seeds = SeedMatrix::from_columns(&[vec![2.0]]).unwrap();
        let mut bigrams = BigramCounts::default();
        bigrams.insert("cat", "cat", 1.0);
        bigrams.insert("cat", "zebra", 1.0);
        let f = encode_kaski(&vocab, &seeds, &bigrams).unwrap();
        assert_eq!(f.rows[0], vec![1.0, 2.0]);
    }

    #[test]
    fn isolated_word_is_all_zero() {
        let vocab = words(&["lonely", "pair", "mate"]);
        let seeds = SeedMatrix::random(4, 3, 7);
        let bigrams = BigramCounts::from_terms([("pair mate", 2.0)]);
        let f = encode_kaski(&vocab, &seeds, &bigrams).unwrap();
        assert_eq!(f.rows[0], vec![0.0; 8]);
        assert_eq!(f.rows.iter().map(Vec::len).collect::<Vec<_>>(), vec![8, 8, 8]);
    }

    #[test]
    fn scaling_is_per_word() {
        let f = KaskiFeatures { words: words(&["a", "b"]), rows: vec![vec![1.0, 3.0], vec![5.0, 5.0]] };
        let (rows, scaler) = f.scaled().unwrap();
        assert_eq!(rows, vec![vec![0.0, 1.0], vec![0.0, 0.0]]);
        assert_eq!(scaler.ranges().len(), 2);
    }

    #[test]
    fn word_map_labels_from_grid() {
        let shape = GridShape::new(1, 2);
        let grid = GridIndex::new(Codebook::new(shape, 1, vec![0.0, 1.0]).unwrap());
        let map = WordCategoryMap::from_grid(&grid, &words(&["lo", "hi"]), &[vec![0.1], vec![0.9]]).unwrap();
        assert_eq!(map.bmu("lo"), Some(GridCell::new(0, 0)));
        assert_eq!(map.bmu("hi"), Some(GridCell::new(0, 1)));
        assert_eq!(map.bmu("missing"), None);
    }

    #[test]
    fn seeds_are_reproducible() {
        let a = SeedMatrix::random(3, 2, 42);
        let b = SeedMatrix::random(3, 2, 42);
        assert_eq!(a.data, b.data);
        assert!(a.data.iter().all(|v| (0.0..1.0).contains(v)));
    }
}
