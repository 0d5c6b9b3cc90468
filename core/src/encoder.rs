//! Document vectors: topic distributions or smoothed word-category hit histograms.

use crate::kaski::WordCategoryMap;
use crate::model::{TopicModel, Vectorizer};
use crate::scale::min_max;
use crate::vectorize::TermCounts;
use crate::{Error, Result, SkipReason};
use std::sync::Arc;

/// Full width at half maximum of the histogram smoothing kernel, in cells.
pub const SMOOTHING_FWHM: f32 = 2.0;

/// Kernel radius in standard deviations.
const TRUNCATE: f32 = 4.0;

pub fn sigma_from_fwhm(fwhm: f32) -> f32 { fwhm / (2.0 * (2.0 * 2f32.ln()).sqrt()) }

/// Normalized Gaussian weights over `-r..=r`, `r = ⌊4σ + 0.5⌋`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (TRUNCATE * sigma + 0.5) as i64;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f32 / (sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Index into `0..n` with half-sample symmetric reflection at both ends.
fn reflect(i: i64, n: usize) -> usize {
    let period = 2 * n as i64;
    let m = i.rem_euclid(period);
    if m < n as i64 { m as usize } else { (period - 1 - m) as usize }
}

/// 1-D Gaussian smoothing with reflected boundaries.
pub fn gaussian_smooth(values: &[f32], sigma: f32) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let n = values.len();
    (0..n as i64)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * values[reflect(i + k as i64 - radius, n)])
                .sum()
        })
        .collect()
}

/// Encodes term counts as hits on a word category map.
#[derive(Debug, Clone)]
pub struct HistogramEncoder {
    map: WordCategoryMap,
    sigma: f32,
}

impl HistogramEncoder {
    pub fn new(map: WordCategoryMap) -> Self {
        Self { map, sigma: sigma_from_fwhm(SMOOTHING_FWHM) }
    }

    pub fn output_len(&self) -> usize { self.map.shape.cells() }

    /// Raw hit counts per flattened cell; terms without a cell are skipped.
    pub fn hit_histogram(&self, counts: &TermCounts, vectorizer: &dyn Vectorizer) -> Vec<f32> {
        let mut hist = vec![0.0f32; self.output_len()];
        for &(tid, c) in counts.iter() {
            if c == 0 {
                continue;
            }
            let Some(cell) = vectorizer.term(tid).and_then(|t| self.map.bmu(t)) else { continue };
            hist[self.map.shape.flat(cell)] += c as f32;
        }
        hist
    }

    /// Smoothed, min-max scaled histogram. A document without a single hit is skipped.
    pub fn encode(&self, counts: &TermCounts, vectorizer: &dyn Vectorizer) -> Result<Vec<f32>> {
        let hist = self.hit_histogram(counts, vectorizer);
        if hist.iter().all(|h| *h == 0.0) {
            return Err(Error::EncodingSkip(SkipReason::NoKnownTerms));
        }
        Ok(min_max(&gaussian_smooth(&hist, self.sigma)))
    }
}

/// How documents are turned into grid input vectors.
#[derive(Clone)]
pub enum DocumentEncoder {
    Topic(Arc<dyn TopicModel>),
    Histogram(HistogramEncoder),
}

impl std::fmt::Debug for DocumentEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentEncoder::Topic(m) => f.debug_struct("Topic").field("num_topics", &m.num_topics()).finish(),
            DocumentEncoder::Histogram(h) => f.debug_struct("Histogram").field("cells", &h.output_len()).finish(),
        }
    }
}

impl DocumentEncoder {
    pub fn output_len(&self) -> usize {
        match self {
            DocumentEncoder::Topic(m) => m.num_topics(),
            DocumentEncoder::Histogram(h) => h.output_len(),
        }
    }

    pub fn encode(&self, counts: &TermCounts, vectorizer: &dyn Vectorizer) -> Result<Vec<f32>> {
        match self {
            DocumentEncoder::Topic(m) => m.transform(counts),
            DocumentEncoder::Histogram(h) => h.encode(counts, vectorizer),
        }
    }
}
