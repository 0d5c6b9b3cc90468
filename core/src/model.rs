//! Narrow interfaces to the numeric capabilities the pipeline consumes.
//!
//! Fitting the topic model and training the grid happen outside this crate;
//! only their results cross these traits.

use crate::grid::{Codebook, GridShape};
use crate::vectorize::TermCounts;
use crate::{Error, Result, SkipReason, TermId};
use serde::{Deserialize, Serialize};

pub trait Vectorizer: Send + Sync {
    fn transform(&self, text: &str) -> TermCounts;
    fn vocabulary_len(&self) -> usize;
    fn term(&self, id: TermId) -> Option<&str>;
}

pub trait TopicModel: Send + Sync {
    fn num_topics(&self) -> usize;
    /// Dense topic distribution for one document.
    fn transform(&self, counts: &TermCounts) -> Result<Vec<f32>>;
}

/// Distance from a vector to every grid cell, in flattened cell order.
pub trait Quantizer: Send + Sync {
    fn shape(&self) -> GridShape;
    fn dim(&self) -> usize;
    fn activation(&self, vector: &[f32]) -> Result<Vec<f32>>;
}

/// Competitive-learning training of a toroidal grid.
pub trait GridTrainer {
    fn train(&self, vectors: &[Vec<f32>], shape: GridShape) -> Result<Codebook>;
}

/// Topic model folded in from exported topic-word weights.
///
/// `theta[k] ∝ Σ_t count(t) · phi[k][t]`, normalized to sum to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedTopicModel {
    num_topics: usize,
    num_terms: usize,
    /// Row-major `num_topics × num_terms`.
    topic_word: Vec<f32>,
}

impl ProjectedTopicModel {
    pub fn new(num_topics: usize, num_terms: usize, topic_word: Vec<f32>) -> Result<Self> {
        if topic_word.len() != num_topics * num_terms {
            return Err(Error::Dimension { expected: num_topics * num_terms, actual: topic_word.len() });
        }
        Ok(Self { num_topics, num_terms, topic_word })
    }

    pub fn num_terms(&self) -> usize { self.num_terms }
}

impl TopicModel for ProjectedTopicModel {
    fn num_topics(&self) -> usize { self.num_topics }

    fn transform(&self, counts: &TermCounts) -> Result<Vec<f32>> {
        let mut theta = vec![0.0f32; self.num_topics];
        for &(tid, c) in counts.iter() {
            let t = tid as usize;
            if t >= self.num_terms {
                return Err(Error::Dimension { expected: self.num_terms, actual: t + 1 });
            }
            for (k, th) in theta.iter_mut().enumerate() {
                *th += c as f32 * self.topic_word[k * self.num_terms + t];
            }
        }
        let sum: f32 = theta.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(Error::EncodingSkip(SkipReason::NoKnownTerms));
        }
        theta.iter_mut().for_each(|v| *v /= sum);
        Ok(theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_sums_to_one() {
        // two topics over three terms
        let m = ProjectedTopicModel::new(2, 3, vec![0.7, 0.2, 0.1, 0.1, 0.1, 0.8]).unwrap();
        let theta = m.transform(&TermCounts(vec![(0, 2), (2, 1)])).unwrap();
        assert_eq!(theta.len(), 2);
        assert!((theta.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(theta[0] > theta[1]);
    }

    #[test]
    fn empty_counts_are_a_skip() {
        let m = ProjectedTopicModel::new(2, 1, vec![1.0, 1.0]).unwrap();
        assert!(m.transform(&TermCounts::default()).unwrap_err().is_skip());
    }

    #[test]
    fn rejects_bad_shape() {
        assert!(ProjectedTopicModel::new(2, 2, vec![1.0]).is_err());
    }
}
