use crate::model::Vectorizer;
use crate::normalize::{ngrams, normalize, tokenize};
use crate::TermId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Sparse term counts, ascending by term id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermCounts(pub Vec<(TermId, u32)>);

impl TermCounts {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &(TermId, u32)> { self.0.iter() }
    pub fn total(&self) -> u64 { self.0.iter().map(|(_, c)| *c as u64).sum() }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizerOptions {
    /// 1 for words, 2 for bigrams.
    pub ngram: usize,
    /// Terms seen in fewer documents are dropped from the vocabulary.
    pub min_df: u32,
    pub stem: bool,
}

impl Default for VectorizerOptions {
    fn default() -> Self { Self { ngram: 1, min_df: 2, stem: false } }
}

/// Bag-of-words vectorizer over a fitted vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountVectorizer {
    pub options: VectorizerOptions,
    vocabulary: HashMap<String, TermId>,
    terms: Vec<String>,
}

impl CountVectorizer {
    /// Fit the vocabulary; term ids follow the lexical order of terms.
    pub fn fit<I, S>(corpus: I, options: VectorizerOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut df: BTreeMap<String, u32> = BTreeMap::new();
        let mut docs = 0usize;
        for text in corpus {
            docs += 1;
            let seen: HashSet<String> = Self::analyze(text.as_ref(), &options).into_iter().collect();
            for term in seen {
                *df.entry(term).or_insert(0) += 1;
            }
        }
        let terms: Vec<String> = df
            .into_iter()
            .filter(|(_, n)| *n >= options.min_df)
            .map(|(t, _)| t)
            .collect();
        let vocabulary = terms.iter().enumerate().map(|(i, t)| (t.clone(), i as TermId)).collect();
        tracing::info!(docs, terms = terms.len(), ngram = options.ngram, "fitted vocabulary");
        Self { options, vocabulary, terms }
    }

    pub fn from_terms(terms: Vec<String>, options: VectorizerOptions) -> Self {
        let vocabulary = terms.iter().enumerate().map(|(i, t)| (t.clone(), i as TermId)).collect();
        Self { options, vocabulary, terms }
    }

    fn analyze(text: &str, options: &VectorizerOptions) -> Vec<String> {
        let tokens = tokenize(&normalize(text), options.stem);
        ngrams(&tokens, options.ngram)
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> { self.vocabulary.get(term).copied() }

    pub fn terms(&self) -> &[String] { &self.terms }

    /// Summed occurrences of every vocabulary term over a corpus.
    pub fn corpus_counts<I, S>(&self, corpus: I) -> Vec<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut totals = vec![0u64; self.terms.len()];
        for text in corpus {
            for (tid, c) in self.transform(text.as_ref()).iter() {
                totals[*tid as usize] += *c as u64;
            }
        }
        totals
    }
}

impl Vectorizer for CountVectorizer {
    fn transform(&self, text: &str) -> TermCounts {
        let mut counts: BTreeMap<TermId, u32> = BTreeMap::new();
        for term in Self::analyze(text, &self.options) {
            if let Some(&tid) = self.vocabulary.get(&term) {
                *counts.entry(tid).or_insert(0) += 1;
            }
        }
        TermCounts(counts.into_iter().collect())
    }

    fn vocabulary_len(&self) -> usize { self.terms.len() }

    fn term(&self, id: TermId) -> Option<&str> { self.terms.get(id as usize).map(String::as_str) }
}
