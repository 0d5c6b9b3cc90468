use crate::encoder::{DocumentEncoder, HistogramEncoder};
use crate::grid::GridIndex;
use crate::model::Vectorizer;
use crate::normalize::normalize;
use crate::persist::{self, EncoderKind, Manifest, ModelPaths};
use crate::vectorize::CountVectorizer;
use crate::{Document, Error, Result, SkipReason};
use std::sync::Arc;

/// Trained models, loaded once at startup and shared read-only.
#[derive(Clone)]
pub struct ModelRegistry {
    vectorizer: Arc<dyn Vectorizer>,
    encoder: DocumentEncoder,
    grid: GridIndex,
}

impl ModelRegistry {
    pub fn new(vectorizer: Arc<dyn Vectorizer>, encoder: DocumentEncoder, grid: GridIndex) -> Result<Self> {
        if grid.total_cells() == 0 {
            return Err(Error::Artifact("document grid has no cells".into()));
        }
        let dim = grid.codebook().dim;
        if encoder.output_len() != dim {
            return Err(Error::Dimension { expected: dim, actual: encoder.output_len() });
        }
        Ok(Self { vectorizer, encoder, grid })
    }

    /// Load every artifact named by the manifest and check they fit together.
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let manifest: Manifest = persist::load_manifest(paths)?;
        let (vectorizer, encoder) = load_encoder(paths, manifest.encoder)?;
        let grid = persist::load_grid(paths)?;
        let shape = grid.shape();
        if (shape.rows, shape.cols, grid.codebook().dim) != (manifest.grid.rows, manifest.grid.cols, manifest.grid.dim) {
            return Err(Error::Artifact("document grid does not match the manifest".into()));
        }
        tracing::info!(
            encoder = ?manifest.encoder,
            rows = shape.rows,
            cols = shape.cols,
            dim = grid.codebook().dim,
            vocabulary = vectorizer.vocabulary_len(),
            "loaded model registry"
        );
        Self::new(Arc::new(vectorizer), encoder, grid)
    }

    pub fn grid(&self) -> &GridIndex { &self.grid }

    pub fn encoder(&self) -> &DocumentEncoder { &self.encoder }

    pub fn vectorizer(&self) -> &dyn Vectorizer { self.vectorizer.as_ref() }

    /// Encode text exactly as the training corpus was encoded.
    pub fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        let counts = self.vectorizer.transform(text);
        self.encoder.encode(&counts, self.vectorizer.as_ref())
    }

    /// Encode a document, refusing texts too short to place reliably.
    pub fn encode_document(&self, doc: &Document, min_text_chars: usize) -> Result<Vec<f32>> {
        let chars = normalize(&doc.text).chars().count();
        if chars == 0 || chars < min_text_chars {
            return Err(Error::EncodingSkip(SkipReason::TooShort { chars, min: min_text_chars }));
        }
        self.encode_text(&doc.encodable_text())
    }
}

/// The vectorizer and document encoder alone, usable before a document grid exists.
pub fn load_encoder(paths: &ModelPaths, kind: EncoderKind) -> Result<(CountVectorizer, DocumentEncoder)> {
    let vectorizer = persist::load_vectorizer(paths)?;
    let encoder = match kind {
        EncoderKind::Topic => {
            let model = persist::load_topic_model(paths)?;
            if model.num_terms() != vectorizer.vocabulary_len() {
                return Err(Error::Dimension { expected: vectorizer.vocabulary_len(), actual: model.num_terms() });
            }
            DocumentEncoder::Topic(Arc::new(model))
        }
        EncoderKind::Histogram => DocumentEncoder::Histogram(HistogramEncoder::new(persist::load_word_map(paths)?)),
    };
    Ok((vectorizer, encoder))
}
