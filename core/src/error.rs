use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a document was kept out of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Normalized text shorter than the configured minimum.
    TooShort { chars: usize, min: usize },
    /// No term of the document survived vectorization.
    NoKnownTerms,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooShort { chars, min } => {
                write!(f, "text too short ({chars} < {min} chars)")
            }
            SkipReason::NoKnownTerms => write!(f, "no term of the text is in the vocabulary"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("document not encodable: {0}")]
    EncodingSkip(SkipReason),

    #[error("document {0} is not indexed")]
    NotFound(String),

    #[error("store failure: {0}")]
    Store(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact has the wrong kind, version, or is internally inconsistent.
    #[error("invalid artifact: {0}")]
    Artifact(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

impl Error {
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::EncodingSkip(_))
    }
}
