use serde::{Deserialize, Serialize};

pub mod config;
pub mod encoder;
pub mod error;
pub mod grid;
pub mod kaski;
pub mod listing;
pub mod model;
pub mod normalize;
pub mod persist;
pub mod registry;
pub mod resolve;
pub mod scale;
pub mod source;
pub mod store;
pub mod vectorize;

pub use error::{Error, Result, SkipReason};
pub use grid::{GridCell, GridShape};

pub type TermId = u32;
pub type DocId = String;

/// An item as it arrives from the document source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "summary", alias = "body")]
    pub text: String,
    /// Secondary ranking signal, e.g. ratings count.
    #[serde(default)]
    pub popularity: Option<u64>,
}

impl Document {
    /// Title and text as one string, the form both training and queries encode.
    pub fn encodable_text(&self) -> String {
        format!("{} {}", self.title, self.text)
    }

    pub fn meta(&self) -> DocMeta {
        DocMeta { title: self.title.clone(), popularity: self.popularity }
    }
}

/// Per-document fields kept next to the postings for presentation-side filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMeta {
    pub title: String,
    pub popularity: Option<u64>,
}
