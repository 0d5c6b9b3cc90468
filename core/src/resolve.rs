//! Query-time entry point: encode, locate, merge posting lists.

use crate::grid::GridCell;
use crate::normalize::normalize;
use crate::registry::ModelRegistry;
use crate::store::{Claim, PostingStore};
use crate::{DocId, Document, Error, Result, SkipReason};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub enum Query<'a> {
    /// A document registered earlier.
    Id(&'a str),
    /// An already encoded vector, optionally on behalf of a known id.
    Vector { id: Option<&'a str>, vector: &'a [f32] },
    /// A document that is registered at its best cell if it is new.
    Document(&'a Document),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    /// At least `min_count` candidates were found.
    Satisfied,
    /// Every cell was searched without reaching `min_count`.
    Exhausted,
    /// The query has neither a stored cell nor an encodable text.
    NotIndexed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub status: ResolveStatus,
    pub candidates: Vec<DocId>,
    /// Cells searched in the final round.
    pub top_n: usize,
}

impl Resolution {
    fn not_indexed() -> Self {
        Self { status: ResolveStatus::NotIndexed, candidates: Vec::new(), top_n: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Registered(GridCell),
    /// Already registered; the first assignment is kept.
    Existing(GridCell),
    Skipped(SkipReason),
}

impl Update {
    pub fn cell(&self) -> Option<GridCell> {
        match self {
            Update::Registered(c) | Update::Existing(c) => Some(*c),
            Update::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub min_text_chars: usize,
    /// Stop expanding after this many cells even if the grid is larger.
    pub max_top_n: Option<usize>,
}

impl Default for ResolverOptions {
    fn default() -> Self { Self { min_text_chars: 400, max_top_n: None } }
}

impl From<&crate::config::Config> for ResolverOptions {
    fn from(cfg: &crate::config::Config) -> Self {
        Self { min_text_chars: cfg.min_text_chars, max_top_n: cfg.max_top_n }
    }
}

pub struct SimilarityResolver<S> {
    registry: Arc<ModelRegistry>,
    store: S,
    options: ResolverOptions,
}

impl<S: PostingStore> SimilarityResolver<S> {
    pub fn new(registry: Arc<ModelRegistry>, store: S, options: ResolverOptions) -> Self {
        Self { registry, store, options }
    }

    pub fn registry(&self) -> &ModelRegistry { &self.registry }

    pub fn store(&self) -> &S { &self.store }

    pub fn options(&self) -> &ResolverOptions { &self.options }

    /// Encode a new or changed document and register it at its best cell.
    pub fn update(&self, doc: &Document) -> Result<Update> {
        if let Some(cell) = self.store.cell_of(&doc.id)? {
            tracing::debug!(id = %doc.id, ?cell, "already registered");
            self.repair(cell, doc)?;
            return Ok(Update::Existing(cell));
        }
        let vector = match self.registry.encode_document(doc, self.options.min_text_chars) {
            Ok(v) => v,
            Err(Error::EncodingSkip(reason)) => {
                tracing::warn!(id = %doc.id, %reason, "skipping document");
                return Ok(Update::Skipped(reason));
            }
            Err(e) => return Err(e),
        };
        self.register(doc, &vector)
    }

    /// Finish a registration that stopped after the cell was claimed.
    fn repair(&self, cell: GridCell, doc: &Document) -> Result<()> {
        self.store.add(cell, &doc.id)?;
        if self.store.meta_of(&doc.id)?.is_none() {
            self.store.put_meta(&doc.id, &doc.meta())?;
        }
        if self.store.vector_of(&doc.id)?.is_none() {
            match self.registry.encode_document(doc, self.options.min_text_chars) {
                Ok(vector) => self.store.put_vector(&doc.id, &vector)?,
                Err(Error::EncodingSkip(reason)) => {
                    tracing::debug!(id = %doc.id, %reason, "registered without a stored vector");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn register(&self, doc: &Document, vector: &[f32]) -> Result<Update> {
        let grid = self.registry.grid();
        let activation = grid.activation(vector)?;
        let Some(best) = grid.locate(&activation, 1).first().copied() else {
            return Err(Error::Artifact("document grid has no cells".into()));
        };
        match self.store.claim_cell(&doc.id, best)? {
            Claim::Claimed => {
                self.store.add(best, &doc.id)?;
                self.store.put_vector(&doc.id, vector)?;
                self.store.put_meta(&doc.id, &doc.meta())?;
                tracing::info!(id = %doc.id, row = best.row, col = best.col, "registered document");
                Ok(Update::Registered(best))
            }
            Claim::Existing(cell) => {
                self.store.add(cell, &doc.id)?;
                Ok(Update::Existing(cell))
            }
        }
    }

    /// Candidate ids similar to the query, at least `min_count` unless the grid runs out.
    pub fn resolve(&self, query: Query<'_>, min_count: usize) -> Result<Resolution> {
        match query {
            Query::Id(id) => match self.stored_vector(id)? {
                Some(vector) => self.search(&vector, Some(id), min_count),
                None => {
                    tracing::debug!(id, "query document is not indexed");
                    Ok(Resolution::not_indexed())
                }
            },
            Query::Vector { id, vector } => self.search(vector, id, min_count),
            Query::Document(doc) => {
                if self.store.cell_of(&doc.id)?.is_some() {
                    return self.resolve(Query::Id(&doc.id), min_count);
                }
                let vector = match self.registry.encode_document(doc, self.options.min_text_chars) {
                    Ok(v) => v,
                    Err(Error::EncodingSkip(reason)) => {
                        tracing::warn!(id = %doc.id, %reason, "query document not encodable");
                        return Ok(Resolution::not_indexed());
                    }
                    Err(e) => return Err(e),
                };
                let resolution = self.search(&vector, Some(&doc.id), min_count)?;
                // registration always uses the single best cell
                self.register(doc, &vector)?;
                Ok(resolution)
            }
        }
    }

    /// The stored vector, or the prototype of the stored cell.
    fn stored_vector(&self, id: &str) -> Result<Option<Vec<f32>>> {
        if let Some(v) = self.store.vector_of(id)? {
            return Ok(Some(v));
        }
        Ok(self
            .store
            .cell_of(id)?
            .filter(|c| self.registry.grid().shape().contains(*c))
            .map(|c| self.registry.grid().codebook().prototype(c).to_vec()))
    }

    fn search(&self, vector: &[f32], own_id: Option<&str>, min_count: usize) -> Result<Resolution> {
        let grid = self.registry.grid();
        let activation = grid.activation(vector)?;
        let limit = self.options.max_top_n.map_or(grid.total_cells(), |m| m.min(grid.total_cells())).max(1);

        let mut top_n = 1;
        loop {
            // a larger neighbourhood can reorder cells, so locate afresh each round
            let cells = grid.locate(&activation, top_n);
            let candidates = self.collect(&cells, own_id)?;
            tracing::debug!(top_n, found = candidates.len(), min_count, "expanding search");
            if candidates.len() >= min_count {
                return Ok(Resolution { status: ResolveStatus::Satisfied, candidates, top_n });
            }
            if top_n >= limit {
                tracing::debug!(top_n, found = candidates.len(), "search exhausted the grid");
                return Ok(Resolution { status: ResolveStatus::Exhausted, candidates, top_n });
            }
            top_n += 1;
        }
    }

    /// Union of the cells' members in cell order, without the query itself.
    fn collect(&self, cells: &[GridCell], own_id: Option<&str>) -> Result<Vec<DocId>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &cell in cells {
            for id in self.store.get(cell)? {
                if Some(id.as_str()) == own_id {
                    continue;
                }
                if seen.insert(id.clone()) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    /// Attach stored titles and popularity to candidate ids.
    pub fn hydrate(&self, ids: &[DocId]) -> Result<Vec<Candidate>> {
        ids.iter()
            .map(|id| {
                let meta = self.store.meta_of(id)?;
                Ok(Candidate {
                    id: id.clone(),
                    title: meta.as_ref().map(|m| m.title.clone()).unwrap_or_default(),
                    popularity: meta.and_then(|m| m.popularity),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: DocId,
    pub title: String,
    pub popularity: Option<u64>,
}

/// Collapse candidates sharing a normalized title, keeping the most popular.
///
/// A missing popularity ranks below any value; on ties the earlier candidate
/// stays. Untitled candidates are never merged.
pub fn dedupe_by_title(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        let key = normalize(&c.title);
        if key.is_empty() {
            out.push(c);
            continue;
        }
        match slots.get(&key) {
            Some(&i) => {
                if c.popularity > out[i].popularity {
                    out[i] = c;
                }
            }
            None => {
                slots.insert(key, out.len());
                out.push(c);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{DocumentEncoder, HistogramEncoder};
    use crate::grid::{Codebook, GridIndex, GridShape};
    use crate::kaski::WordCategoryMap;
    use crate::model::ProjectedTopicModel;
    use crate::store::MemoryPostingStore;
    use crate::vectorize::{CountVectorizer, VectorizerOptions};

    /// 1×3 grid over two topics: (1,0), (0.5,0.5), (0,1).
    fn resolver() -> SimilarityResolver<MemoryPostingStore> {
        let v = CountVectorizer::from_terms(vec!["pirate".into(), "space".into()], VectorizerOptions::default());
        let topics = ProjectedTopicModel::new(2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let grid = GridIndex::new(Codebook::new(GridShape::new(1, 3), 2, vec![1.0, 0.0, 0.5, 0.5, 0.0, 1.0]).unwrap());
        let registry = ModelRegistry::new(Arc::new(v), DocumentEncoder::Topic(Arc::new(topics)), grid).unwrap();
        let opts = ResolverOptions { min_text_chars: 5, max_top_n: None };
        SimilarityResolver::new(Arc::new(registry), MemoryPostingStore::new(), opts)
    }

    fn populate(r: &SimilarityResolver<MemoryPostingStore>) {
        let s = r.store();
        for (id, col) in [("q", 0), ("a", 0), ("c", 1), ("b", 1), ("d", 2)] {
            s.register(id, GridCell::new(0, col)).unwrap();
        }
    }

    fn doc(id: &str, text: &str) -> Document {
        Document { id: id.into(), title: String::new(), text: text.into(), popularity: None }
    }

    #[test]
    fn expands_until_min_count() {
        let r = resolver();
        populate(&r);
        let res = r.resolve(Query::Vector { id: Some("q"), vector: &[1.0, 0.0] }, 3).unwrap();
        assert_eq!(res.status, ResolveStatus::Satisfied);
        assert_eq!(res.top_n, 2);
        assert_eq!(res.candidates, vec!["a", "b", "c"]);
    }

    #[test]
    fn exhausts_small_grid() {
        let r = resolver();
        populate(&r);
        let res = r.resolve(Query::Vector { id: Some("q"), vector: &[1.0, 0.0] }, 10).unwrap();
        assert_eq!(res.status, ResolveStatus::Exhausted);
        assert_eq!(res.top_n, 3);
        assert_eq!(res.candidates, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn max_top_n_bounds_expansion() {
        let mut r = resolver();
        r.options.max_top_n = Some(2);
        populate(&r);
        let res = r.resolve(Query::Vector { id: None, vector: &[1.0, 0.0] }, 10).unwrap();
        assert_eq!(res.status, ResolveStatus::Exhausted);
        assert_eq!(res.top_n, 2);
        assert_eq!(res.candidates, vec!["a", "q", "b", "c"]);
    }

    #[test]
    fn id_query_uses_cell_prototype_and_skips_itself() {
        let r = resolver();
        populate(&r);
        let res = r.resolve(Query::Id("d"), 1).unwrap();
        assert_eq!(res.status, ResolveStatus::Satisfied);
        assert_eq!(res.top_n, 2);
        assert_eq!(res.candidates, vec!["b", "c"]);

        let res = r.resolve(Query::Id("b"), 1).unwrap();
        assert_eq!(res.candidates, vec!["c"]);
    }

    #[test]
    fn unknown_id_is_not_indexed() {
        let r = resolver();
        let res = r.resolve(Query::Id("nope"), 5).unwrap();
        assert_eq!(res.status, ResolveStatus::NotIndexed);
        assert!(res.candidates.is_empty());
    }

    #[test]
    fn update_registers_once() {
        let r = resolver();
        let d = doc("s1", "space space space");
        assert_eq!(r.update(&d).unwrap(), Update::Registered(GridCell::new(0, 2)));
        assert_eq!(r.update(&doc("s1", "pirate pirate pirate")).unwrap(), Update::Existing(GridCell::new(0, 2)));
        assert!(r.store().get(GridCell::new(0, 0)).unwrap().is_empty());
        assert!(r.store().vector_of("s1").unwrap().is_some());
    }

    #[test]
    fn interrupted_registration_is_completed() {
        let r = resolver();
        assert_eq!(r.store().claim_cell("b1", GridCell::new(0, 0)).unwrap(), Claim::Claimed);
        let d = Document { title: "Treasure".into(), ..doc("b1", "pirate pirate pirate") };
        assert_eq!(r.update(&d).unwrap(), Update::Existing(GridCell::new(0, 0)));
        assert!(r.store().get(GridCell::new(0, 0)).unwrap().contains("b1"));
        assert_eq!(r.store().vector_of("b1").unwrap(), Some(vec![1.0, 0.0]));
        assert_eq!(r.store().meta_of("b1").unwrap().unwrap().title, "Treasure");
        let res = r.resolve(Query::Id("b1"), 1).unwrap();
        assert_eq!(res.status, ResolveStatus::Exhausted);
    }

    #[test]
    fn histogram_without_hits_is_skipped() {
        let v = CountVectorizer::from_terms(vec!["pirate".into(), "space".into()], VectorizerOptions::default());
        let mut labels = HashMap::new();
        labels.insert("pirate".to_string(), GridCell::new(0, 0));
        labels.insert("space".to_string(), GridCell::new(0, 2));
        let words = WordCategoryMap::new(GridShape::new(1, 3), labels).unwrap();
        let grid = GridIndex::new(
            Codebook::new(GridShape::new(1, 3), 3, vec![1.0, 0.0, 0.0, 0.5, 1.0, 0.5, 0.0, 0.0, 1.0]).unwrap(),
        );
        let registry =
            ModelRegistry::new(Arc::new(v), DocumentEncoder::Histogram(HistogramEncoder::new(words)), grid).unwrap();
        let opts = ResolverOptions { min_text_chars: 10, max_top_n: None };
        let r = SimilarityResolver::new(Arc::new(registry), MemoryPostingStore::new(), opts);

        let filler = doc("x", "the and of which were there about these those");
        assert_eq!(r.update(&filler).unwrap(), Update::Skipped(SkipReason::NoKnownTerms));
        assert_eq!(r.store().cell_of("x").unwrap(), None);
        assert!(r.store().get(GridCell::new(0, 0)).unwrap().is_empty());

        assert_eq!(r.update(&doc("p", "pirate ships and pirate maps")).unwrap(), Update::Registered(GridCell::new(0, 0)));
    }

    #[test]
    fn short_or_unknown_text_is_skipped() {
        let r = resolver();
        assert!(matches!(r.update(&doc("x", "abc")).unwrap(), Update::Skipped(SkipReason::TooShort { .. })));
        assert_eq!(r.update(&doc("y", "unrelated words")).unwrap(), Update::Skipped(SkipReason::NoKnownTerms));
        assert_eq!(r.store().cell_of("y").unwrap(), None);
    }

    #[test]
    fn document_query_registers_new_item() {
        let r = resolver();
        populate(&r);
        let res = r.resolve(Query::Document(&doc("p9", "pirate pirate ahoy")), 1).unwrap();
        assert_eq!(res.candidates, vec!["a", "q"]);
        assert_eq!(r.store().cell_of("p9").unwrap(), Some(GridCell::new(0, 0)));
    }

    fn cand(id: &str, title: &str, popularity: Option<u64>) -> Candidate {
        Candidate { id: id.into(), title: title.into(), popularity }
    }

    #[test]
    fn dedupe_keeps_most_popular_in_first_position() {
        let out = dedupe_by_title(vec![
            cand("a", "Dune", Some(3)),
            cand("b", "Emma", None),
            cand("c", "DUNE.", Some(9)),
            cand("d", "dune", None),
        ]);
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn none_ranks_below_any_value() {
        let out = dedupe_by_title(vec![cand("a", "Emma", None), cand("b", "Emma", Some(0))]);
        assert_eq!(out[0].id, "b");
        let out = dedupe_by_title(vec![cand("a", "Emma", Some(2)), cand("b", "Emma", Some(2))]);
        assert_eq!(out[0].id, "a");
    }

    #[test]
    fn untitled_candidates_stay_apart() {
        let out = dedupe_by_title(vec![cand("a", "", None), cand("b", "", None)]);
        assert_eq!(out.len(), 2);
    }
}
