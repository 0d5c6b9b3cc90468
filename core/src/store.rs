//! Posting lists: the documents registered at each grid cell.

use crate::grid::GridCell;
use crate::{DocId, DocMeta, Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Outcome of claiming a document's primary cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    /// The document already owns this cell; the first write wins.
    Existing(GridCell),
}

pub trait PostingStore: Send + Sync {
    /// Members of `cell`; empty when the cell has no entry.
    fn get(&self, cell: GridCell) -> Result<BTreeSet<DocId>>;

    /// Atomically add `id` to the set at `cell`. Returns whether it was new.
    fn add(&self, cell: GridCell, id: &str) -> Result<bool>;

    fn cell_of(&self, id: &str) -> Result<Option<GridCell>>;

    fn claim_cell(&self, id: &str, cell: GridCell) -> Result<Claim>;

    fn put_vector(&self, id: &str, vector: &[f32]) -> Result<()>;

    fn vector_of(&self, id: &str) -> Result<Option<Vec<f32>>>;

    fn put_meta(&self, id: &str, meta: &DocMeta) -> Result<()>;

    fn meta_of(&self, id: &str) -> Result<Option<DocMeta>>;

    /// Number of cells with at least one member.
    fn len_cells(&self) -> Result<usize>;

    fn flush(&self) -> Result<()>;

    /// Register `id` at its primary cell, at most once per document.
    ///
    /// A document that already owns a cell keeps it; the add is repeated there
    /// so an interrupted earlier registration still ends up in the postings.
    fn register(&self, id: &str, cell: GridCell) -> Result<GridCell> {
        let cell = match self.claim_cell(id, cell)? {
            Claim::Claimed => cell,
            Claim::Existing(existing) => existing,
        };
        self.add(cell, id)?;
        Ok(cell)
    }
}

#[derive(Default)]
struct MemoryInner {
    postings: HashMap<GridCell, BTreeSet<DocId>>,
    cells: HashMap<DocId, GridCell>,
    vectors: HashMap<DocId, Vec<f32>>,
    meta: HashMap<DocId, DocMeta>,
}

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryPostingStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryPostingStore {
    pub fn new() -> Self { Self::default() }
}

impl PostingStore for MemoryPostingStore {
    fn get(&self, cell: GridCell) -> Result<BTreeSet<DocId>> {
        Ok(self.inner.read().postings.get(&cell).cloned().unwrap_or_default())
    }

    fn add(&self, cell: GridCell, id: &str) -> Result<bool> {
        Ok(self.inner.write().postings.entry(cell).or_default().insert(id.to_string()))
    }

    fn cell_of(&self, id: &str) -> Result<Option<GridCell>> {
        Ok(self.inner.read().cells.get(id).copied())
    }

    fn claim_cell(&self, id: &str, cell: GridCell) -> Result<Claim> {
        let mut inner = self.inner.write();
        match inner.cells.get(id) {
            Some(&existing) => Ok(Claim::Existing(existing)),
            None => {
                inner.cells.insert(id.to_string(), cell);
                Ok(Claim::Claimed)
            }
        }
    }

    fn put_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.inner.write().vectors.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    fn vector_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        Ok(self.inner.read().vectors.get(id).cloned())
    }

    fn put_meta(&self, id: &str, meta: &DocMeta) -> Result<()> {
        self.inner.write().meta.insert(id.to_string(), meta.clone());
        Ok(())
    }

    fn meta_of(&self, id: &str) -> Result<Option<DocMeta>> {
        Ok(self.inner.read().meta.get(id).cloned())
    }

    fn len_cells(&self) -> Result<usize> {
        Ok(self.inner.read().postings.values().filter(|m| !m.is_empty()).count())
    }

    fn flush(&self) -> Result<()> { Ok(()) }
}

/// Durable store on sled.
///
/// Trees: `postings` (cell key → member set), `doc_cells` (id → cell key),
/// `vectors` (id → encoded vector), `docs` (id → metadata). Cell keys are the
/// big-endian `(row, col)` pair, so there is exactly one entry per cell.
pub struct SledPostingStore {
    db: sled::Db,
    postings: sled::Tree,
    doc_cells: sled::Tree,
    vectors: sled::Tree,
    docs: sled::Tree,
}

impl SledPostingStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            postings: db.open_tree("postings")?,
            doc_cells: db.open_tree("doc_cells")?,
            vectors: db.open_tree("vectors")?,
            docs: db.open_tree("docs")?,
            db,
        })
    }

    /// Every non-empty posting entry in flattened cell order.
    pub fn entries(&self) -> Result<Vec<(GridCell, BTreeSet<DocId>)>> {
        let mut out = Vec::new();
        for kv in self.postings.iter() {
            let (k, v) = kv?;
            let cell = GridCell::from_key(&k).ok_or_else(|| Error::Artifact("malformed posting key".into()))?;
            out.push((cell, bincode::deserialize(&v)?));
        }
        Ok(out)
    }
}

impl PostingStore for SledPostingStore {
    fn get(&self, cell: GridCell) -> Result<BTreeSet<DocId>> {
        match self.postings.get(cell.to_key())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn add(&self, cell: GridCell, id: &str) -> Result<bool> {
        let key = cell.to_key();
        loop {
            let current = self.postings.get(key)?;
            let mut members: BTreeSet<DocId> = match &current {
                Some(bytes) => bincode::deserialize(bytes)?,
                None => BTreeSet::new(),
            };
            if !members.insert(id.to_string()) {
                return Ok(false);
            }
            let bytes = bincode::serialize(&members)?;
            // swap only against the set we read; a concurrent add forces a re-read
            match self.postings.compare_and_swap(key, current, Some(bytes))? {
                Ok(()) => return Ok(true),
                Err(_) => tracing::debug!(?cell, id, "posting changed underneath; retrying add"),
            }
        }
    }

    fn cell_of(&self, id: &str) -> Result<Option<GridCell>> {
        match self.doc_cells.get(id.as_bytes())? {
            Some(bytes) => Ok(GridCell::from_key(&bytes)),
            None => Ok(None),
        }
    }

    fn claim_cell(&self, id: &str, cell: GridCell) -> Result<Claim> {
        let key = cell.to_key();
        match self.doc_cells.compare_and_swap(id.as_bytes(), None::<&[u8]>, Some(&key[..]))? {
            Ok(()) => Ok(Claim::Claimed),
            Err(conflict) => conflict
                .current
                .as_deref()
                .and_then(GridCell::from_key)
                .map(Claim::Existing)
                .ok_or_else(|| Error::Artifact(format!("malformed cell for document {id}"))),
        }
    }

    fn put_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.vectors.insert(id.as_bytes(), bincode::serialize(vector)?)?;
        Ok(())
    }

    fn vector_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        match self.vectors.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_meta(&self, id: &str, meta: &DocMeta) -> Result<()> {
        self.docs.insert(id.as_bytes(), bincode::serialize(meta)?)?;
        Ok(())
    }

    fn meta_of(&self, id: &str) -> Result<Option<DocMeta>> {
        match self.docs.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn len_cells(&self) -> Result<usize> { Ok(self.postings.len()) }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
