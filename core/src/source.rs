//! Where documents come from: a trait plus the JSON/JSONL file reader.

use crate::normalize::normalize;
use crate::{Document, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Selection applied while reading.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Drop documents whose normalized text is shorter than this.
    pub min_text_chars: usize,
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn accepts(&self, doc: &Document) -> bool {
        self.min_text_chars == 0 || normalize(&doc.text).chars().count() >= self.min_text_chars
    }
}

pub trait DocumentSource {
    fn documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;
}

/// A `.json`/`.jsonl` file, or a directory walked for them.
///
/// `.json` files hold one document object or an array of them; `.jsonl`
/// files hold one object per line.
pub struct JsonFileSource {
    root: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if self.root.is_dir() {
            for entry in WalkDir::new(&self.root).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                let p = entry.path();
                if p.is_file() && matches!(extension(p), Some("json" | "jsonl")) {
                    files.push(p.to_path_buf());
                }
            }
        } else if self.root.is_file() {
            files.push(self.root.clone());
        }
        files
    }
}

fn extension(p: &Path) -> Option<&str> { p.extension().and_then(|s| s.to_str()) }

fn read_jsonl(file: &Path, out: &mut Vec<Document>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(())
}

fn read_json(file: &Path, out: &mut Vec<Document>) -> Result<()> {
    let json: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(file)?))?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                out.push(serde_json::from_value(v)?);
            }
        }
        serde_json::Value::Object(_) => out.push(serde_json::from_value(json)?),
        _ => tracing::warn!(file = %file.display(), "expected an object or array; ignoring"),
    }
    Ok(())
}

impl DocumentSource for JsonFileSource {
    fn documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for file in self.files() {
            if extension(&file) == Some("jsonl") {
                read_jsonl(&file, &mut docs)?;
            } else {
                read_json(&file, &mut docs)?;
            }
        }
        let read = docs.len();
        docs.retain(|d| filter.accepts(d));
        if let Some(limit) = filter.limit {
            docs.truncate(limit);
        }
        tracing::info!(root = %self.root.display(), read, kept = docs.len(), "loaded documents");
        Ok(docs)
    }
}
