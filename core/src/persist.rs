use crate::grid::GridIndex;
use crate::kaski::WordCategoryMap;
use crate::model::ProjectedTopicModel;
use crate::scale::MinMaxScaler;
use crate::vectorize::CountVectorizer;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Vectorizer,
    TopicModel,
    WordCategoryMap,
    WordScaler,
    DocumentGrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub kind: ArtifactKind,
    pub format_version: u32,
    pub created_at: String,
}

#[derive(Serialize, Deserialize)]
struct Artifact<T> {
    header: ArtifactHeader,
    payload: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    Topic,
    Histogram,
}

/// Training hyperparameters recorded next to a codebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub rows: u32,
    pub cols: u32,
    pub dim: usize,
    pub epochs: u32,
    pub topology: String,
    pub cooling: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub created_at: String,
    pub encoder: EncoderKind,
    pub grid: GridParams,
    pub num_docs: u64,
}

pub struct ModelPaths {
    pub root: PathBuf,
}

impl ModelPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn manifest(&self) -> PathBuf { self.root.join("manifest.json") }
    pub fn vectorizer(&self) -> PathBuf { self.root.join("vectorizer.bin") }
    pub fn topic_model(&self) -> PathBuf { self.root.join("topic_model.bin") }
    pub fn word_map(&self) -> PathBuf { self.root.join("word_category_map.bin") }
    pub fn word_scaler(&self) -> PathBuf { self.root.join("word_scaler.bin") }
    pub fn grid(&self) -> PathBuf { self.root.join("document_grid.bin") }
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Write through a temp file and rename, so readers never see a torn artifact.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn save_artifact<T: Serialize>(path: &Path, kind: ArtifactKind, payload: &T) -> Result<()> {
    let artifact = Artifact {
        header: ArtifactHeader { kind, format_version: FORMAT_VERSION, created_at: now_rfc3339() },
        payload,
    };
    write_atomic(path, &bincode::serialize(&artifact)?)?;
    tracing::debug!(path = %path.display(), ?kind, "saved artifact");
    Ok(())
}

fn load_artifact<T: DeserializeOwned>(path: &Path, kind: ArtifactKind) -> Result<T> {
    let bytes = fs::read(path)?;
    let artifact: Artifact<T> = bincode::deserialize(&bytes)?;
    if artifact.header.kind != kind {
        return Err(Error::Artifact(format!(
            "{} holds {:?}, expected {:?}",
            path.display(),
            artifact.header.kind,
            kind
        )));
    }
    if artifact.header.format_version != FORMAT_VERSION {
        return Err(Error::Artifact(format!(
            "{} has format version {}, this build reads {}",
            path.display(),
            artifact.header.format_version,
            FORMAT_VERSION
        )));
    }
    Ok(artifact.payload)
}

pub fn save_vectorizer(paths: &ModelPaths, v: &CountVectorizer) -> Result<()> {
    save_artifact(&paths.vectorizer(), ArtifactKind::Vectorizer, v)
}

pub fn load_vectorizer(paths: &ModelPaths) -> Result<CountVectorizer> {
    load_artifact(&paths.vectorizer(), ArtifactKind::Vectorizer)
}

pub fn save_topic_model(paths: &ModelPaths, m: &ProjectedTopicModel) -> Result<()> {
    save_artifact(&paths.topic_model(), ArtifactKind::TopicModel, m)
}

pub fn load_topic_model(paths: &ModelPaths) -> Result<ProjectedTopicModel> {
    load_artifact(&paths.topic_model(), ArtifactKind::TopicModel)
}

pub fn save_word_map(paths: &ModelPaths, m: &WordCategoryMap) -> Result<()> {
    save_artifact(&paths.word_map(), ArtifactKind::WordCategoryMap, m)
}

pub fn load_word_map(paths: &ModelPaths) -> Result<WordCategoryMap> {
    load_artifact(&paths.word_map(), ArtifactKind::WordCategoryMap)
}

pub fn save_word_scaler(paths: &ModelPaths, s: &MinMaxScaler) -> Result<()> {
    save_artifact(&paths.word_scaler(), ArtifactKind::WordScaler, s)
}

pub fn save_grid(paths: &ModelPaths, g: &GridIndex) -> Result<()> {
    save_artifact(&paths.grid(), ArtifactKind::DocumentGrid, g)
}

pub fn load_grid(paths: &ModelPaths) -> Result<GridIndex> {
    let grid: GridIndex = load_artifact(&paths.grid(), ArtifactKind::DocumentGrid)?;
    let cb = grid.codebook();
    if cb.weights.len() != cb.shape.cells() * cb.dim {
        return Err(Error::Dimension { expected: cb.shape.cells() * cb.dim, actual: cb.weights.len() });
    }
    Ok(grid)
}

pub fn save_manifest(paths: &ModelPaths, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    write_atomic(&paths.manifest(), json.as_bytes())
}

pub fn load_manifest(paths: &ModelPaths) -> Result<Manifest> {
    let buf = fs::read_to_string(paths.manifest())?;
    let manifest: Manifest = serde_json::from_str(&buf)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::Artifact(format!("manifest format version {}", manifest.format_version)));
    }
    Ok(manifest)
}
