use anyhow::{bail, Context, Result};
use bookgrid_core::config::Config;
use bookgrid_core::grid::{Codebook, GridIndex, GridShape};
use bookgrid_core::kaski::{encode_kaski, BigramCounts, SeedMatrix, WordCategoryMap, DEFAULT_SLOTS};
use bookgrid_core::model::{ProjectedTopicModel, Vectorizer};
use bookgrid_core::persist::{self, EncoderKind, GridParams, Manifest, ModelPaths, FORMAT_VERSION};
use bookgrid_core::registry::{load_encoder, ModelRegistry};
use bookgrid_core::resolve::{ResolverOptions, SimilarityResolver, Update};
use bookgrid_core::source::{DocumentFilter, DocumentSource, JsonFileSource};
use bookgrid_core::store::{PostingStore, SledPostingStore};
use bookgrid_core::vectorize::{CountVectorizer, VectorizerOptions};
use bookgrid_core::{Document, Error};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bookgrid-indexer")]
#[command(about = "Prepare grid training data and populate the posting store", long_about = None)]
struct Cli {
    /// Model artifact directory (defaults to BOOKGRID_MODEL_DIR)
    #[arg(long, global = true)]
    models: Option<PathBuf>,
    /// Encoding threads for bulk jobs (defaults to BOOKGRID_WORKERS)
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Skip documents with fewer normalized characters
    #[arg(long, global = true)]
    min_text_chars: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EncoderArg {
    Topic,
    Histogram,
}

impl From<EncoderArg> for EncoderKind {
    fn from(e: EncoderArg) -> Self {
        match e {
            EncoderArg::Topic => EncoderKind::Topic,
            EncoderArg::Histogram => EncoderKind::Histogram,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the word vocabulary over a JSON/JSONL corpus
    Vocab {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 2)]
        min_df: u32,
        #[arg(long, default_value_t = false)]
        stem: bool,
    },
    /// Write Kaski word features, the training rows of the word grid
    Kaski {
        #[arg(long)]
        input: PathBuf,
        /// JSONL output, one `{word, features}` object per vocabulary word
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_SLOTS)]
        slots: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Label every word with its cell on a trained word grid
    LabelWords {
        /// Kaski features written by `kaski`
        #[arg(long)]
        features: PathBuf,
        /// Trained word grid codebook (JSON)
        #[arg(long)]
        codebook: PathBuf,
    },
    /// Import topic-word weights of a trained topic model (JSON)
    ImportTopics {
        #[arg(long)]
        topics: PathBuf,
    },
    /// Encode a corpus to document vectors, the training rows of the document grid
    Encode {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum)]
        encoder: EncoderArg,
    },
    /// Import a trained document grid codebook (JSON) and write the manifest
    ImportGrid {
        #[arg(long)]
        codebook: PathBuf,
        #[arg(long, value_enum)]
        encoder: EncoderArg,
        #[arg(long, default_value_t = 0)]
        epochs: u32,
        #[arg(long, default_value_t = 0)]
        num_docs: u64,
    },
    /// Register documents at their best cell in the posting store
    Populate {
        #[arg(long)]
        input: PathBuf,
        /// Posting store directory (defaults to BOOKGRID_STORE_DIR)
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

/// Codebook exchanged with the external grid trainer.
#[derive(Debug, Serialize, Deserialize)]
struct CodebookFile {
    rows: u32,
    cols: u32,
    dim: usize,
    /// Row-major `rows × cols × dim`.
    weights: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TopicsFile {
    num_topics: usize,
    num_terms: usize,
    topic_word: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WordFeatures {
    word: String,
    features: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct DocVector<'a> {
    id: &'a str,
    vector: Vec<f32>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(m) = cli.models {
        config.model_dir = m;
    }
    if let Some(w) = cli.workers {
        config.workers = w.max(1);
    }
    if let Some(n) = cli.min_text_chars {
        config.min_text_chars = n;
    }
    let paths = ModelPaths::new(&config.model_dir);

    match cli.command {
        Commands::Vocab { input, min_df, stem } => fit_vocabulary(&config, &paths, &input, min_df, stem),
        Commands::Kaski { input, output, slots, seed } => write_kaski(&config, &paths, &input, &output, slots, seed),
        Commands::LabelWords { features, codebook } => label_words(&paths, &features, &codebook),
        Commands::ImportTopics { topics } => import_topics(&paths, &topics),
        Commands::Encode { input, output, encoder } => encode_corpus(&config, &paths, &input, &output, encoder.into()),
        Commands::ImportGrid { codebook, encoder, epochs, num_docs } => {
            import_grid(&paths, &codebook, encoder.into(), epochs, num_docs)
        }
        Commands::Populate { input, store } => {
            if let Some(s) = store {
                config.store_dir = s;
            }
            populate(&config, &paths, &input)
        }
    }
}

fn read_corpus(config: &Config, input: &Path) -> Result<Vec<Document>> {
    let filter = DocumentFilter { min_text_chars: config.min_text_chars, limit: None };
    let docs = JsonFileSource::new(input)
        .documents(&filter)
        .with_context(|| format!("reading documents from {}", input.display()))?;
    if docs.is_empty() {
        bail!("no documents with at least {} characters under {}", config.min_text_chars, input.display());
    }
    Ok(docs)
}

fn worker_pool(config: &Config) -> Result<rayon::ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(config.workers).build()?)
}

fn fit_vocabulary(config: &Config, paths: &ModelPaths, input: &Path, min_df: u32, stem: bool) -> Result<()> {
    let docs = read_corpus(config, input)?;
    let options = VectorizerOptions { ngram: 1, min_df, stem };
    let vectorizer = CountVectorizer::fit(docs.iter().map(Document::encodable_text), options);
    persist::save_vectorizer(paths, &vectorizer)?;
    tracing::info!(terms = vectorizer.vocabulary_len(), models = %paths.root.display(), "vocabulary saved");
    Ok(())
}

fn write_kaski(config: &Config, paths: &ModelPaths, input: &Path, output: &Path, slots: usize, seed: u64) -> Result<()> {
    let docs = read_corpus(config, input)?;
    let words = persist::load_vectorizer(paths).context("fit the vocabulary first")?;
    let texts: Vec<String> = docs.iter().map(Document::encodable_text).collect();

    let bigram_options = VectorizerOptions { ngram: 2, ..words.options.clone() };
    let bigrams = CountVectorizer::fit(&texts, bigram_options);
    let totals = bigrams.corpus_counts(&texts);
    let counts = BigramCounts::from_terms(bigrams.terms().iter().map(String::as_str).zip(totals.iter().map(|&c| c as f64)));

    let seeds = SeedMatrix::random(slots, words.terms().len(), seed);
    let features = encode_kaski(words.terms(), &seeds, &counts)?;
    let (rows, scaler) = features.scaled()?;
    persist::save_word_scaler(paths, &scaler)?;

    let mut out = BufWriter::new(File::create(output)?);
    for (word, row) in features.words.iter().zip(rows) {
        serde_json::to_writer(&mut out, &WordFeatures { word: word.clone(), features: row })?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    tracing::info!(words = features.words.len(), bigrams = counts.len(), output = %output.display(), "kaski features written");
    Ok(())
}

fn read_codebook(path: &Path) -> Result<GridIndex> {
    let file: CodebookFile = serde_json::from_reader(BufReader::new(File::open(path)?))
        .with_context(|| format!("parsing codebook {}", path.display()))?;
    let codebook = Codebook::new(GridShape::new(file.rows, file.cols), file.dim, file.weights)?;
    Ok(GridIndex::new(codebook))
}

fn label_words(paths: &ModelPaths, features: &Path, codebook: &Path) -> Result<()> {
    let grid = read_codebook(codebook)?;
    let mut words = Vec::new();
    let mut rows = Vec::new();
    for line in BufReader::new(File::open(features)?).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let wf: WordFeatures = serde_json::from_str(&line)?;
        words.push(wf.word);
        rows.push(wf.features);
    }
    let map = WordCategoryMap::from_grid(&grid, &words, &rows)?;
    persist::save_word_map(paths, &map)?;
    tracing::info!(words = map.len(), rows = map.shape.rows, cols = map.shape.cols, "word category map saved");
    Ok(())
}

fn import_topics(paths: &ModelPaths, topics: &Path) -> Result<()> {
    let file: TopicsFile = serde_json::from_reader(BufReader::new(File::open(topics)?))?;
    let model = ProjectedTopicModel::new(file.num_topics, file.num_terms, file.topic_word)?;
    let vocabulary = persist::load_vectorizer(paths)?.vocabulary_len();
    if model.num_terms() != vocabulary {
        bail!("topic model covers {} terms, vocabulary has {}", model.num_terms(), vocabulary);
    }
    persist::save_topic_model(paths, &model)?;
    tracing::info!(topics = file.num_topics, terms = vocabulary, "topic model saved");
    Ok(())
}

fn encode_corpus(config: &Config, paths: &ModelPaths, input: &Path, output: &Path, kind: EncoderKind) -> Result<()> {
    let docs = read_corpus(config, input)?;
    let (vectorizer, encoder) = load_encoder(paths, kind)?;
    let pool = worker_pool(config)?;
    let encoded: Vec<Option<Vec<f32>>> = pool.install(|| {
        docs.par_iter()
            .map(|doc| match encoder.encode(&vectorizer.transform(&doc.encodable_text()), &vectorizer) {
                Ok(v) => Ok(Some(v)),
                Err(Error::EncodingSkip(reason)) => {
                    tracing::warn!(id = %doc.id, %reason, "skipping document");
                    Ok(None)
                }
                Err(e) => Err(e),
            })
            .collect::<bookgrid_core::Result<_>>()
    })?;

    let mut out = BufWriter::new(File::create(output)?);
    let mut written = 0usize;
    for (doc, vector) in docs.iter().zip(encoded) {
        if let Some(vector) = vector {
            serde_json::to_writer(&mut out, &DocVector { id: &doc.id, vector })?;
            out.write_all(b"\n")?;
            written += 1;
        }
    }
    out.flush()?;
    tracing::info!(written, skipped = docs.len() - written, dim = encoder.output_len(), "document vectors written");
    Ok(())
}

fn import_grid(paths: &ModelPaths, codebook: &Path, kind: EncoderKind, epochs: u32, num_docs: u64) -> Result<()> {
    let grid = read_codebook(codebook)?;
    let (_, encoder) = load_encoder(paths, kind)?;
    if encoder.output_len() != grid.codebook().dim {
        bail!("codebook dimension {} does not match encoder output {}", grid.codebook().dim, encoder.output_len());
    }
    persist::save_grid(paths, &grid)?;
    let shape = grid.shape();
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        created_at: persist::now_rfc3339(),
        encoder: kind,
        grid: GridParams {
            rows: shape.rows,
            cols: shape.cols,
            dim: grid.codebook().dim,
            epochs,
            topology: "toroid".into(),
            cooling: "exponential".into(),
        },
        num_docs,
    };
    persist::save_manifest(paths, &manifest)?;
    tracing::info!(rows = shape.rows, cols = shape.cols, "document grid imported");
    Ok(())
}

#[derive(Default)]
struct Tally {
    registered: usize,
    existing: usize,
    skipped: usize,
}

fn populate(config: &Config, paths: &ModelPaths, input: &Path) -> Result<()> {
    let docs = read_corpus(config, input)?;
    let registry = Arc::new(ModelRegistry::load(paths)?);
    fs::create_dir_all(&config.store_dir)?;
    let store = SledPostingStore::open(&config.store_dir)?;
    let resolver = SimilarityResolver::new(registry, store, ResolverOptions::from(config));

    let pool = worker_pool(config)?;
    let updates: Vec<Update> = pool.install(|| {
        docs.par_iter().map(|doc| resolver.update(doc)).collect::<bookgrid_core::Result<_>>()
    })?;
    resolver.store().flush()?;

    let tally = updates.iter().fold(Tally::default(), |mut t, u| {
        match u {
            Update::Registered(_) => t.registered += 1,
            Update::Existing(_) => t.existing += 1,
            Update::Skipped(_) => t.skipped += 1,
        }
        t
    });
    tracing::info!(
        registered = tally.registered,
        existing = tally.existing,
        skipped = tally.skipped,
        cells = resolver.store().len_cells()?,
        store = %config.store_dir.display(),
        "posting store populated"
    );
    Ok(())
}
