use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding `manifest.json` and the artifact files.
    pub model_dir: PathBuf,
    /// sled database with the posting lists.
    pub store_dir: PathBuf,
    /// Minimum number of similar documents a query should return.
    #[serde(default = "default_min_count")]
    pub min_count: usize,
    /// Shorter normalized texts are not indexed.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Encoding threads for bulk jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound for the expanding search, below the grid size if set.
    #[serde(default)]
    pub max_top_n: Option<usize>,
}

fn default_min_count() -> usize { 10 }
fn default_min_text_chars() -> usize { 400 }
fn default_workers() -> usize { 4 }

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            store_dir: PathBuf::from("./postings"),
            min_count: default_min_count(),
            min_text_chars: default_min_text_chars(),
            workers: default_workers(),
            max_top_n: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let model_dir = std::env::var("BOOKGRID_MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir);
        let store_dir = std::env::var("BOOKGRID_STORE_DIR").map(PathBuf::from).unwrap_or(defaults.store_dir);
        let min_count = env_parse("BOOKGRID_MIN_COUNT").unwrap_or(defaults.min_count);
        let min_text_chars = env_parse("BOOKGRID_MIN_TEXT_CHARS").unwrap_or(defaults.min_text_chars);
        let workers = env_parse("BOOKGRID_WORKERS").unwrap_or(defaults.workers).max(1);
        let max_top_n = env_parse("BOOKGRID_MAX_TOP_N");
        Self { model_dir, store_dir, min_count, min_text_chars, workers, max_top_n }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
