use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::{ChunkOptions, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::gate::MAX_CAPACITY;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            table: default_table(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".codeindex/index.sqlite")
}
fn default_table() -> String {
    "code_chunks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            cache_dir: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_allowed_file_names")]
    pub allowed_file_names: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            ignored_dirs: default_ignored_dirs(),
            allowed_extensions: default_allowed_extensions(),
            allowed_file_names: default_allowed_file_names(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

impl IndexingConfig {
    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_ignored_dirs() -> Vec<String> {
    strings(&[
        "node_modules",
        ".git",
        ".angular",
        ".cache",
        ".idea",
        ".nx",
        ".vscode",
        "dist",
        "out",
        ".lancedb",
        "target",
        ".codeindex",
    ])
}

fn default_allowed_extensions() -> Vec<String> {
    strings(&[
        // JavaScript / TypeScript
        "ts", "js", "tsx", "jsx", "mjs", "cjs",
        // Web
        "html", "htm", "css", "scss", "sass", "less", "svg",
        // Config
        "json", "yaml", "yml", "xml", "env", "toml",
        // Docs
        "md", "mdx",
        // Templates
        "ejs", "hbs", "pug", "vue", "svelte",
        // GraphQL
        "graphql", "gql",
        "wasm",
        // Other languages
        "rs", "py", "go",
    ])
}

fn default_allowed_file_names() -> Vec<String> {
    strings(&[
        "package.json",
        "tsconfig.json",
        "webpack.config.js",
        "rollup.config.js",
        "vite.config.js",
        "Cargo.toml",
    ])
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Worker executable. Defaults to the running `cidx` binary.
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            status_timeout_secs: default_status_timeout_secs(),
            init_timeout_secs: default_init_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

fn default_status_timeout_secs() -> u64 {
    5
}
fn default_init_timeout_secs() -> u64 {
    300
}

/// Load and validate the config file at `path`.
///
/// A missing file is not an error: every setting has a default.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    if config.indexing.max_concurrent == 0 {
        bail!("indexing.max_concurrent must be >= 1");
    }
    if config.indexing.max_concurrent > MAX_CAPACITY {
        bail!("indexing.max_concurrent must be <= {}", MAX_CAPACITY);
    }

    config
        .indexing
        .chunk_options()
        .validate()
        .context("invalid [indexing] chunk settings")?;

    if !is_sql_identifier(&config.store.table) {
        bail!(
            "store.table must be a plain SQL identifier, got '{}'",
            config.store.table
        );
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }

    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && (config.embedding.model.is_none() || config.embedding.dims.is_none())
    {
        bail!(
            "embedding.model and embedding.dims must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    Ok(())
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.indexing.max_concurrent, 3);
        assert_eq!(config.indexing.chunk_size, 1000);
        assert_eq!(config.indexing.chunk_overlap, 100);
        assert_eq!(config.store.table, "code_chunks");
        assert!(config.indexing.ignored_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config.embedding.provider, "local");
    }

    #[test]
    fn overrides_are_read() {
        let config = parse_config(
            r#"
[store]
path = "/tmp/x.sqlite"
table = "chunks_v2"

[embedding]
provider = "disabled"

[indexing]
max_concurrent = 8
chunk_size = 200
chunk_overlap = 20
allowed_extensions = ["rs"]
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.store.table, "chunks_v2");
        assert_eq!(config.indexing.max_concurrent, 8);
        assert_eq!(config.indexing.allowed_extensions, vec!["rs".to_string()]);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = parse_config("[indexing]\nmax_concurrent = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_concurrency_beyond_gate_capacity() {
        let mut config = Config::default();
        config.indexing.max_concurrent = MAX_CAPACITY;
        assert!(validate(&config).is_ok());
        config.indexing.max_concurrent = MAX_CAPACITY + 1;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let config = parse_config("[indexing]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unsafe_table_name() {
        let config = parse_config("[store]\ntable = \"x; DROP TABLE y\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn remote_providers_need_model_and_dims() {
        let config = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&config).is_err());

        let config = parse_config(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
        )
        .unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_unknown_provider() {
        let config = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(validate(&config).is_err());
    }
}
