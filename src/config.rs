use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8340".to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Character budgets for the composed prompt context.
#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_upload_budget")]
    pub upload_budget_chars: usize,
    #[serde(default = "default_path_budget")]
    pub path_budget_chars: usize,
    #[serde(default = "default_lookup_budget")]
    pub lookup_budget_chars: usize,
    #[serde(default = "default_total_budget")]
    pub total_budget_chars: usize,
    #[serde(default = "default_max_path_files")]
    pub max_path_files: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            upload_budget_chars: default_upload_budget(),
            path_budget_chars: default_path_budget(),
            lookup_budget_chars: default_lookup_budget(),
            total_budget_chars: default_total_budget(),
            max_path_files: default_max_path_files(),
        }
    }
}

fn default_upload_budget() -> usize {
    10_000
}
fn default_path_budget() -> usize {
    25_000
}
fn default_lookup_budget() -> usize {
    4_000
}
fn default_total_budget() -> usize {
    60_000
}
fn default_max_path_files() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: Some("gemini-1.5-flash".to_string()),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            min_delay_ms: default_min_delay_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_min_delay_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2_000
}
fn default_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_true")]
    pub search_content: bool,
    #[serde(default = "default_max_search_bytes")]
    pub max_search_bytes: u64,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            follow_symlinks: false,
            search_content: true,
            max_search_bytes: default_max_search_bytes(),
            max_search_results: default_max_search_results(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_depth() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_max_search_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_max_search_results() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    #[serde(default)]
    pub weather_url: Option<String>,
    #[serde(default = "default_lookup_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub stores: Vec<StoreRecord>,
    #[serde(default)]
    pub competitors: Vec<CompetitorRecord>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            weather_url: None,
            timeout_secs: default_lookup_timeout_secs(),
            stores: Vec::new(),
            competitors: Vec::new(),
        }
    }
}

fn default_lookup_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreRecord {
    pub id: String,
    pub name: String,
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub manager: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompetitorRecord {
    pub name: String,
    pub city: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl Config {
    /// Configuration used when no file is available (tests, one-off CLI commands).
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/storelens.sqlite"),
            },
            server: ServerConfig::default(),
            context: ContextConfig::default(),
            llm: LlmConfig::default(),
            index: IndexConfig::default(),
            lookup: LookupConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let ctx = &config.context;
    for (name, value) in [
        ("context.upload_budget_chars", ctx.upload_budget_chars),
        ("context.path_budget_chars", ctx.path_budget_chars),
        ("context.lookup_budget_chars", ctx.lookup_budget_chars),
        ("context.total_budget_chars", ctx.total_budget_chars),
    ] {
        if value == 0 {
            anyhow::bail!("{} must be > 0", name);
        }
    }

    let largest = ctx
        .upload_budget_chars
        .max(ctx.path_budget_chars)
        .max(ctx.lookup_budget_chars);
    if ctx.total_budget_chars < largest {
        anyhow::bail!(
            "context.total_budget_chars ({}) must be >= every per-source budget ({})",
            ctx.total_budget_chars,
            largest
        );
    }

    if config.llm.max_retries > 10 {
        anyhow::bail!("llm.max_retries must be <= 10");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "gemini" => {
            if config.llm.model.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("llm.model must be specified when provider is 'gemini'");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    if config.index.max_depth == 0 {
        anyhow::bail!("index.max_depth must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(cfg.context.upload_budget_chars, 10_000);
        assert_eq!(cfg.llm.max_retries, 3);
        assert_eq!(cfg.llm.backoff_base_ms, 2_000);
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.server.bind, "127.0.0.1:8340");
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[llm]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn total_budget_must_cover_sources() {
        let err = parse(
            "[db]\npath = \"x\"\n[context]\npath_budget_chars = 30000\ntotal_budget_chars = 20000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("total_budget_chars"));
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse(include_str!("../config/storelens.example.toml")).unwrap();
        assert_eq!(cfg.llm.provider, "gemini");
        assert_eq!(cfg.lookup.stores.len(), 2);
        assert_eq!(cfg.lookup.competitors[0].city, "Delhi");
        assert_eq!(cfg.index.exclude_globs.len(), 2);
    }

    #[test]
    fn stores_parse() {
        let cfg = parse(
            r#"
[db]
path = "x"

[[lookup.stores]]
id = "VM_DL_001"
name = "Connaught Place"
city = "Delhi"
"#,
        )
        .unwrap();
        assert_eq!(cfg.lookup.stores.len(), 1);
        assert_eq!(cfg.lookup.stores[0].city, "Delhi");
    }
}
