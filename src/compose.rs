//! Context composition for the ask pipeline.
//!
//! A [`Composer`] holds an ordered list of [`ContextProvider`]s and asks
//! every one of them for blocks, always. Configured-path files, session
//! uploads and external lookups all end up in the same prompt; one source
//! having content never hides another.
//!
//! Budgets are applied in two steps:
//!
//! 1. each provider truncates its own blocks to its per-source budget;
//! 2. if the concatenation still exceeds `context.total_budget_chars`, the
//!    largest blocks are shrunk until the total fits.
//!
//! Truncated blocks keep their label and carry a
//! `... [truncated at N chars]` suffix, so the model can tell what is
//! partial.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::crossref::match_text;
use crate::lookup::LookupService;
use crate::models::{ComposedContext, ContextBlock, ContextSource, UploadedFile};
use crate::paths::PathIndex;

/// Inputs for one composition pass.
pub struct ContextRequest<'a> {
    pub question: &'a str,
    pub uploads: &'a [UploadedFile],
    pub use_paths: bool,
}

/// A source of context blocks.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn source(&self) -> ContextSource;

    fn name(&self) -> &str;

    async fn provide(&self, request: &ContextRequest<'_>) -> Result<Vec<ContextBlock>>;
}

/// Cuts `text` to at most `max_chars` characters, on a char boundary.
///
/// Returns the text and whether it was cut.
pub fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        None => (text.to_string(), false),
        Some((byte_idx, _)) => (
            format!("{}\n... [truncated at {} chars]", &text[..byte_idx], max_chars),
            true,
        ),
    }
}

fn truncate_block(block: &mut ContextBlock, max_chars: usize) {
    let (text, cut) = truncate(&block.text, max_chars);
    if cut {
        block.text = text;
        block.truncated = true;
    }
}

/// Files from configured paths that match the question.
///
/// The path budget is shared: each selected file gets an equal slice.
pub struct PathFilesProvider {
    index: Arc<PathIndex>,
    max_files: usize,
    budget: usize,
}

impl PathFilesProvider {
    pub fn new(index: Arc<PathIndex>, config: &ContextConfig) -> Self {
        Self {
            index,
            max_files: config.max_path_files,
            budget: config.path_budget_chars,
        }
    }
}

#[async_trait]
impl ContextProvider for PathFilesProvider {
    fn source(&self) -> ContextSource {
        ContextSource::ConfiguredPath
    }

    fn name(&self) -> &str {
        "path index"
    }

    async fn provide(&self, request: &ContextRequest<'_>) -> Result<Vec<ContextBlock>> {
        if !request.use_paths {
            return Ok(Vec::new());
        }
        let files = self
            .index
            .relevant_files(request.question, self.max_files)
            .await?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let per_file = (self.budget / files.len()).max(1);
        let blocks = files
            .into_iter()
            .map(|f| {
                let label = format!("{}/{}", f.path_name, f.rel_path);
                let mut block = ContextBlock::new(
                    ContextSource::ConfiguredPath,
                    label,
                    f.file.extracted_text.clone(),
                )
                .with_file_text(match_text(&f.file));
                truncate_block(&mut block, per_file);
                block
            })
            .collect();
        Ok(blocks)
    }
}

/// Session uploads; every file gets the full per-upload budget.
pub struct UploadsProvider {
    budget: usize,
}

impl UploadsProvider {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            budget: config.upload_budget_chars,
        }
    }
}

#[async_trait]
impl ContextProvider for UploadsProvider {
    fn source(&self) -> ContextSource {
        ContextSource::Upload
    }

    fn name(&self) -> &str {
        "uploads"
    }

    async fn provide(&self, request: &ContextRequest<'_>) -> Result<Vec<ContextBlock>> {
        let blocks = request
            .uploads
            .iter()
            .map(|f| {
                let mut block = ContextBlock::new(
                    ContextSource::Upload,
                    f.filename.clone(),
                    f.extracted_text.clone(),
                )
                .with_file_text(match_text(f));
                truncate_block(&mut block, self.budget);
                block
            })
            .collect();
        Ok(blocks)
    }
}

/// Store directory, weather and competitor blocks.
pub struct LookupProvider {
    service: Arc<LookupService>,
    budget: usize,
}

impl LookupProvider {
    pub fn new(service: Arc<LookupService>, config: &ContextConfig) -> Self {
        Self {
            service,
            budget: config.lookup_budget_chars,
        }
    }
}

#[async_trait]
impl ContextProvider for LookupProvider {
    fn source(&self) -> ContextSource {
        ContextSource::ExternalApi
    }

    fn name(&self) -> &str {
        "external lookup"
    }

    async fn provide(&self, request: &ContextRequest<'_>) -> Result<Vec<ContextBlock>> {
        let mut blocks = self.service.lookup(request.question).await;
        let mut remaining = self.budget;
        for block in &mut blocks {
            truncate_block(block, remaining.max(1));
            remaining = remaining.saturating_sub(block.text.chars().count());
        }
        Ok(blocks)
    }
}

pub struct Composer {
    providers: Vec<Box<dyn ContextProvider>>,
    total_budget: usize,
}

impl Composer {
    pub fn new(total_budget: usize) -> Self {
        Self {
            providers: Vec::new(),
            total_budget,
        }
    }

    /// Standard provider order: configured paths, uploads, external lookups.
    pub fn standard(
        config: &ContextConfig,
        index: Arc<PathIndex>,
        lookup: Arc<LookupService>,
    ) -> Self {
        Self::new(config.total_budget_chars)
            .with_provider(PathFilesProvider::new(index, config))
            .with_provider(UploadsProvider::new(config))
            .with_provider(LookupProvider::new(lookup, config))
    }

    pub fn with_provider(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub async fn compose(&self, request: &ContextRequest<'_>) -> ComposedContext {
        let mut blocks = Vec::new();
        for provider in &self.providers {
            match provider.provide(request).await {
                Ok(mut provided) => {
                    debug!(provider = provider.name(), blocks = provided.len(), "context provided");
                    blocks.append(&mut provided);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "context provider failed");
                    blocks.push(ContextBlock::new(
                        provider.source(),
                        provider.name(),
                        format!("[{} unavailable: {}]", provider.name(), e),
                    ));
                }
            }
        }

        fit_total(&mut blocks, self.total_budget);
        let text = blocks.iter().map(ContextBlock::render).collect::<Vec<_>>().join("\n");
        ComposedContext { blocks, text }
    }
}

/// Shrinks the largest blocks until the combined text fits `total`.
///
/// Finds the largest per-block cap `c` such that `sum(min(len, c)) <= total`,
/// then truncates every block longer than `c`. Small blocks are untouched.
fn fit_total(blocks: &mut [ContextBlock], total: usize) {
    let lens: Vec<usize> = blocks.iter().map(|b| b.text.chars().count()).collect();
    if lens.iter().sum::<usize>() <= total {
        return;
    }

    let mut sorted = lens.clone();
    sorted.sort_unstable();
    let mut remaining = total;
    let mut cap = 0;
    for (i, len) in sorted.iter().enumerate() {
        let left = sorted.len() - i;
        let share = remaining / left;
        if *len > share {
            cap = share;
            break;
        }
        remaining -= len;
    }

    for (block, len) in blocks.iter_mut().zip(lens) {
        if len > cap {
            truncate_block(block, cap.max(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LookupConfig};
    use crate::extract::extract_upload;
    use tempfile::TempDir;

    async fn index_with(tmp: &TempDir, dir: &std::path::Path) -> Arc<PathIndex> {
        let mut cfg = Config::minimal();
        cfg.db.path = tmp.path().join("paths.sqlite");
        let index = PathIndex::open(&cfg).await.unwrap();
        index
            .add("reports", dir.to_str().unwrap(), None)
            .await
            .unwrap();
        Arc::new(index)
    }

    fn lookup() -> Arc<LookupService> {
        Arc::new(LookupService::new(&LookupConfig::default()).unwrap())
    }

    struct FailingProvider;

    #[async_trait]
    impl ContextProvider for FailingProvider {
        fn source(&self) -> ContextSource {
            ContextSource::ConfiguredPath
        }
        fn name(&self) -> &str {
            "path index"
        }
        async fn provide(&self, _: &ContextRequest<'_>) -> Result<Vec<ContextBlock>> {
            anyhow::bail!("database locked")
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let (text, cut) = truncate("₹₹₹₹₹", 3);
        assert!(cut);
        assert!(text.starts_with("₹₹₹\n"));
        assert!(text.ends_with("[truncated at 3 chars]"));

        let (text, cut) = truncate("short", 10);
        assert!(!cut);
        assert_eq!(text, "short");
    }

    #[tokio::test]
    async fn uploads_kept_alongside_path_files() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("inventory.csv"), "store_id,stock\nVM_DL_001,40\n").unwrap();
        let index = index_with(&tmp, &data).await;
        let composer = Composer::standard(&ContextConfig::default(), index, lookup());

        let uploads = vec![extract_upload(
            "sales.csv",
            b"store_id,revenue\nVM_DL_001,125000\n".to_vec(),
            None,
        )];
        let request = ContextRequest {
            question: "compare inventory with sales",
            uploads: &uploads,
            use_paths: true,
        };
        let ctx = composer.compose(&request).await;

        let labels = ctx.labels();
        assert!(labels.contains(&(ContextSource::ConfiguredPath, "reports/inventory.csv".to_string())));
        assert!(labels.contains(&(ContextSource::Upload, "sales.csv".to_string())));
        assert!(ctx.text.contains("### [CONFIGURED PATH] reports/inventory.csv"));
        assert!(ctx.text.contains("### [UPLOADED FILE] sales.csv"));
    }

    #[tokio::test]
    async fn use_paths_false_skips_path_files() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("inventory.csv"), "a\n1\n").unwrap();
        let index = index_with(&tmp, &data).await;
        let composer = Composer::standard(&ContextConfig::default(), index, lookup());

        let request = ContextRequest {
            question: "inventory",
            uploads: &[],
            use_paths: false,
        };
        assert!(composer.compose(&request).await.blocks.is_empty());
    }

    #[tokio::test]
    async fn provider_errors_become_placeholders() {
        let composer = Composer::new(1_000)
            .with_provider(FailingProvider)
            .with_provider(UploadsProvider::new(&ContextConfig::default()));
        let uploads = vec![extract_upload("notes.txt", b"hello".to_vec(), None)];
        let request = ContextRequest {
            question: "anything",
            uploads: &uploads,
            use_paths: true,
        };
        let ctx = composer.compose(&request).await;
        assert_eq!(ctx.blocks.len(), 2);
        assert_eq!(ctx.blocks[0].text, "[path index unavailable: database locked]");
        assert_eq!(ctx.blocks[1].label, "notes.txt");
    }

    #[tokio::test]
    async fn upload_budget_truncates_with_marker() {
        let config = ContextConfig {
            upload_budget_chars: 10,
            ..ContextConfig::default()
        };
        let composer = Composer::new(1_000).with_provider(UploadsProvider::new(&config));
        let uploads = vec![extract_upload("big.txt", "x".repeat(50).into_bytes(), None)];
        let request = ContextRequest {
            question: "q",
            uploads: &uploads,
            use_paths: false,
        };
        let ctx = composer.compose(&request).await;
        assert!(ctx.blocks[0].truncated);
        assert!(ctx.blocks[0].text.ends_with("... [truncated at 10 chars]"));
        assert_eq!(ctx.blocks[0].file_text.as_deref(), Some("x".repeat(50).as_str()));
    }

    #[test]
    fn total_budget_shrinks_largest_blocks_only() {
        let mut blocks = vec![
            ContextBlock::new(ContextSource::Upload, "small", "a".repeat(10)),
            ContextBlock::new(ContextSource::Upload, "large", "b".repeat(200)),
            ContextBlock::new(ContextSource::Upload, "medium", "c".repeat(60)),
        ];
        fit_total(&mut blocks, 100);

        assert!(!blocks[0].truncated);
        assert_eq!(blocks[0].text.len(), 10);
        assert!(blocks[1].truncated);
        assert!(blocks[2].truncated);
        assert!(blocks[1].text.contains("[truncated at 45 chars]"));
    }
}
