//! The ask pipeline: compose context, cross-reference the files involved,
//! call the model and structure its answer.
//!
//! A model failure is not an error here. It produces an [`AskResponse`] with
//! status [`AskStatus::Unavailable`] and a readable message, so callers can
//! always render something.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::compose::{Composer, ContextRequest};
use crate::crossref::{find_cross_references, render_report};
use crate::format::format_answer;
use crate::llm::LlmClient;
use crate::models::{
    ComposedContext, ContextSource, CrossReference, FormattedAnswer, UploadedFile,
};

const INSTRUCTIONS: &str = "You are a retail operations analyst. Answer the question using only \
the context below. Each context block is tagged with its source. Quote figures in Indian rupees \
using lakh (L) and crore (Cr) where appropriate. List findings as bullet points and finish with \
concrete recommendations. If the context is insufficient, say so.";

#[derive(Debug, Error)]
pub enum AskError {
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("question timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub uploads: Vec<UploadedFile>,
    pub use_paths: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AskStatus {
    Ok,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source: ContextSource,
    pub label: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub status: AskStatus,
    pub raw: String,
    pub formatted: FormattedAnswer,
    pub sources: Vec<SourceSummary>,
    pub cross_references: Vec<CrossReference>,
    pub model: String,
}

pub struct Assistant {
    composer: Composer,
    llm: LlmClient,
}

impl Assistant {
    pub fn new(composer: Composer, llm: LlmClient) -> Self {
        Self { composer, llm }
    }

    /// [`ask`](Self::ask) bounded by a request-level deadline.
    pub async fn ask_within(
        &self,
        request: &AskRequest,
        limit: Duration,
    ) -> Result<AskResponse, AskError> {
        tokio::time::timeout(limit, self.ask(request))
            .await
            .map_err(|_| AskError::TimedOut(limit))?
    }

    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse, AskError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AskError::EmptyQuestion);
        }

        let context = self
            .composer
            .compose(&ContextRequest {
                question,
                uploads: &request.uploads,
                use_paths: request.use_paths,
            })
            .await;
        let cross_references = cross_reference(&context);
        let prompt = build_prompt(question, &context, &cross_references);

        let sources = context
            .blocks
            .iter()
            .map(|b| SourceSummary {
                source: b.source,
                label: b.label.clone(),
                truncated: b.truncated,
            })
            .collect();
        info!(
            blocks = context.blocks.len(),
            context_chars = context.text.chars().count(),
            cross_references = cross_references.len(),
            "asking language model"
        );

        let (status, raw, formatted) = match self.llm.generate(&prompt).await {
            Ok(raw) => {
                let formatted = format_answer(&raw, &context.blocks);
                (AskStatus::Ok, raw, formatted)
            }
            Err(e) => {
                warn!(error = %e, "language model call failed");
                (AskStatus::Unavailable, e.to_string(), FormattedAnswer::default())
            }
        };

        Ok(AskResponse {
            status,
            raw,
            formatted,
            sources,
            cross_references,
            model: self.llm.model_name().to_string(),
        })
    }
}

/// Cross-references the whole-file blocks when at least two contributed.
fn cross_reference(context: &ComposedContext) -> Vec<CrossReference> {
    let files: Vec<(&str, &str)> = context
        .blocks
        .iter()
        .filter_map(|b| b.file_text.as_deref().map(|t| (b.label.as_str(), t)))
        .collect();
    if files.len() < 2 {
        return Vec::new();
    }
    find_cross_references(&files)
}

pub fn build_prompt(question: &str, context: &ComposedContext, refs: &[CrossReference]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\n## CONTEXT\n\n");
    if context.blocks.is_empty() {
        prompt.push_str("(no context available)\n");
    } else {
        prompt.push_str(&context.text);
    }
    if !refs.is_empty() {
        prompt.push_str("\n## CROSS-REFERENCES\n\n");
        prompt.push_str(&render_report(refs));
    }
    prompt.push_str("\n## QUESTION\n\n");
    prompt.push_str(question);
    prompt.push('\n');
    prompt
}
