//! Retrieval-augmented answer generation.
//!
//! [`ContextBuilder`] packs ranked documents into a bounded prompt context and
//! [`RagEngine`] turns that context into an answer. A throttled model yields a
//! degraded answer built from article summaries; any other model failure is
//! returned as an [`AnswerError`] that still carries the retrieved sources.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::llm::{CompletionRequest, LLMConfig, LanguageModel, LlmError, SYSTEM_PROMPT, construct_prompt};
use crate::utils::{ellipsize, normalize_whitespace, now_iso8601};
use crate::vector_db::Document;

pub const NO_ARTICLES_MESSAGE: &str = "No relevant articles found to answer your question.";
pub const RATE_LIMITED_NOTE: &str =
    "AI model temporarily unavailable — showing retrieved news context.";
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 3000;

const SUMMARY_MAX_CHARS: usize = 240;

pub struct ContextBuilder {
    max_context_length: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        ContextBuilder::new(DEFAULT_MAX_CONTEXT_LENGTH)
    }
}

impl ContextBuilder {
    pub fn new(max_context_length: usize) -> Self {
        ContextBuilder { max_context_length }
    }

    /// Joins document blocks, most relevant first, until the next block would
    /// push the context past `max_context_length` characters (delimiters included).
    /// Returns the context and the ids of the documents that made it in.
    pub fn build_context(&self, documents: &[Document]) -> (String, Vec<String>) {
        let mut parts = Vec::new();
        let mut sources = Vec::new();
        let mut current_length = 0;
        let delimiter_len = CONTEXT_DELIMITER.chars().count();

        for doc in documents {
            let block = format!(
                "[{} - {}] {}\n{}",
                doc.source,
                doc.published_at,
                doc.title,
                doc.body()
            );
            let separator = if parts.is_empty() { 0 } else { delimiter_len };
            let block_len = block.chars().count() + separator;

            if current_length + block_len > self.max_context_length {
                break;
            }
            current_length += block_len;
            parts.push(block);
            sources.push(doc.id.clone());
        }

        (parts.join(CONTEXT_DELIMITER), sources)
    }
}

/// One `"[source - published_at] title — description"` line per document.
pub fn extract_article_summaries(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(|doc| {
            let title = match doc.title.trim() {
                "" => "(untitled)",
                t => t,
            };
            let source = match doc.source.trim() {
                "" => "Unknown",
                s => s,
            };
            let published_at = doc.published_at.trim();
            let description = doc
                .description
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .or(doc.content.as_deref())
                .unwrap_or_default();
            let description = ellipsize(&normalize_whitespace(description), SUMMARY_MAX_CHARS);

            let prefix = if published_at.is_empty() {
                format!("[{source}] {title}")
            } else {
                format!("[{source} - {published_at}] {title}")
            };
            if description.is_empty() {
                prefix
            } else {
                format!("{prefix} — {description}")
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    RateLimited,
    Error,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::RateLimited => "rate_limited",
            AiStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub article_summaries: Vec<String>,
    pub num_documents: usize,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_status: Option<AiStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The model failed for a reason other than throttling.
#[derive(Debug, Error)]
#[error("Error generating answer: {cause}")]
pub struct AnswerError {
    pub question: String,
    pub sources: Vec<String>,
    pub num_documents: usize,
    pub timestamp: String,
    #[source]
    pub cause: LlmError,
}

pub struct RagEngine {
    builder: ContextBuilder,
    llm: Arc<dyn LanguageModel>,
    config: LLMConfig,
}

impl RagEngine {
    pub fn new(builder: ContextBuilder, llm: Arc<dyn LanguageModel>, config: LLMConfig) -> Self {
        RagEngine {
            builder,
            llm,
            config,
        }
    }

    /// Asks the model to answer from `context`. An empty context short-circuits
    /// to [`NO_ARTICLES_MESSAGE`] without calling the model.
    pub async fn generate_answer(&self, question: &str, context: &str) -> Result<String, LlmError> {
        if context.is_empty() {
            return Ok(NO_ARTICLES_MESSAGE.to_string());
        }

        info!("Generating answer for question: {}", question);
        let user_prompt = construct_prompt(question, context);
        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT,
            user_prompt: &user_prompt,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        match self.llm.complete(&request).await {
            Ok(answer) => {
                info!("Answer generated successfully");
                Ok(answer)
            }
            Err(err) => {
                error!("{} API error: {}", self.llm.model_name(), err);
                Err(err)
            }
        }
    }

    pub async fn answer_question(
        &self,
        question: &str,
        documents: &[Document],
    ) -> Result<RagAnswer, AnswerError> {
        let (context, sources) = self.builder.build_context(documents);
        let num_documents = documents.len();

        match self.generate_answer(question, &context).await {
            Ok(answer) => Ok(RagAnswer {
                question: question.to_string(),
                answer,
                sources,
                article_summaries: Vec::new(),
                num_documents,
                timestamp: now_iso8601(),
                ai_status: None,
                note: None,
            }),
            Err(err) if err.is_rate_limited() => {
                warn!("language model rate limited; returning article summaries");
                Ok(RagAnswer {
                    question: question.to_string(),
                    answer: RATE_LIMITED_NOTE.to_string(),
                    sources,
                    article_summaries: extract_article_summaries(documents),
                    num_documents,
                    timestamp: now_iso8601(),
                    ai_status: Some(AiStatus::RateLimited),
                    note: Some(RATE_LIMITED_NOTE.to_string()),
                })
            }
            Err(cause) => Err(AnswerError {
                question: question.to_string(),
                sources,
                num_documents,
                timestamp: now_iso8601(),
                cause,
            }),
        }
    }
}
