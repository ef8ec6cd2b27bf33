use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SYSTEM_PROMPT: &str = "You are a helpful news assistant. Answer user questions based on the provided news articles.
Always cite the sources and dates of the articles you reference.
If you cannot answer based on the provided articles, say so clearly.
Keep your answer concise but informative.";

pub struct LLMConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// Failures reported by a language-model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI API key is not configured. Set OPENAI_API_KEY to enable answer generation.")]
    NotConfigured,

    #[error("Error code: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// True when the provider is throttling or the account is out of quota.
    ///
    /// Matches on message text as well as status, since error shapes differ
    /// between provider versions and proxies.
    pub fn is_rate_limited(&self) -> bool {
        if let LlmError::Status { status: 429, .. } = self {
            return true;
        }
        let message = self.to_string().to_lowercase();
        [
            "error code: 429",
            "http/1.1 429",
            "insufficient_quota",
            "exceeded your current quota",
        ]
        .iter()
        .any(|needle| message.contains(needle))
    }
}

pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError>;
}

pub fn construct_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following news articles, please answer the question.

News Articles:
{context}

Question: {question}

Please provide a well-reasoned answer citing specific articles when relevant."
    )
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChat {
    pub fn new(api_key: Option<String>, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(OpenAiChat {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| LlmError::Transport(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: request.user_prompt,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(answer.trim().to_string())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
