use std::time::Duration;

use clap::Args;
use tracing::warn;

use crate::llm::LLMConfig;
use crate::rag::DEFAULT_MAX_CONTEXT_LENGTH;

pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEPRECATED_LLM_MODELS: &[&str] = &["gpt-4-turbo", "gpt-3.5-turbo"];

/// Runtime configuration shared by the ingestion and query paths.
#[derive(Debug, Clone)]
pub struct Config {
    pub news_api_key: String,
    pub openai_api_key: String,

    pub news_api_base_url: String,
    pub news_polling_interval: Duration,
    pub news_batch_size: usize,
    pub news_language: String,
    pub news_sort_by: String,
    pub news_queries: Vec<String>,
    pub article_retention_days: i64,

    pub openai_base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,

    pub top_k: usize,
    /// Carried for callers that want to filter hits; the index never applies it.
    pub similarity_threshold: f32,
    pub max_context_length: usize,

    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: usize,

    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            news_api_key: String::new(),
            openai_api_key: String::new(),
            news_api_base_url: "https://newsapi.org/v2".to_string(),
            news_polling_interval: Duration::from_secs(60),
            news_batch_size: 20,
            news_language: "en".to_string(),
            news_sort_by: "publishedAt".to_string(),
            news_queries: ["technology", "business", "health", "science", "entertainment"]
                .iter()
                .map(|q| q.to_string())
                .collect(),
            article_retention_days: 7,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            top_k: 5,
            similarity_threshold: 0.7,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_temperature: 0.7,
            llm_max_tokens: 1024,
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn llm(&self) -> LLMConfig {
        LLMConfig {
            model: self.llm_model.clone(),
            max_tokens: self.llm_max_tokens,
            temperature: self.llm_temperature,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Logs a warning for every missing credential. Never fails.
    pub fn warn_missing_keys(&self) {
        if self.news_api_key.is_empty() {
            warn!("NEWS_API_KEY not set. News ingestion will fail.");
        }
        if self.openai_api_key.is_empty() {
            warn!("OPENAI_API_KEY not set. Embeddings and LLM will fail.");
        }
    }
}

/// Maps retired chat model names onto a supported one.
pub fn normalize_llm_model(model: &str) -> String {
    let normalized = model.trim();
    if normalized.is_empty() {
        return DEFAULT_LLM_MODEL.to_string();
    }
    if DEPRECATED_LLM_MODELS.contains(&normalized) {
        warn!(
            "LLM_MODEL '{}' is deprecated; using '{}' instead.",
            normalized, DEFAULT_LLM_MODEL
        );
        return DEFAULT_LLM_MODEL.to_string();
    }
    normalized.to_string()
}

/// Command-line flags, each falling back to an environment variable.
/// Global, so they are accepted after any subcommand.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// NewsAPI key used by the ingestion poller.
    #[arg(long, global = true, env = "NEWS_API_KEY", default_value = "", hide_env_values = true)]
    pub news_api_key: String,

    /// OpenAI key used for embeddings and chat completions.
    #[arg(long, global = true, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, global = true, env = "NEWS_API_BASE_URL", default_value = "https://newsapi.org/v2")]
    pub news_api_base_url: String,

    /// Seconds between NewsAPI polls.
    #[arg(long, global = true, env = "NEWS_POLLING_INTERVAL", default_value_t = 60)]
    pub news_polling_interval: u64,

    /// Articles requested per poll.
    #[arg(long, global = true, env = "NEWS_BATCH_SIZE", default_value_t = 20)]
    pub news_batch_size: usize,

    #[arg(long, global = true, env = "NEWS_LANGUAGE", default_value = "en")]
    pub news_language: String,

    /// publishedAt, popularity or relevancy.
    #[arg(long, global = true, env = "NEWS_SORT_BY", default_value = "publishedAt")]
    pub news_sort_by: String,

    /// Search queries rotated round-robin across polls.
    #[arg(
        long,
        global = true,
        env = "NEWS_QUERIES",
        value_delimiter = ',',
        default_value = "technology,business,health,science,entertainment"
    )]
    pub news_queries: Vec<String>,

    /// How far back each NewsAPI query looks, in days.
    #[arg(long, global = true, env = "ARTICLE_RETENTION_DAYS", default_value_t = 7)]
    pub article_retention_days: i64,

    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(long, global = true, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    #[arg(long, global = true, env = "EMBEDDING_DIMENSION", default_value_t = 1536)]
    pub embedding_dimension: usize,

    #[arg(long, global = true, env = "TOP_K_RESULTS", default_value_t = 5)]
    pub top_k: usize,

    #[arg(long, global = true, env = "SIMILARITY_THRESHOLD", default_value_t = 0.7)]
    pub similarity_threshold: f32,

    /// Maximum characters of article text placed in the prompt.
    #[arg(long, global = true, env = "MAX_CONTEXT_LENGTH", default_value_t = 3000)]
    pub max_context_length: usize,

    #[arg(long, global = true, env = "LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    pub llm_model: String,

    #[arg(long, global = true, env = "LLM_TEMPERATURE", default_value_t = 0.7)]
    pub llm_temperature: f32,

    #[arg(long, global = true, env = "LLM_MAX_TOKENS", default_value_t = 1024)]
    pub llm_max_tokens: usize,

    #[arg(long, global = true, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, global = true, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Seconds before OpenAI requests time out.
    #[arg(long, global = true, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl From<Settings> for Config {
    fn from(s: Settings) -> Self {
        Config {
            news_api_key: s.news_api_key.trim().to_string(),
            openai_api_key: s.openai_api_key.trim().to_string(),
            news_api_base_url: s.news_api_base_url,
            news_polling_interval: Duration::from_secs(s.news_polling_interval),
            news_batch_size: s.news_batch_size,
            news_language: s.news_language,
            news_sort_by: s.news_sort_by,
            news_queries: s
                .news_queries
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            article_retention_days: s.article_retention_days,
            openai_base_url: s.openai_base_url,
            embedding_model: s.embedding_model,
            embedding_dimension: s.embedding_dimension,
            top_k: s.top_k,
            similarity_threshold: s.similarity_threshold,
            max_context_length: s.max_context_length,
            llm_model: normalize_llm_model(&s.llm_model),
            llm_temperature: s.llm_temperature,
            llm_max_tokens: s.llm_max_tokens,
            host: s.host,
            port: s.port,
            request_timeout: Duration::from_secs(s.request_timeout_secs),
        }
    }
}
