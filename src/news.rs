//! NewsAPI polling connector.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::{error, info};

use crate::config::Config;
use crate::utils::{clean_text, now_iso8601};
use crate::vector_db::Document;

/// Article as returned by NewsAPI's `/everything` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub source: Option<RawSource>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSource {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

/// Anything that yields batches of freshly seen documents.
#[async_trait]
pub trait ArticleSource: Send {
    async fn poll(&mut self) -> Vec<Document>;
}

pub struct NewsApiConnector {
    client: Client,
    base_url: String,
    api_key: String,
    batch_size: usize,
    language: String,
    sort_by: String,
    retention_days: i64,
    queries: Vec<String>,
    query_index: usize,
    seen_urls: FxHashSet<String>,
}

impl NewsApiConnector {
    pub fn new(config: &Config) -> Result<Self> {
        anyhow::ensure!(
            !config.news_api_key.is_empty(),
            "NEWS_API_KEY not set in environment or config"
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build NewsAPI HTTP client")?;
        let queries = if config.news_queries.is_empty() {
            vec!["technology".to_string()]
        } else {
            config.news_queries.clone()
        };

        Ok(NewsApiConnector {
            client,
            base_url: config.news_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.news_api_key.clone(),
            batch_size: config.news_batch_size,
            language: config.news_language.clone(),
            sort_by: config.news_sort_by.clone(),
            retention_days: config.article_retention_days,
            queries,
            query_index: 0,
            seen_urls: FxHashSet::default(),
        })
    }

    /// Fetches one page for `query`. Failures are logged and yield an empty batch.
    pub async fn fetch_articles(&self, query: &str) -> Vec<RawArticle> {
        match self.try_fetch(query).await {
            Ok(articles) => {
                info!("Fetched {} articles", articles.len());
                articles
            }
            Err(err) => {
                error!("Failed to fetch articles: {:#}", err);
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self, query: &str) -> Result<Vec<RawArticle>> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(self.retention_days);
        let page_size = self.batch_size.to_string();
        let from = from.to_rfc3339();
        let to = to.to_rfc3339();

        info!("Fetching articles with query: {}", query);
        let resp = self
            .client
            .get(format!("{}/everything", self.base_url))
            .query(&[
                ("q", query),
                ("sortBy", self.sort_by.as_str()),
                ("language", self.language.as_str()),
                ("pageSize", page_size.as_str()),
                ("apiKey", self.api_key.as_str()),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ])
            .send()
            .await
            .context("NewsAPI request failed")?
            .error_for_status()
            .context("NewsAPI returned an error status")?;

        let data: NewsApiResponse = resp.json().await.context("failed to parse NewsAPI response")?;
        anyhow::ensure!(
            data.status == "ok",
            "NewsAPI error: {}",
            data.message.unwrap_or_default()
        );
        Ok(data.articles)
    }

    /// Converts a raw article into a [`Document`], skipping URLs already seen
    /// and articles without a title.
    pub fn parse_article(&mut self, raw: RawArticle) -> Option<Document> {
        let (url, fields) = raw.into_fields();
        if !self.seen_urls.insert(url.clone()) {
            return None;
        }
        document_from_raw(url, fields)
    }

    fn next_query(&mut self) -> String {
        let query = self.queries[self.query_index % self.queries.len()].clone();
        self.query_index += 1;
        query
    }
}

#[async_trait]
impl ArticleSource for NewsApiConnector {
    async fn poll(&mut self) -> Vec<Document> {
        let query = self.next_query();
        let batch = self.fetch_articles(&query).await;
        let documents: Vec<Document> = batch
            .into_iter()
            .filter_map(|raw| self.parse_article(raw))
            .collect();
        if !documents.is_empty() {
            info!("Streamed {} new articles", documents.len());
        }
        documents
    }
}

struct Fields {
    source: String,
    title: String,
    description: Option<String>,
    content: Option<String>,
    author: Option<String>,
    published_at: String,
}

fn document_from_raw(url: String, fields: Fields) -> Option<Document> {
    if fields.title.is_empty() {
        return None;
    }
    let id = if url.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        url.clone()
    };
    let content_text = Document::content_text_for(
        &fields.title,
        fields.description.as_deref(),
        fields.content.as_deref(),
    );
    Some(Document {
        id,
        source: fields.source,
        author: fields.author,
        title: fields.title,
        description: fields.description,
        content: fields.content,
        url,
        published_at: fields.published_at,
        fetched_at: now_iso8601(),
        content_text,
    })
}

impl RawArticle {
    /// Converts without URL de-duplication, for locally seeded batches.
    pub fn into_document(self) -> Option<Document> {
        let (url, fields) = self.into_fields();
        document_from_raw(url, fields)
    }

    fn into_fields(self) -> (String, Fields) {
        let clean = |s: Option<String>| s.map(|s| clean_text(&s)).filter(|s| !s.is_empty());
        let fields = Fields {
            source: clean(self.source.and_then(|s| s.name)).unwrap_or_else(|| "Unknown".to_string()),
            title: clean(self.title).unwrap_or_default(),
            description: clean(self.description),
            content: clean(self.content),
            author: clean(self.author),
            published_at: self.published_at.unwrap_or_default(),
        };
        (self.url.unwrap_or_default(), fields)
    }
}
