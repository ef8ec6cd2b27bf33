use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::embeddings::CachedEmbedder;
use crate::vector_db::{Document, SearchHit, VectorIndex};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub embedding_dimension: usize,
    pub embedding_model: String,
}

/// Owns the index and the embedder; the one place both paths go through.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<CachedEmbedder>,
    embedding_model: String,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<CachedEmbedder>, embedding_model: &str) -> Self {
        Retriever {
            index,
            embedder,
            embedding_model: embedding_model.to_string(),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Embeds `content_text` and stores the document under its id.
    pub async fn add_to_knowledge_base(&self, document: Document) {
        let embedding = self.embedder.get_embedding(&document.content_text).await;
        let id = document.id.clone();
        self.index.add(id.clone(), embedding, document);
        info!("Added article {} with embedding to vector index", id);
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let embedding = self.embedder.get_embedding(query).await;
        self.index.search(&embedding, top_k)
    }

    /// Most similar documents for `query`, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<Document> {
        let hits = self.search(query, top_k).await;
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        let documents = self.index.get_documents(&ids);
        info!("Vector index search returned {} documents", documents.len());
        documents
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_documents: self.index.size(),
            embedding_dimension: self.index.dimension(),
            embedding_model: self.embedding_model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::tests::StubEmbedder;
    use crate::rag::tests::article;

    fn retriever(dim: usize) -> Retriever {
        let embedder = CachedEmbedder::new(Some(Box::new(StubEmbedder::new(dim))), dim);
        Retriever::new(
            Arc::new(VectorIndex::new(dim)),
            Arc::new(embedder),
            "stub-embedding",
        )
    }

    #[tokio::test]
    async fn test_add_and_retrieve() {
        let retriever = retriever(64);
        let mut rust = article("u1", "Rust release", None);
        rust.content_text = "rust compiler release notes".to_string();
        let mut weather = article("u2", "Weather", None);
        weather.content_text = "storm warning coast".to_string();

        retriever.add_to_knowledge_base(rust).await;
        retriever.add_to_knowledge_base(weather).await;

        let docs = retriever.retrieve("rust compiler release notes", 1).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "u1");
    }

    #[tokio::test]
    async fn test_retrieve_on_empty_index() {
        let retriever = retriever(8);
        assert!(retriever.retrieve("anything", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let retriever = retriever(8);
        retriever.add_to_knowledge_base(article("u1", "One", None)).await;

        let stats = retriever.stats();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.embedding_dimension, 8);
        assert_eq!(stats.embedding_model, "stub-embedding");
    }
}
