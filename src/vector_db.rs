use std::cmp::Ordering;

use ndarray::{Array1, ArrayView1, s};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::truncate_chars;

/// Character budget for the text that gets embedded.
pub const CONTENT_TEXT_MAX_CHARS: usize = 1000;

const EPSILON: f32 = 1e-10;

/// A news article as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub author: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: String,
    pub published_at: String,
    pub fetched_at: String,
    pub content_text: String,
}

impl Document {
    /// Derives `content_text` as `"{title}. {description} {content}"` with
    /// newlines flattened, capped at [`CONTENT_TEXT_MAX_CHARS`].
    pub fn content_text_for(title: &str, description: Option<&str>, content: Option<&str>) -> String {
        let joined = format!(
            "{}. {} {}",
            title,
            description.unwrap_or_default(),
            content.unwrap_or_default()
        )
        .replace('\n', " ");
        truncate_chars(&joined, CONTENT_TEXT_MAX_CHARS).to_string()
    }

    /// Body used when rendering the document into a prompt.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.description.as_deref().filter(|d| !d.is_empty()))
            .unwrap_or_default()
    }
}

/// A `(document id, cosine similarity)` pair returned by [`VectorIndex::search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

struct Entry {
    embedding: Array1<f32>,
    norm: f32,
}

#[derive(Default)]
struct IndexState {
    vectors: FxHashMap<String, Entry>,
    documents: FxHashMap<String, Document>,
    ids: Vec<String>,
}

/// In-memory exhaustive k-NN index over article embeddings.
///
/// All three co-indexed structures live behind one lock, so a reader never
/// sees a vector without its document or an id missing from the order list.
pub struct VectorIndex {
    dimension: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        VectorIndex {
            dimension,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Inserts or overwrites a document. New ids are appended to the insertion order;
    /// overwrites keep their original position.
    pub fn add(&self, id: impl Into<String>, embedding: Vec<f32>, document: Document) {
        let id = id.into();
        if embedding.len() != self.dimension {
            warn!(
                "embedding for {} has dimension {}, index expects {}",
                id,
                embedding.len(),
                self.dimension
            );
        }

        let embedding = Array1::from(embedding);
        let norm = embedding.dot(&embedding).sqrt();

        let mut state = self.state.write();
        if !state.vectors.contains_key(&id) {
            state.ids.push(id.clone());
        }
        state.vectors.insert(id.clone(), Entry { embedding, norm });
        state.documents.insert(id.clone(), document);
        debug!("Added document {} to vector index", id);
    }

    /// Ranks every stored vector by cosine similarity to `query` and returns the best `k`.
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let state = self.state.read();
        if state.ids.is_empty() || k == 0 {
            return Vec::new();
        }

        let query = ArrayView1::from(query);
        let query_norm = query.dot(&query).sqrt();

        let mut hits: Vec<SearchHit> = state
            .ids
            .iter()
            .filter_map(|id| {
                state.vectors.get(id).map(|entry| SearchHit {
                    id: id.clone(),
                    score: cosine_similarity(query, query_norm, entry),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// Looks up documents in request order, silently skipping unknown ids.
    pub fn get_documents<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Document> {
        let state = self.state.read();
        ids.iter()
            .filter_map(|id| state.documents.get(id.as_ref()).cloned())
            .collect()
    }

    /// The `limit` most recently inserted documents, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Document> {
        let state = self.state.read();
        let start = state.ids.len().saturating_sub(limit);
        state.ids[start..]
            .iter()
            .filter_map(|id| state.documents.get(id).cloned())
            .collect()
    }

    pub fn size(&self) -> usize {
        self.state.read().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

// Mismatched dimensions are scored over the shared prefix.
fn cosine_similarity(query: ArrayView1<f32>, query_norm: f32, entry: &Entry) -> f32 {
    let dot = if query.len() == entry.embedding.len() {
        query.dot(&entry.embedding)
    } else {
        let n = query.len().min(entry.embedding.len());
        query.slice(s![..n]).dot(&entry.embedding.slice(s![..n]))
    };
    dot / (query_norm * entry.norm + EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str) -> Document {
        Document {
            id: id.to_string(),
            source: "BBC".to_string(),
            author: None,
            title: title.to_string(),
            description: None,
            content: None,
            url: id.to_string(),
            published_at: "2024-01-18T10:00:00Z".to_string(),
            fetched_at: "2024-01-18T10:05:00Z".to_string(),
            content_text: title.to_string(),
        }
    }

    fn padded(head: &[f32], dim: usize) -> Vec<f32> {
        let mut v = head.to_vec();
        v.resize(dim, 0.0);
        v
    }

    #[test]
    fn test_add_document() {
        let index = VectorIndex::new(10);
        index.add("doc1", vec![0.1; 10], doc("doc1", "Test"));

        assert_eq!(index.size(), 1);
        assert_eq!(index.get_documents(&["doc1"])[0].title, "Test");
    }

    #[test]
    fn test_search_ranks_identical_vector_first() {
        let index = VectorIndex::new(10);
        index.add("doc1", padded(&[1.0, 0.0, 0.0], 10), doc("doc1", "Doc1"));
        index.add("doc2", padded(&[0.9, 0.1, 0.0], 10), doc("doc2", "Doc2"));
        index.add("doc3", padded(&[0.0, 1.0, 0.0], 10), doc("doc3", "Doc3"));

        let hits = index.search(&padded(&[1.0, 0.0, 0.0], 10), 2);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["doc1", "doc2"]);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new(10);
        assert!(index.search(&[0.1; 10], 5).is_empty());
        assert!(index.search(&[0.1; 10], 0).is_empty());
    }

    #[test]
    fn test_search_returns_fewer_than_k() {
        let index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], doc("a", "A"));
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 5).len(), 1);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = VectorIndex::new(2);
        for id in ["c", "a", "b"] {
            index.add(id, vec![1.0, 1.0], doc(id, id));
        }
        let ids: Vec<_> = index
            .search(&[1.0, 1.0], 3)
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_zero_query_degrades_gracefully() {
        let index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], doc("a", "A"));
        index.add("zero", vec![0.0, 0.0, 0.0], doc("zero", "Z"));

        let hits = index.search(&[0.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score.is_finite() && h.score == 0.0));
    }

    #[test]
    fn test_overwrite_keeps_order_and_size() {
        let index = VectorIndex::new(2);
        index.add("a", vec![1.0, 0.0], doc("a", "A"));
        index.add("b", vec![0.0, 1.0], doc("b", "B"));
        index.add("a", vec![0.0, 1.0], doc("a", "A2"));

        assert_eq!(index.size(), 2);
        let recent = index.recent(10);
        assert_eq!(recent[0].title, "A2");
        assert_eq!(recent[1].title, "B");

        // the overwritten vector now ties with "b" and still ranks first by position
        let hits = index.search(&[0.0, 1.0], 2);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_size_counts_distinct_ids() {
        let index = VectorIndex::new(2);
        for id in ["x", "y", "x", "z", "y"] {
            index.add(id, vec![1.0, 0.0], doc(id, id));
        }
        assert_eq!(index.size(), 3);
    }

    #[test]
    fn test_get_documents_drops_unknown_ids() {
        let index = VectorIndex::new(2);
        index.add("a", vec![1.0, 0.0], doc("a", "A"));
        index.add("b", vec![0.0, 1.0], doc("b", "B"));

        let docs = index.get_documents(&["b", "missing", "a"]);
        let titles: Vec<_> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn test_recent_returns_tail() {
        let index = VectorIndex::new(1);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            index.add(*id, vec![i as f32 + 1.0], doc(id, id));
        }
        let titles: Vec<_> = index.recent(2).into_iter().map(|d| d.title).collect();
        assert_eq!(titles, vec!["b", "c"]);
        assert_eq!(index.recent(0).len(), 0);
    }

    #[test]
    fn test_mismatched_query_dimension_does_not_panic() {
        let index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], doc("a", "A"));
        let hits = index.search(&[1.0, 0.0], 1);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_content_text_for() {
        let text = Document::content_text_for("Title", Some("line1\nline2"), None);
        assert_eq!(text, "Title. line1 line2 ");
        let long = "x".repeat(5000);
        assert_eq!(
            Document::content_text_for(&long, None, None).chars().count(),
            CONTENT_TEXT_MAX_CHARS
        );
    }

    #[test]
    fn test_concurrent_adds_and_searches() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(VectorIndex::new(4));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("w{w}-{i}");
                        index.add(id.clone(), vec![1.0, w as f32, i as f32, 0.5], doc(&id, &id));
                    }
                })
            })
            .collect();
        let reader = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..100 {
                    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5);
                    let ids: Vec<_> = hits.iter().map(|h| h.id.clone()).collect();
                    assert_eq!(index.get_documents(&ids).len(), ids.len());
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(index.size(), 200);
    }
}
