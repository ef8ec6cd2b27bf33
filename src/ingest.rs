//! Background ingestion: a poller task feeds new documents over a channel to
//! a writer task that embeds them into the index.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::news::ArticleSource;
use crate::retriever::Retriever;
use crate::vector_db::Document;

const CHANNEL_CAPACITY: usize = 256;

pub struct IngestHandle {
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
    writer: JoinHandle<usize>,
    running: Arc<AtomicBool>,
}

impl IngestHandle {
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stops polling, drains queued documents into the index, and returns
    /// how many were written.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.poller.await {
            warn!("ingestion poller ended abnormally: {}", err);
        }
        let written = match self.writer.await {
            Ok(count) => count,
            Err(err) => {
                warn!("ingestion writer ended abnormally: {}", err);
                0
            }
        };
        self.running.store(false, Ordering::SeqCst);
        info!("Ingestion stopped after {} documents", written);
        written
    }
}

/// Clears the shared running flag when either task exits, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub fn spawn<S>(source: S, retriever: Arc<Retriever>, interval: Duration) -> IngestHandle
where
    S: ArticleSource + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let running = Arc::new(AtomicBool::new(true));

    let poller = tokio::spawn(poll_loop(
        source,
        tx,
        interval,
        shutdown_rx,
        RunningGuard(Arc::clone(&running)),
    ));
    let writer = tokio::spawn(write_loop(
        rx,
        retriever,
        RunningGuard(Arc::clone(&running)),
    ));
    info!("Ingestion pipeline started");

    IngestHandle {
        shutdown,
        poller,
        writer,
        running,
    }
}

async fn poll_loop<S: ArticleSource>(
    mut source: S,
    tx: mpsc::Sender<Document>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    _running: RunningGuard,
) {
    loop {
        for document in source.poll().await {
            if tx.send(document).await.is_err() {
                warn!("index writer gone; stopping poller");
                return;
            }
        }

        debug!("Waiting {:?} before next poll", interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("Ingestion poller received shutdown");
                return;
            }
        }
        if *shutdown.borrow() {
            return;
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Document>,
    retriever: Arc<Retriever>,
    _running: RunningGuard,
) -> usize {
    let mut written = 0;
    while let Some(document) = rx.recv().await {
        retriever.add_to_knowledge_base(document).await;
        written += 1;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    use crate::embeddings::CachedEmbedder;
    use crate::embeddings::tests::StubEmbedder;
    use crate::rag::tests::article;
    use crate::vector_db::VectorIndex;

    struct ScriptedSource {
        batches: VecDeque<Vec<Document>>,
    }

    #[async_trait]
    impl ArticleSource for ScriptedSource {
        async fn poll(&mut self) -> Vec<Document> {
            self.batches.pop_front().unwrap_or_default()
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl ArticleSource for PanickingSource {
        async fn poll(&mut self) -> Vec<Document> {
            panic!("feed exploded");
        }
    }

    fn retriever() -> Arc<Retriever> {
        let embedder = CachedEmbedder::new(Some(Box::new(StubEmbedder::new(8))), 8);
        Arc::new(Retriever::new(
            Arc::new(VectorIndex::new(8)),
            Arc::new(embedder),
            "stub",
        ))
    }

    #[tokio::test]
    async fn test_documents_flow_into_index() {
        let retriever = retriever();
        let source = ScriptedSource {
            batches: VecDeque::from(vec![
                vec![article("a", "A", None), article("b", "B", None)],
                vec![article("c", "C", None)],
            ]),
        };

        let handle = spawn(source, Arc::clone(&retriever), Duration::from_millis(5));
        for _ in 0..200 {
            if retriever.index().size() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let running = handle.running();
        assert!(running.load(Ordering::SeqCst));

        let written = handle.shutdown().await;
        assert_eq!(written, 3);
        assert_eq!(retriever.index().size(), 3);
        assert!(!running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_sleep() {
        let retriever = retriever();
        let source = ScriptedSource {
            batches: VecDeque::new(),
        };

        let handle = spawn(source, retriever, Duration::from_secs(3600));
        let stopped = tokio::time::timeout(Duration::from_secs(5), handle.shutdown()).await;
        assert_eq!(stopped.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_running_cleared_when_poller_dies() {
        let handle = spawn(PanickingSource, retriever(), Duration::from_millis(5));
        let running = handle.running();
        for _ in 0..200 {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(handle.shutdown().await, 0);
    }
}
