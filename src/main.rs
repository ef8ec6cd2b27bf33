mod api;
mod config;
mod embeddings;
mod ingest;
mod llm;
mod news;
mod rag;
mod retriever;
mod utils;
mod vector_db;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, Settings};
use embeddings::{CachedEmbedder, Embedder, OpenAiEmbedder};
use llm::OpenAiChat;
use news::NewsApiConnector;
use rag::{ContextBuilder, RagEngine};
use retriever::Retriever;
use vector_db::VectorIndex;

#[derive(Parser)]
#[command(name = "livenews-rag", about = "Real-time RAG over breaking news")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API with live NewsAPI ingestion.
    Serve,
    /// Interactive question loop on stdin.
    Ask {
        /// Directory of NewsAPI-shaped JSON files to index before asking.
        #[arg(long)]
        seed_dir: Option<PathBuf>,

        /// Also poll NewsAPI in the background.
        #[arg(long)]
        live: bool,
    },
}

/// Everything the query and ingestion paths share.
struct App {
    config: Config,
    retriever: Arc<Retriever>,
    rag: Arc<RagEngine>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let provider: Option<Box<dyn Embedder>> = if config.openai_api_key.is_empty() {
            None
        } else {
            Some(Box::new(OpenAiEmbedder::new(
                &config.openai_api_key,
                &config.openai_base_url,
                &config.embedding_model,
                config.request_timeout,
            )?))
        };
        let embedder = Arc::new(CachedEmbedder::new(provider, config.embedding_dimension));
        let index = Arc::new(VectorIndex::new(config.embedding_dimension));
        let retriever = Arc::new(Retriever::new(index, embedder, &config.embedding_model));

        let llm_config = config.llm();
        let chat = OpenAiChat::new(
            Some(config.openai_api_key.clone()),
            &config.openai_base_url,
            &llm_config.model,
            config.request_timeout,
        )?;
        let rag = Arc::new(RagEngine::new(
            ContextBuilder::new(config.max_context_length),
            Arc::new(chat),
            llm_config,
        ));

        Ok(App {
            config,
            retriever,
            rag,
        })
    }

    fn start_ingestion(&self) -> Option<ingest::IngestHandle> {
        match NewsApiConnector::new(&self.config) {
            Ok(connector) => Some(ingest::spawn(
                connector,
                Arc::clone(&self.retriever),
                self.config.news_polling_interval,
            )),
            Err(err) => {
                warn!("News ingestion disabled: {:#}", err);
                None
            }
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("livenews_rag={}", level.to_lowercase())));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn seed_from_dir(retriever: &Retriever, dir: &Path) -> Result<usize> {
    let articles = utils::load_article_files(dir)?;
    let mut added = 0;
    for document in articles.into_iter().filter_map(|a| a.into_document()) {
        retriever.add_to_knowledge_base(document).await;
        added += 1;
    }
    Ok(added)
}

fn default_seed_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("livenews-rag").join("articles"))
}

async fn serve(app: App) -> Result<()> {
    let ingestion = app.start_ingestion();
    let pipeline_running = ingestion
        .as_ref()
        .map(|handle| handle.running())
        .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));

    let state = api::AppState {
        retriever: Arc::clone(&app.retriever),
        rag: Arc::clone(&app.rag),
        pipeline_running,
    };
    let router = api::create_router(state);

    let addr = app.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down LiveNewsAI application");
        })
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = ingestion {
        handle.shutdown().await;
    }
    Ok(())
}

/// Answers one question per input line until EOF. Returns how many were asked.
async fn answer_lines<R>(app: &App, input: R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut asked = 0;
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        asked += 1;

        let documents = app.retriever.retrieve(query, app.config.top_k).await;
        print!("\nThinking...");
        std::io::stdout().flush()?;
        match app.rag.answer_question(query, &documents).await {
            Ok(result) => {
                println!("\r{}\n", result.answer);
                for summary in &result.article_summaries {
                    println!("  - {}", summary);
                }
                for source in &result.sources {
                    println!("  [{}]", source);
                }
                println!();
            }
            Err(e) => eprintln!("\rError: {}\n", e),
        }
    }
    Ok(asked)
}

async fn interactive(app: App, seed_dir: Option<PathBuf>, live: bool) -> Result<()> {
    if let Some(dir) = seed_dir.or_else(default_seed_dir) {
        println!("Loading articles from '{}'...", dir.display());
        match seed_from_dir(&app.retriever, &dir).await {
            Ok(n) => println!("Indexed {n} articles"),
            Err(e) => eprintln!("Warning: Failed to load articles: {:#}", e),
        }
    }
    let ingestion = if live { app.start_ingestion() } else { None };

    println!("LiveNews RAG ready! Enter your questions (Ctrl+D to exit)");
    answer_lines(&app, BufReader::new(tokio::io::stdin())).await?;

    if let Some(handle) = ingestion {
        handle.shutdown().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let config = Config::from(cli.settings);
    config.warn_missing_keys();
    info!(
        "Retrieval: top_k={}, similarity_threshold={}, max_context_length={}, llm_model={}",
        config.top_k, config.similarity_threshold, config.max_context_length, config.llm_model
    );
    let app = App::new(config)?;

    match cli.command {
        Command::Serve => serve(app).await,
        Command::Ask { seed_dir, live } => interactive(app, seed_dir, live).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::embeddings::tests::StubEmbedder;
    use crate::llm::LLMConfig;
    use crate::rag::tests::{Behavior, StubModel, article};

    #[test]
    fn test_settings_accepted_after_subcommand() {
        let cli = Cli::try_parse_from(["livenews-rag", "serve", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Command::Serve));
        assert_eq!(Config::from(cli.settings).port, 9000);

        let cli = Cli::try_parse_from([
            "livenews-rag",
            "ask",
            "--top-k",
            "3",
            "--seed-dir",
            "d",
        ])
        .unwrap();
        assert_eq!(cli.settings.top_k, 3);
        match cli.command {
            Command::Ask { seed_dir, live } => {
                assert_eq!(seed_dir, Some(PathBuf::from("d")));
                assert!(!live);
            }
            Command::Serve => panic!("expected ask"),
        }
    }

    #[tokio::test]
    async fn test_answer_lines_reads_until_eof() {
        let embedder = CachedEmbedder::new(Some(Box::new(StubEmbedder::new(16))), 16);
        let retriever = Retriever::new(
            Arc::new(VectorIndex::new(16)),
            Arc::new(embedder),
            "stub",
        );
        retriever
            .add_to_knowledge_base(article("a", "Markets rally", Some("Stocks rose.")))
            .await;
        let model = StubModel::new(Behavior::Answer("Stocks rose."));
        let rag = RagEngine::new(
            ContextBuilder::default(),
            model.clone(),
            LLMConfig::default(),
        );
        let app = App {
            config: Config::default(),
            retriever: Arc::new(retriever),
            rag: Arc::new(rag),
        };

        let input: &[u8] = b"what happened to markets?\n\n   \nany news?\n";
        let asked = answer_lines(&app, input).await.unwrap();
        assert_eq!(asked, 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
