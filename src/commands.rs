use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::answer::{AnswerComposer, ModelTier, QueryService};
use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::vector_index::VectorIndex;
use crate::embeddings::Embedder;
use crate::embeddings::ollama::{OllamaClient, OllamaGenerator};
use crate::indexer::{SOURCE_TITLE_ATTRIBUTE, SyncPipeline, SyncState};
use crate::retrieval::Retriever;
use crate::sources::{UNTITLED, open_source};

async fn open_database(config: &Config) -> Result<Database> {
    std::fs::create_dir_all(config.get_base_dir()).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.get_base_dir().display()
        )
    })?;

    Database::new(config.database_path())
        .await
        .context("Failed to initialize database")
}

fn build_embedder(config: &Config, client: &OllamaClient) -> Embedder {
    Embedder::new(
        Arc::new(client.clone()),
        config.ollama.embedding_dimension as usize,
        config.ollama.batch_size as usize,
    )
}

/// Wire up the sync pipeline for `config`, reading from `source` when given
#[inline]
pub async fn build_pipeline(config: &Config, source: Option<PathBuf>) -> Result<SyncPipeline> {
    let source_path = source.unwrap_or_else(|| config.source_path());
    let source = open_source(&source_path);

    let database = open_database(config).await?;
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let embedder = build_embedder(config, &client);
    let index = VectorIndex::new(database, embedder.dimension());

    let pipeline = SyncPipeline::new(source, embedder, index, config.chunking.clone())
        .context("Invalid sync configuration")?;
    Ok(pipeline)
}

/// Wire up the query operation for `config`
#[inline]
pub async fn build_query_service(config: &Config) -> Result<QueryService> {
    let database = open_database(config).await?;
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let embedder = build_embedder(config, &client);
    let index = VectorIndex::new(database, embedder.dimension());

    let retriever = Retriever::new(embedder, index).with_default_k(config.retrieval.top_k);
    let generator = OllamaGenerator::new(client, &config.generation);
    let composer = AnswerComposer::new(Arc::new(generator), &config.generation.project_name);

    Ok(QueryService::new(retriever, composer))
}

/// Replace the knowledge base with the current contents of the source
#[inline]
pub async fn sync(config: &Config, source: Option<PathBuf>) -> Result<()> {
    let pipeline = build_pipeline(config, source).await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                .context("Invalid progress bar template")?,
        )
    } else {
        ProgressBar::hidden()
    };
    let progress_handle = tokio::spawn(render_progress(pipeline.subscribe(), bar.clone()));

    let cancel = CancellationToken::new();
    let interrupt_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling sync");
                cancel.cancel();
            }
        })
    };

    let result = pipeline.run_with_cancellation(cancel).await;
    interrupt_handle.abort();
    progress_handle.abort();
    bar.finish_and_clear();

    let report = result?;
    match report.generation_id {
        Some(generation_id) => {
            println!("✅ Sync complete (generation {})", generation_id);
            println!("   📄 Documents loaded: {}", report.documents_loaded);
            println!("   🧩 Chunks created: {}", report.chunks_created);
        }
        None => {
            println!("📭 The source returned no documents; the knowledge base was left unchanged.");
        }
    }

    Ok(())
}

async fn render_progress(mut receiver: watch::Receiver<SyncState>, bar: ProgressBar) {
    while receiver.changed().await.is_ok() {
        let state = receiver.borrow_and_update().clone();
        match state {
            SyncState::Idle => {}
            SyncState::Fetching => bar.set_message("Fetching documents"),
            SyncState::Staging => bar.set_message("Staging a new generation"),
            SyncState::Chunking {
                source_id,
                position,
                total,
            }
            | SyncState::Embedding {
                source_id,
                position,
                total,
            }
            | SyncState::Storing {
                source_id,
                position,
                total,
            } => {
                bar.set_length(total as u64);
                bar.set_position(position as u64);
                bar.set_message(source_id);
            }
            SyncState::Committing { generation_id } => {
                bar.set_message(format!("Committing generation {}", generation_id));
            }
            SyncState::Committed(_) | SyncState::Failed { .. } => break,
        }
    }
}

/// Answer a question from the knowledge base
#[inline]
pub async fn query(
    config: &Config,
    question: &str,
    tier: ModelTier,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let service = build_query_service(config).await?;

    info!("Answering question with the {} model", tier);
    let response = service.answer(question, tier, k).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialize response")?
        );
        return Ok(());
    }

    println!("{}", response.answer);

    if !response.sources.is_empty() {
        println!();
        println!("📚 Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            let title = source
                .get(SOURCE_TITLE_ATTRIBUTE)
                .and_then(|v| v.as_str())
                .unwrap_or(UNTITLED);
            let source_id = source
                .get("source_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            println!("   {}. {} ({})", i + 1, title, source_id);
        }
    }

    Ok(())
}

/// Show the state of the knowledge base and its dependencies
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Knowledge Base Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Database Status:");
    let database = match open_database(config).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected ({})", config.database_path().display());
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to connect - {:#}", e);
            None
        }
    };

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check(&[
            config.ollama.embedding_model.as_str(),
            config.generation.fast_model.as_str(),
            config.generation.intelligent_model.as_str(),
        ]) {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Embedding Model: {}", config.ollama.embedding_model);
                println!("   ⚡ Fast Model: {}", config.generation.fast_model);
                println!(
                    "   🧠 Intelligent Model: {}",
                    config.generation.intelligent_model
                );
            }
            Err(e) => {
                println!("   ⚠️  Ollama: Not ready - {}", e);
            }
        },
        Err(e) => {
            println!("   ❌ Ollama: Failed to connect - {}", e);
        }
    }

    if let Some(database) = database {
        let index = VectorIndex::new(database, config.ollama.embedding_dimension as usize);

        println!();
        println!("🔍 Index Status:");
        match index.statistics().await {
            Ok(stats) => {
                match &stats.active {
                    Some(generation) => {
                        println!("   ✅ Active generation: {}", generation.id);
                        if let Some(committed_at) = generation.committed_at {
                            println!("   🕒 Committed: {}", committed_at);
                        }
                        println!(
                            "   🔢 Dimension: {} ({})",
                            generation.dimension, generation.distance_metric
                        );
                        if generation.dimension != i64::from(config.ollama.embedding_dimension) {
                            println!(
                                "   ⚠️  Configured dimension is {}; run a full sync",
                                config.ollama.embedding_dimension
                            );
                        }
                    }
                    None => println!("   📭 Nothing has been synced yet"),
                }
                println!("   📄 Documents: {}", stats.document_count);
                println!("   🧩 Chunks: {}", stats.chunk_count);

                if let Some(staging) = &stats.staging {
                    println!(
                        "   🔄 Sync in progress: generation {} (last heartbeat {})",
                        staging.id, staging.heartbeat_at
                    );
                }
            }
            Err(e) => {
                println!("   ❌ Failed to read index statistics: {}", e);
            }
        }
    }

    println!();
    println!("💡 Next Steps:");
    println!(
        "   • Use 'kb-rag sync' to load {} into the knowledge base",
        config.source_path().display()
    );
    println!("   • Use 'kb-rag query \"<question>\"' to ask a question");

    Ok(())
}
