use super::*;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewChunk, NewDocument};
use crate::embeddings::EmbeddingProvider;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Maps known words onto axes so tests can aim queries at specific chunks
struct KeywordProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![
                    if t.contains("billing") { 1.0 } else { 0.0 },
                    if t.contains("deploy") { 1.0 } else { 0.0 },
                    if t.contains("holiday") { 1.0 } else { 0.0 },
                ]
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

async fn setup() -> (TempDir, Arc<KeywordProvider>, Retriever) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("Failed to create test database");
    let index = VectorIndex::new(database, 3);
    let provider = Arc::new(KeywordProvider {
        calls: AtomicUsize::new(0),
    });
    let embedder = Embedder::new(provider.clone(), 3, 16);
    (temp_dir, provider, Retriever::new(embedder, index))
}

fn chunk(index: i64, text: &str, vector: [f32; 3], title: &str) -> NewChunk {
    let mut attributes = Attributes::new();
    attributes.insert("source_title".to_string(), AttributeValue::from(title));
    NewChunk {
        chunk_index: index,
        content: text.to_string(),
        embedding: vector.to_vec(),
        attributes,
    }
}

fn document(source_id: &str) -> NewDocument {
    NewDocument {
        source_id: source_id.to_string(),
        title: source_id.to_string(),
        content: String::new(),
        attributes: Attributes::new(),
    }
}

#[tokio::test]
async fn empty_store_returns_empty_sequence() {
    let (_temp_dir, _provider, retriever) = setup().await;

    let results = retriever
        .retrieve("how do I deploy?")
        .await
        .expect("retrieval should succeed");

    assert!(results.is_empty());
}

#[tokio::test]
async fn results_carry_citation_attributes() {
    let (_temp_dir, provider, retriever) = setup().await;
    retriever
        .index
        .replace_all(&[
            (
                document("ops"),
                vec![
                    chunk(0, "Deploy with the release script.", [0.0, 1.0, 0.0], "Ops"),
                    chunk(1, "Billing runs monthly.", [1.0, 0.0, 0.0], "Ops"),
                ],
            ),
            (
                document("hr"),
                vec![chunk(0, "Holiday calendar.", [0.0, 0.0, 1.0], "HR")],
            ),
        ])
        .await
        .expect("replace should succeed");

    let results = retriever
        .retrieve_k("When does billing happen?", 2)
        .await
        .expect("retrieval should succeed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "Billing runs monthly.");
    assert!(results[0].distance.abs() < 1e-6);
    assert_eq!(results[0].attributes["source_title"], AttributeValue::from("Ops"));
    assert_eq!(results[0].attributes["source_id"], AttributeValue::from("ops"));
    assert_eq!(results[0].attributes["chunk_index"], AttributeValue::from(1i64));
    assert!(results[0].distance <= results[1].distance);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn default_k_is_four() {
    let (_temp_dir, _provider, retriever) = setup().await;
    let chunks: Vec<NewChunk> = (0..6)
        .map(|i| chunk(i, &format!("deploy step {}", i), [0.0, 1.0, 0.1], "Runbook"))
        .collect();
    retriever
        .index
        .replace_all(&[(document("runbook"), chunks)])
        .await
        .expect("replace should succeed");

    let results = retriever
        .retrieve("deploy")
        .await
        .expect("retrieval should succeed");

    assert_eq!(results.len(), DEFAULT_TOP_K);
    let order: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(
        order,
        vec!["deploy step 0", "deploy step 1", "deploy step 2", "deploy step 3"]
    );
}

#[tokio::test]
async fn zero_k_is_invalid() {
    let (_temp_dir, provider, retriever) = setup().await;

    assert!(matches!(
        retriever.retrieve_k("deploy", 0).await,
        Err(RagError::InvalidArgument(_))
    ));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blank_query_is_embedded_and_searched() {
    let (_temp_dir, provider, retriever) = setup().await;
    retriever
        .index
        .replace_all(&[(
            document("ops"),
            vec![chunk(0, "Deploy with the release script.", [0.0, 1.0, 0.0], "Ops")],
        )])
        .await
        .expect("replace should succeed");

    let results = retriever
        .retrieve("   ")
        .await
        .expect("retrieval should succeed");

    assert_eq!(results.len(), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_default_k_is_used() {
    let (_temp_dir, _provider, retriever) = setup().await;
    let retriever = retriever.with_default_k(1);
    retriever
        .index
        .replace_all(&[(
            document("ops"),
            vec![
                chunk(0, "deploy a", [0.0, 1.0, 0.0], "Ops"),
                chunk(1, "deploy b", [0.0, 1.0, 0.0], "Ops"),
            ],
        )])
        .await
        .expect("replace should succeed");

    let results = retriever
        .retrieve("deploy")
        .await
        .expect("retrieval should succeed");

    assert_eq!(results.len(), 1);
}
