use super::*;
use std::sync::Mutex;

/// Provider that returns `[len, index]` padded to `dimension`, recording each call's batch size
struct RecordingProvider {
    dimension: usize,
    calls: Mutex<Vec<usize>>,
}

impl RecordingProvider {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<usize> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl EmbeddingProvider for RecordingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.lock().expect("lock poisoned").push(texts.len());
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; self.dimension];
                vector[0] = text.len() as f32;
                vector
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

/// Provider returning a fixed response regardless of input
struct FixedProvider(Vec<Vec<f32>>);

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.0.clone())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingProvider("provider unavailable".to_string()))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

fn texts(count: usize) -> Vec<String> {
    (0..count).map(|i| "x".repeat(i + 1)).collect()
}

#[tokio::test]
async fn embed_batch_preserves_order_across_batches() {
    let provider = Arc::new(RecordingProvider::new(4));
    let embedder = Embedder::new(provider.clone(), 4, 3);

    let vectors = embedder
        .embed_batch(&texts(7))
        .await
        .expect("embedding should succeed");

    assert_eq!(vectors.len(), 7);
    for (i, vector) in vectors.iter().enumerate() {
        assert_eq!(vector.len(), 4);
        assert_eq!(vector[0], (i + 1) as f32);
    }
    assert_eq!(provider.calls(), vec![3, 3, 1]);
}

#[tokio::test]
async fn empty_input_skips_provider() {
    let provider = Arc::new(RecordingProvider::new(4));
    let embedder = Embedder::new(provider.clone(), 4, 16);

    let vectors = embedder
        .embed_batch(&[])
        .await
        .expect("embedding should succeed");

    assert!(vectors.is_empty());
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn embed_one_returns_single_vector() {
    let provider = Arc::new(RecordingProvider::new(8));
    let embedder = Embedder::new(provider, 8, 16);

    let vector = embedder
        .embed_one("hello")
        .await
        .expect("embedding should succeed");

    assert_eq!(vector.len(), 8);
    assert_eq!(vector[0], 5.0);
}

#[tokio::test]
async fn embed_one_matches_single_item_batch() {
    let provider = Arc::new(RecordingProvider::new(4));
    let embedder = Embedder::new(provider.clone(), 4, 2);
    let text = "refund policy".to_string();

    let single = embedder
        .embed_one(&text)
        .await
        .expect("embedding should succeed");
    let batched = embedder
        .embed_batch(std::slice::from_ref(&text))
        .await
        .expect("embedding should succeed");
    assert_eq!(batched, vec![single.clone()]);

    let mut inputs = texts(4);
    inputs.push(text);
    let vectors = embedder
        .embed_batch(&inputs)
        .await
        .expect("embedding should succeed");

    assert_eq!(vectors.len(), inputs.len());
    assert_eq!(vectors[4], single);
    assert_eq!(provider.calls(), vec![1, 1, 2, 2, 1]);
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let embedder = Embedder::new(Arc::new(FixedProvider(vec![vec![0.1, 0.2]])), 3, 16);

    let result = embedder.embed_one("text").await;

    assert!(matches!(
        result,
        Err(RagError::EmbeddingDimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
}

#[tokio::test]
async fn wrong_count_is_rejected() {
    let embedder = Embedder::new(
        Arc::new(FixedProvider(vec![vec![0.0; 3], vec![0.0; 3]])),
        3,
        16,
    );

    let result = embedder.embed_batch(&texts(3)).await;

    assert!(matches!(
        result,
        Err(RagError::EmbeddingCountMismatch {
            expected: 3,
            actual: 2
        })
    ));
}

#[tokio::test]
async fn provider_errors_propagate() {
    let embedder = Embedder::new(Arc::new(FailingProvider), 3, 16);

    let result = embedder.embed_one("text").await;

    assert!(matches!(result, Err(RagError::EmbeddingProvider(_))));
}

#[test]
fn zero_batch_size_is_clamped() {
    let embedder = Embedder::new(Arc::new(RecordingProvider::new(2)), 2, 0);
    assert_eq!(embedder.batch_size, 1);
    assert_eq!(embedder.dimension(), 2);
    assert_eq!(embedder.model_name(), "recording");
}
