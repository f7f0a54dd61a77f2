use crate::config::EMBEDDING_DIM;
use crate::error::PinakesError;
use crate::store::PostRow;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lazy wrapper around the local ONNX embedding model. The model download
/// and load happen on the first batch, off the async runtime.
pub struct Embedder {
    model: OnceCell<Arc<TextEmbedding>>,
}

impl Embedder {
    pub fn new() -> Self {
        Self {
            model: OnceCell::new(),
        }
    }

    async fn model(&self) -> Result<Arc<TextEmbedding>, PinakesError> {
        self.model
            .get_or_try_init(|| async {
                tracing::info!("loading embedding model ({EMBEDDING_DIM} dimensions)");
                let model = tokio::task::spawn_blocking(|| {
                    TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                })
                .await
                .map_err(|e| PinakesError::Embedding(format!("model load task failed: {e}")))?
                .map_err(|e| PinakesError::Embedding(format!("failed to initialize model: {e}")))?;
                tracing::info!("embedding model loaded");
                Ok(Arc::new(model))
            })
            .await
            .cloned()
    }

    /// Batched inference; output vectors are positionally aligned with the
    /// input texts.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, PinakesError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let model = self.model().await?;
        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| PinakesError::Embedding(format!("inference task failed: {e}")))?
            .map_err(|e| PinakesError::Embedding(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(PinakesError::Embedding(format!(
                "expected {expected} vectors, model returned {}",
                embeddings.len()
            )));
        }
        for embedding in &embeddings {
            if embedding.len() != EMBEDDING_DIM {
                return Err(PinakesError::Embedding(format!(
                    "model returned a {}-dim vector",
                    embedding.len()
                )));
            }
        }
        Ok(embeddings)
    }

    /// Fill in text and alt-text vectors for a batch of rows, two batched
    /// inference calls run in parallel, results assigned back by position.
    pub async fn embed_posts(&self, mut posts: Vec<PostRow>) -> Result<Vec<PostRow>, PinakesError> {
        let texts: Vec<String> = posts.iter().map(|post| post.text.clone()).collect();
        let alt_positions: Vec<usize> = posts
            .iter()
            .enumerate()
            .filter_map(|(index, post)| post.alt_text.as_ref().map(|_| index))
            .collect();
        let alt_texts: Vec<String> = alt_positions
            .iter()
            .filter_map(|&index| posts[index].alt_text.clone())
            .collect();

        let (text_vectors, alt_vectors) =
            tokio::try_join!(self.embed_batch(texts), self.embed_batch(alt_texts))?;

        for (post, vector) in posts.iter_mut().zip(text_vectors) {
            post.embedding = Some(vector);
        }
        for (&index, vector) in alt_positions.iter().zip(alt_vectors) {
            posts[index].alt_text_embedding = Some(vector);
        }
        Ok(posts)
    }
}

impl Default for Embedder {
    fn default() -> Self {
        Self::new()
    }
}
