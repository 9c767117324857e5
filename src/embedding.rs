//! Contrato del adaptador de embeddings y envoltorio con las reglas comunes
//! (entrada no vacía, lotes, dimensión fija durante todo el proceso).

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::error::AdapterError;

/// Modelo remoto que convierte texto en un vector.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError>;

    /// Por defecto aplica `embed_one` a cada texto; los proveedores con API
    /// por lotes lo sobrescriben.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AdapterError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }
        Ok(vectors)
    }
}

/// Punto de entrada único a un `EmbeddingModel`.
pub struct Embedder {
    model: Arc<dyn EmbeddingModel>,
    batch_size: usize,
    dimension: OnceLock<usize>,
}

impl Embedder {
    pub fn new(model: Arc<dyn EmbeddingModel>, batch_size: usize) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
            dimension: OnceLock::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Fija la dimensión esperada (la del índice cargado de disco).
    pub fn lock_dimension(&self, dimension: usize) -> Result<(), AdapterError> {
        let expected = *self.dimension.get_or_init(|| dimension);
        if expected != dimension {
            return Err(AdapterError::DimensionMismatch {
                expected,
                actual: dimension,
            });
        }
        Ok(())
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
        if text.trim().is_empty() {
            return Err(AdapterError::EmptyInput("embed_one"));
        }
        let vector = self.model.embed_one(text).await?;
        self.check(&vector)?;
        Ok(vector)
    }

    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AdapterError> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(AdapterError::EmptyInput("embed_many"));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.model.embed_many(batch).await?;
            if embedded.len() != batch.len() {
                return Err(AdapterError::invalid_response(
                    self.model.model_name(),
                    format!("{} embeddings para {} textos", embedded.len(), batch.len()),
                ));
            }
            for vector in &embedded {
                self.check(vector)?;
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn check(&self, vector: &[f64]) -> Result<(), AdapterError> {
        if vector.is_empty() {
            return Err(AdapterError::invalid_response(self.model.model_name(), "vector vacío"));
        }
        self.lock_dimension(vector.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        dim: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for CountingModel {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.chars().count() as f64; self.dim])
        }
    }

    struct ShrinkingModel;

    #[async_trait]
    impl EmbeddingModel for ShrinkingModel {
        fn model_name(&self) -> &str {
            "shrinking"
        }

        async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
            Ok(vec![1.0; text.chars().count()])
        }
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_the_remote_call() {
        let model = Arc::new(CountingModel { dim: 4, calls: AtomicUsize::new(0) });
        let embedder = Embedder::new(model.clone(), 2);
        let err = embedder.embed_one("   ").await.unwrap_err();
        assert!(matches!(err, AdapterError::EmptyInput(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn embed_many_keeps_input_order_and_locks_dimension() {
        let model = Arc::new(CountingModel { dim: 3, calls: AtomicUsize::new(0) });
        let embedder = Embedder::new(model.clone(), 2);
        let texts: Vec<String> = ["a", "bb", "ccc"].iter().map(|s| s.to_string()).collect();

        let vectors = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[2], vec![3.0, 3.0, 3.0]);
        assert_eq!(embedder.dimension(), Some(3));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dimension_change_is_an_error() {
        let embedder = Embedder::new(Arc::new(ShrinkingModel), 10);
        embedder.embed_one("abc").await.unwrap();
        let err = embedder.embed_one("ab").await.unwrap_err();
        assert!(matches!(err, AdapterError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn lock_dimension_rejects_a_different_size() {
        let embedder = Embedder::new(Arc::new(ShrinkingModel), 10);
        embedder.lock_dimension(8).unwrap();
        assert!(embedder.lock_dimension(8).is_ok());
        assert!(embedder.lock_dimension(4).is_err());
    }
}
