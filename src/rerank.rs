//! Contrato del adaptador de rerank y el algoritmo de reordenación con
//! degradación a orden original si el servicio falla.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::models::ScoredNode;

/// Puntuación de un candidato, referido por su posición en la petición.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f64,
}

#[async_trait]
pub trait RerankModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Devuelve una puntuación por documento; el orden de la respuesta es libre.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>, AdapterError>;
}

/// Salida del rerank. `fallback` indica que el servicio no puntuó a los
/// candidatos y conservan la puntuación de la recuperación.
#[derive(Debug, Clone, PartialEq)]
pub struct Reranked {
    pub nodes: Vec<ScoredNode>,
    pub fallback: bool,
}

impl Reranked {
    fn scored(nodes: Vec<ScoredNode>, top_n: usize) -> Self {
        Self { nodes: truncate(nodes, top_n), fallback: false }
    }

    fn fallback(nodes: Vec<ScoredNode>, top_n: usize) -> Self {
        Self { nodes: truncate(nodes, top_n), fallback: true }
    }
}

pub struct Reranker {
    model: Arc<dyn RerankModel>,
}

impl Reranker {
    pub fn new(model: Arc<dyn RerankModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Reordena `candidates` por relevancia y devuelve como mucho `top_n`.
    /// Nunca falla: ante cualquier error devuelve los primeros `top_n` en su
    /// orden original, marcados como `fallback`.
    pub async fn rerank(&self, query: &str, candidates: Vec<ScoredNode>, top_n: usize) -> Reranked {
        if candidates.is_empty() {
            return Reranked::scored(candidates, top_n);
        }
        if query.trim().is_empty() {
            return Reranked::fallback(candidates, top_n);
        }

        let documents: Vec<String> = candidates.iter().map(|c| c.node.text.clone()).collect();
        let scored = match self.model.score(query, &documents).await {
            Ok(hits) => apply_scores(self.model.model_name(), candidates.clone(), hits),
            Err(err) => Err(err),
        };

        match scored {
            Ok(mut nodes) => {
                // sort_by es estable: empates conservan el orden de entrada.
                nodes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
                debug!("Rerank con {} completado sobre {} candidatos", self.model.model_name(), documents.len());
                Reranked::scored(nodes, top_n)
            }
            Err(err) => {
                warn!("Rerank fallido, se devuelve el orden original. Motivo: {err}");
                Reranked::fallback(candidates, top_n)
            }
        }
    }
}

/// Alinea las puntuaciones con los candidatos ordenando por índice original.
fn apply_scores(
    adapter: &str,
    mut candidates: Vec<ScoredNode>,
    mut hits: Vec<RerankHit>,
) -> Result<Vec<ScoredNode>, AdapterError> {
    if hits.len() != candidates.len() {
        return Err(AdapterError::invalid_response(
            adapter,
            format!("{} puntuaciones para {} candidatos", hits.len(), candidates.len()),
        ));
    }
    hits.sort_by_key(|h| h.index);
    for (position, (candidate, hit)) in candidates.iter_mut().zip(&hits).enumerate() {
        if hit.index != position {
            return Err(AdapterError::invalid_response(
                adapter,
                format!("índice {} repetido o fuera de rango", hit.index),
            ));
        }
        candidate.score = hit.relevance_score;
    }
    Ok(candidates)
}

fn truncate(mut nodes: Vec<ScoredNode>, top_n: usize) -> Vec<ScoredNode> {
    nodes.truncate(top_n);
    nodes
}
