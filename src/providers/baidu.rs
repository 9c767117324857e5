//! Embeddings (Qianfan v2) y rerank (Wenxin workshop) de Baidu.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{post_json, RetryPolicy};
use crate::embedding::EmbeddingModel;
use crate::error::AdapterError;
use crate::rerank::{RerankHit, RerankModel};

const EMBEDDING_ADAPTER: &str = "baidu-embedding";
const RERANK_ADAPTER: &str = "baidu-rerank";

/// Error en el cuerpo de una respuesta 200 (Baidu usa ambos formatos).
#[derive(Debug, Default, Deserialize)]
struct VendorError {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Códigos transitorios de Baidu: error desconocido (1), servicio no
/// disponible (2), límite de QPS (18) y error interno (336100). El resto
/// (token inválido o caducado, cuota agotada, parámetros) no se reintenta.
const RETRYABLE_CODES: [i64; 4] = [1, 2, 18, 336100];

/// Mismo criterio para el formato v2 (`error.code` textual).
fn is_transient_code(code: &str) -> bool {
    ["rate_limit", "internal", "unavailable"]
        .iter()
        .any(|marker| code.contains(marker))
}

impl VendorError {
    fn into_result(self, adapter: &str) -> Result<(), AdapterError> {
        if let Some(code) = self.error_code {
            let reason = format!("error_code {code}: {}", self.error_msg.unwrap_or_default());
            return Err(if RETRYABLE_CODES.contains(&code) {
                AdapterError::unavailable(adapter, reason)
            } else {
                AdapterError::rejected(adapter, reason)
            });
        }
        if let Some(error) = self.error {
            let code = error.get("code").and_then(|c| c.as_str()).unwrap_or_default();
            return Err(if is_transient_code(code) {
                AdapterError::unavailable(adapter, error)
            } else {
                AdapterError::rejected(adapter, error)
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
    #[serde(flatten)]
    vendor_error: VendorError,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f64>,
}

fn parse_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f64>>, AdapterError> {
    response.vendor_error.into_result(EMBEDDING_ADAPTER)?;
    let mut data = response.data;
    if data.len() != expected {
        return Err(AdapterError::invalid_response(
            EMBEDDING_ADAPTER,
            format!("{} embeddings para {expected} textos", data.len()),
        ));
    }
    data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

pub struct BaiduEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    retry: RetryPolicy,
}

impl BaiduEmbedding {
    pub fn new(client: reqwest::Client, api_key: String, model: String, url: String, retry: RetryPolicy) -> Self {
        Self { client, api_key, model, url, retry }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AdapterError> {
        let body = json!({ "model": self.model, "input": texts });
        let response: EmbeddingResponse =
            post_json(&self.client, EMBEDDING_ADAPTER, &self.url, &self.api_key, &body).await?;
        parse_embeddings(response, texts.len())
    }
}

#[async_trait]
impl EmbeddingModel for BaiduEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
        let texts = [text.to_string()];
        let mut vectors = self.retry.run(EMBEDDING_ADAPTER, || self.request(&texts)).await?;
        vectors
            .pop()
            .ok_or_else(|| AdapterError::invalid_response(EMBEDDING_ADAPTER, "respuesta sin datos"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AdapterError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run(EMBEDDING_ADAPTER, || self.request(texts)).await
    }
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankHit>,
    #[serde(flatten)]
    vendor_error: VendorError,
}

pub struct BaiduRerank {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    retry: RetryPolicy,
}

impl BaiduRerank {
    /// `base_url` es la ruta del servicio sin el nombre del modelo.
    pub fn new(client: reqwest::Client, api_key: String, model: String, base_url: String, retry: RetryPolicy) -> Self {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), model);
        Self { client, api_key, model, url, retry }
    }

    async fn request(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>, AdapterError> {
        // top_n = todos: el recorte lo hace el Reranker tras reordenar.
        let body = json!({
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        });
        let response: RerankResponse = post_json(&self.client, RERANK_ADAPTER, &self.url, &self.api_key, &body).await?;
        response.vendor_error.into_result(RERANK_ADAPTER)?;
        Ok(response.results)
    }
}

#[async_trait]
impl RerankModel for BaiduRerank {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>, AdapterError> {
        self.retry.run(RERANK_ADAPTER, || self.request(query, documents)).await
    }
}
