//! Proveedores remotos concretos y su selección a partir de la configuración.
//!
//! - `baidu`: embeddings (Qianfan) y rerank (Wenxin workshop).
//! - `zhipu`: chat completions de GLM.
//! - `openai`: embeddings y chat a través de Rig.

pub mod baidu;
pub mod openai;
pub mod zhipu;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, EmbeddingProvider, LlmProvider, RerankProvider};
use crate::embedding::EmbeddingModel;
use crate::error::{AdapterError, ConfigError};
use crate::llm::LanguageModel;
use crate::rerank::RerankModel;

/// Tiempo límite por llamada y número acotado de reintentos.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            timeout: cfg.request_timeout,
            max_retries: cfg.max_retries,
            ..Self::default()
        }
    }

    /// Ejecuta `call` con tiempo límite; reintenta sólo errores transitorios.
    pub async fn run<T, F, Fut>(&self, adapter: &str, mut call: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout {
                    adapter: adapter.to_string(),
                    secs: self.timeout.as_secs(),
                }),
            };
            match outcome {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("{adapter}: intento {attempt}/{} fallido ({err}), reintentando", self.max_retries);
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                other => return other,
            }
        }
    }
}

/// POST JSON autenticado con bearer token.
pub(crate) async fn post_json<B, T>(
    client: &reqwest::Client,
    adapter: &str,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<T, AdapterError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    debug!("Petición a {adapter}: {url}");
    let res = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| AdapterError::unavailable(adapter, e))?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        error!("{adapter} respondió {status}: {body}");
        let reason = format!("HTTP {status}: {body}");
        return Err(if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            AdapterError::unavailable(adapter, reason)
        } else {
            AdapterError::rejected(adapter, reason)
        });
    }

    res.json::<T>()
        .await
        .map_err(|e| AdapterError::invalid_response(adapter, e))
}

fn http_client(cfg: &AppConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(cfg.request_timeout)
        .build()
        .unwrap_or_default()
}

fn require(value: &Option<String>, var: &'static str) -> Result<String, ConfigError> {
    value.clone().ok_or(ConfigError::Missing(var))
}

pub fn embedding_from_config(cfg: &AppConfig) -> Result<Arc<dyn EmbeddingModel>, ConfigError> {
    let model: Arc<dyn EmbeddingModel> = match cfg.embedding_provider {
        EmbeddingProvider::Baidu => Arc::new(baidu::BaiduEmbedding::new(
            http_client(cfg),
            require(&cfg.credentials.baidu_api_key, "BAIDU_API_KEY")?,
            cfg.embedding_model.clone(),
            cfg.endpoints.baidu_embedding.to_string(),
            RetryPolicy::from_config(cfg),
        )),
        EmbeddingProvider::OpenAI => {
            require(&cfg.credentials.openai_api_key, "OPENAI_API_KEY")?;
            Arc::new(openai::OpenAiEmbedding::from_env(
                cfg.embedding_model.clone(),
                RetryPolicy::from_config(cfg),
            ))
        }
    };
    info!("Usando {:?} {} como modelo de embedding", cfg.embedding_provider, cfg.embedding_model);
    Ok(model)
}

pub fn rerank_from_config(cfg: &AppConfig) -> Result<Arc<dyn RerankModel>, ConfigError> {
    let model: Arc<dyn RerankModel> = match cfg.rerank_provider {
        RerankProvider::Baidu => Arc::new(baidu::BaiduRerank::new(
            http_client(cfg),
            require(&cfg.credentials.baidu_api_key, "BAIDU_API_KEY")?,
            cfg.rerank_model.clone(),
            cfg.endpoints.baidu_rerank.to_string(),
            RetryPolicy::from_config(cfg),
        )),
    };
    info!("Usando {:?} {} como modelo de rerank", cfg.rerank_provider, cfg.rerank_model);
    Ok(model)
}

pub fn llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LanguageModel>, ConfigError> {
    let model: Arc<dyn LanguageModel> = match cfg.llm_provider {
        LlmProvider::Zhipu => Arc::new(zhipu::ZhipuChat::new(
            http_client(cfg),
            require(&cfg.credentials.zhipu_api_key, "ZHIPU_API_KEY")?,
            cfg.llm_model.clone(),
            cfg.endpoints.zhipu_chat.to_string(),
            RetryPolicy::from_config(cfg),
        )),
        LlmProvider::OpenAI => {
            require(&cfg.credentials.openai_api_key, "OPENAI_API_KEY")?;
            Arc::new(openai::OpenAiChat::from_env(
                cfg.llm_model.clone(),
                RetryPolicy::from_config(cfg),
            ))
        }
    };
    info!("Usando {:?} {} como LLM", cfg.llm_provider, cfg.llm_model);
    Ok(model)
}
