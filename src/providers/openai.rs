//! Variante OpenAI sobre Rig. `Client::from_env` lee `OPENAI_API_KEY`
//! (y `OPENAI_BASE_URL` si existe, útil para endpoints compatibles).

use async_trait::async_trait;
use rig::client::{CompletionClient as _, EmbeddingsClient as _};
use rig::completion::{Chat as _, Message};
use rig::embeddings::EmbeddingModel as _;
use rig::providers::openai;
use serde_json::json;

use super::RetryPolicy;
use crate::embedding::EmbeddingModel;
use crate::error::AdapterError;
use crate::llm::{ChatMessage, GenerationOptions, LanguageModel, Role};

const EMBEDDING_ADAPTER: &str = "openai-embedding";
const CHAT_ADAPTER: &str = "openai-chat";

pub struct OpenAiEmbedding {
    client: openai::Client,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiEmbedding {
    pub fn from_env(model: String, retry: RetryPolicy) -> Self {
        Self {
            client: openai::Client::from_env(),
            model,
            retry,
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AdapterError> {
        let embedding_model = self.client.embedding_model(&self.model);
        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| AdapterError::unavailable(EMBEDDING_ADAPTER, e))?;
        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
        let texts = [text.to_string()];
        let mut vectors = self.retry.run(EMBEDDING_ADAPTER, || self.request(&texts)).await?;
        vectors
            .pop()
            .ok_or_else(|| AdapterError::invalid_response(EMBEDDING_ADAPTER, "no se pudo generar el embedding"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AdapterError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run(EMBEDDING_ADAPTER, || self.request(texts)).await
    }
}

/// Historial repartido como lo espera un agente de Rig.
#[derive(Debug, PartialEq)]
struct AgentTurn {
    preamble: String,
    history: Vec<ChatMessage>,
    prompt: String,
}

/// Los mensajes de sistema van al preámbulo; el último mensaje de usuario es
/// el prompt y lo anterior el historial.
fn split_history(messages: &[ChatMessage]) -> Result<AgentTurn, AdapterError> {
    let (last, earlier) = messages
        .split_last()
        .ok_or(AdapterError::EmptyInput("chat"))?;
    if last.role != Role::User {
        return Err(AdapterError::invalid_response(
            CHAT_ADAPTER,
            "el último mensaje del historial debe ser del usuario",
        ));
    }

    let preamble = earlier
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let history = earlier.iter().filter(|m| m.role != Role::System).cloned().collect();

    Ok(AgentTurn {
        preamble,
        history,
        prompt: last.content.clone(),
    })
}

pub struct OpenAiChat {
    client: openai::Client,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiChat {
    pub fn from_env(model: String, retry: RetryPolicy) -> Self {
        Self {
            client: openai::Client::from_env(),
            model,
            retry,
        }
    }

    async fn request(&self, turn: &AgentTurn, options: &GenerationOptions) -> Result<String, AdapterError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&turn.preamble)
            .temperature(options.temperature)
            .additional_params(json!({ "top_p": options.top_p }))
            .build();

        let history: Vec<Message> = turn
            .history
            .iter()
            .map(|m| match m.role {
                Role::Assistant => Message::assistant(m.content.clone()),
                _ => Message::user(m.content.clone()),
            })
            .collect();

        agent
            .chat(turn.prompt.as_str(), history)
            .await
            .map_err(|e| AdapterError::unavailable(CHAT_ADAPTER, e))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String, AdapterError> {
        let turn = split_history(messages)?;
        self.retry.run(CHAT_ADAPTER, || self.request(&turn, options)).await
    }
}
